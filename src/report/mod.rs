//! Report types and the serialization boundary.
//!
//! - `schema`: the finalized report and compact snapshot structures
//! - `sanitize`: sensitive-field redaction and callback stripping
//! - `format`: human-readable bytes and milliseconds

pub mod format;
pub mod sanitize;
pub mod schema;

// Re-export main types
pub use sanitize::{redact_sensitive, strip_callbacks};
pub use schema::{CompactSnapshot, Report, SnapshotEnvelope};
