//! Output side of the collector.
//!
//! This module handles everything that leaves the process:
//! - JSON report files
//! - Persisted request snapshots and their retention
//! - The inline panel contract

pub mod json;
pub mod panel;
pub mod store;

// Re-export main functions
pub use json::{read_report, write_report};
pub use panel::{PanelRenderer, TextPanel};
pub use store::{
    enforce_retention, list_snapshots, load_snapshot, record_snapshot, FileSnapshotStore,
    InMemoryStore, SnapshotStore, SnapshotSummary,
};
