//! Utility modules for configuration and error handling.

pub mod error;
pub mod config;

// Re-export commonly used types for convenience
pub use config::{load_options, DebugBarOptions, ThresholdScope};
pub use error::{ConfigError, OutputError, ReplayError, StoreError};
