//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.
//!
//! Nothing on the collection path returns these: the collector degrades to
//! default data instead. They surface only from storage, options loading and
//! the replay tooling.

use thiserror::Error;

/// Errors that can occur while persisting or reading request snapshots
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Snapshot storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid snapshot key: {0}")]
    InvalidKey(String),

    #[error("Snapshot not found: {0}")]
    NotFound(String),
}

/// Errors that can occur while loading collector options
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read options file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid options TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid option value: {0}")]
    Invalid(String),
}

/// Errors that can occur while replaying a recorded event script
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid script JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown script step: {0}")]
    UnknownStep(String),
}

/// Errors that can occur while writing or reading report files
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}
