//! Configuration and constants for the collector.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current persisted snapshot schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

pub const MIB: u64 = 1024 * 1024;

// Memory growth ladder, in MiB above the start-of-request baseline
pub const MEMORY_THRESHOLDS_MB: &[u64] = &[5, 10, 20, 50];

/// Group that receives threshold warnings
pub const MEMORY_GROUP: &str = "Memory";

/// Maximum frames recorded per log entry
pub const MAX_CALL_CHAIN: usize = 5;

// Display truncation widths
pub const QUERY_PREVIEW_CHARS: usize = 100;
pub const SLOW_QUERY_PREVIEW_CHARS: usize = 150;

pub const DEFAULT_SLOW_QUERY_LIMIT: usize = 5;
pub const DEFAULT_DUPLICATE_LIMIT: usize = 10;

/// Nominal width of a log marker on the timeline
pub const TIMELINE_MARKER_MS: f64 = 0.1;
pub const TIMER_COLOR: &str = "#3498db";
pub const QUERY_COLOR: &str = "#e74c3c";
pub const DEFAULT_GROUP_COLOR: &str = "#95a5a6";
pub const GROUP_COLORS: &[(&str, &str)] = &[
    ("Application", "#3498db"),
    ("Routing", "#2ecc71"),
    ("Middleware", "#f39c12"),
    ("Database", "#e74c3c"),
    ("Views", "#9b59b6"),
    ("Translation", "#1abc9c"),
    ("Timers", "#34495e"),
];

// Request-input redaction
pub const REDACTION_MARKER: &str = "[HIDDEN]";
pub const SENSITIVE_TERMS: &[&str] = &[
    "password", "token", "secret", "key", "pass", "pwd", "auth", "csrf",
];

// Route keys that may reference executable handlers
pub const CALLBACK_KEYS: &[&str] = &["callback", "handler", "closure"];

/// Key under which the compact snapshot is injected into JSON responses
pub const ASYNC_RESPONSE_KEY: &str = "__debug_bar";

/// File name prefix for persisted snapshots
pub const SNAPSHOT_PREFIX: &str = "snapshot_";

/// Scope of the memory-threshold alert dedup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdScope {
    /// Each tier alerts once per process lifetime
    #[default]
    Process,
    /// Each tier alerts once per request
    Request,
}

/// Recognized collector options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugBarOptions {
    /// Master switch for data collection
    pub enabled: bool,

    /// Persist a snapshot of every finished request
    pub record: bool,

    /// Number of persisted snapshots to retain
    pub max_records: usize,

    /// Append the panel to non-JSON responses
    pub show_inline_panel: bool,

    /// Inject the compact snapshot into JSON object responses
    pub show_on_async_responses: bool,

    /// Directory used by the file snapshot store
    pub storage_dir: PathBuf,

    pub threshold_scope: ThresholdScope,
}

impl Default for DebugBarOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            record: false,
            max_records: 100,
            show_inline_panel: true,
            show_on_async_responses: true,
            storage_dir: PathBuf::from("storage/temp/debugbar"),
            threshold_scope: ThresholdScope::Process,
        }
    }
}

impl DebugBarOptions {
    /// Enable snapshot recording with the given retention
    pub fn with_recording(mut self, max_records: usize) -> Self {
        self.record = true;
        self.max_records = max_records;
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_threshold_scope(mut self, scope: ThresholdScope) -> Self {
        self.threshold_scope = scope;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.record && self.max_records == 0 {
            return Err(ConfigError::Invalid(
                "max_records must be greater than 0 when record is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load options from a TOML file
///
/// Missing keys fall back to their defaults.
///
/// # Errors
/// * `ConfigError::Io` - If file cannot be read
/// * `ConfigError::Parse` - If TOML is invalid
/// * `ConfigError::Invalid` - If values are inconsistent
///
/// # Example
/// ```ignore
/// let options = load_options("debugbar.toml")?;
/// ```
pub fn load_options(path: impl AsRef<Path>) -> Result<DebugBarOptions, ConfigError> {
    let contents = fs::read_to_string(path)?;
    parse_options(&contents)
}

/// Parse options from TOML text
pub fn parse_options(contents: &str) -> Result<DebugBarOptions, ConfigError> {
    let options: DebugBarOptions = toml::from_str(contents)?;
    options.validate()?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let options = parse_options("").unwrap();
        assert_eq!(options, DebugBarOptions::default());
        assert!(options.enabled);
        assert!(!options.record);
        assert_eq!(options.max_records, 100);
    }

    #[test]
    fn test_partial_toml() {
        let options = parse_options(
            r#"
            record = true
            max_records = 5
            threshold_scope = "request"
            "#,
        )
        .unwrap();

        assert!(options.record);
        assert_eq!(options.max_records, 5);
        assert_eq!(options.threshold_scope, ThresholdScope::Request);
        assert!(options.show_inline_panel);
    }

    #[test]
    fn test_zero_retention_rejected() {
        let result = parse_options("record = true\nmax_records = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let result = parse_options("record = maybe");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_options_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "show_inline_panel = false").unwrap();

        let options = load_options(file.path()).unwrap();
        assert!(!options.show_inline_panel);
    }
}
