//! Event Log: timestamped messages, optionally grouped.
//!
//! Ungrouped entries live in one ordered sequence; grouped entries live under
//! their group name. Groups keep creation order and are never removed, and
//! entries inside a group stay chronological because they are appended at
//! observation time.

use crate::utils::config::MAX_CALL_CHAIN;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::panic::Location;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    /// Lenient parse; anything unrecognized is `Info`
    pub fn parse(level: &str) -> Self {
        match level.trim().to_ascii_lowercase().as_str() {
            "warning" | "warn" => LogLevel::Warning,
            "error" => LogLevel::Error,
            "success" => LogLevel::Success,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame of the call chain attached to a log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

impl Frame {
    pub fn from_location(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
            function: None,
        }
    }

    /// Synthetic frame naming the lifecycle notification being handled
    pub fn notification(channel: &str) -> Self {
        Self {
            file: "<notification>".to_string(),
            line: 0,
            function: Some(channel.to_string()),
        }
    }
}

/// A single log message with its measurement context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    pub context: Map<String, Value>,
    pub level: LogLevel,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Milliseconds since request start
    pub relative_time: f64,
    pub memory: u64,
    pub peak_memory: u64,
    pub call_chain: Vec<Frame>,
}

impl LogEntry {
    /// Bound the call chain to the newest `MAX_CALL_CHAIN` frames
    pub fn with_call_chain(mut self, mut frames: Vec<Frame>) -> Self {
        frames.truncate(MAX_CALL_CHAIN);
        self.call_chain = frames;
        self
    }
}

/// Named group of log entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogGroup {
    pub name: String,
    pub entries: Vec<LogEntry>,
}

/// Append-only log for one request
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Vec<LogEntry>,
    groups: Vec<LogGroup>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, creating the group on first use
    pub fn append(&mut self, entry: LogEntry, group: Option<&str>) {
        let Some(name) = group else {
            self.entries.push(entry);
            return;
        };

        match self.groups.iter_mut().find(|g| g.name == name) {
            Some(existing) => existing.entries.push(entry),
            None => self.groups.push(LogGroup {
                name: name.to_string(),
                entries: vec![entry],
            }),
        }
    }

    pub fn ungrouped(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Groups in creation order
    pub fn groups(&self) -> &[LogGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&LogGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Total number of entries, grouped and ungrouped
    pub fn len(&self) -> usize {
        self.entries.len() + self.groups.iter().map(|g| g.entries.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_level(&self, level: LogLevel) -> usize {
        self.entries
            .iter()
            .chain(self.groups.iter().flat_map(|g| g.entries.iter()))
            .filter(|e| e.level == level)
            .count()
    }
}

struct GroupsView<'a>(&'a [LogGroup]);

impl Serialize for GroupsView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for group in self.0 {
            map.serialize_entry(&group.name, &group.entries)?;
        }
        map.end()
    }
}

/// Serialized as `{"entries": [...], "groups": {"<name>": [...]}}`
impl Serialize for EventLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("EventLog", 2)?;
        state.serialize_field("entries", &self.entries)?;
        state.serialize_field("groups", &GroupsView(&self.groups))?;
        state.end()
    }
}
