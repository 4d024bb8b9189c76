//! Report schema definitions.
//!
//! This module defines the structure handed to the presentation layer and
//! written to snapshot storage. Every type is plain serde data.

use crate::collector::health::{Alert, HealthStatus};
use crate::collector::ledger::{LanguageFileEvent, QueryEvent, RenderEvent};
use crate::collector::log::EventLog;
use crate::collector::memory::MemoryHistoryEntry;
use crate::collector::queries::{DuplicateQuery, QueryTypeStats, SlowQuery};
use crate::collector::request::EnvironmentInfo;
use crate::collector::timeline::TimelineEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Full per-request report
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Local time the report was generated
    pub generated_at: String,
    pub performance: PerformanceSection,
    pub database: DatabaseSection,
    pub views: ViewsSection,
    pub translations: TranslationsSection,
    pub request: RequestSection,
    pub environment: EnvironmentInfo,
    pub logs: EventLog,
    pub timeline: Vec<TimelineEvent>,
    pub memory: MemorySection,
    pub timers: Vec<TimerView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSection {
    /// Milliseconds
    pub execution_time: f64,
    pub execution_time_seconds: f64,
    pub peak_memory: String,
    pub current_memory: String,
    pub memory_used: String,
    pub request_peak_memory: String,
    pub start_memory: String,
    pub peak_memory_bytes: u64,
    pub current_memory_bytes: u64,
    pub memory_used_bytes: u64,
    pub request_peak_memory_bytes: u64,
    pub start_memory_bytes: u64,
    pub runtime_version: String,
    /// Bytes; -1 when unlimited
    pub memory_limit: i64,
    pub memory_usage_percentage: f64,
    pub request_memory_percentage: f64,
    pub status: HealthStatus,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub query_count: usize,
    pub total_time: f64,
    pub average_time: f64,
    pub slowest_query_time: f64,
    pub fastest_query_time: f64,
    pub total_memory_impact: String,
    pub total_memory_impact_bytes: i64,
    pub queries_per_second: f64,
    pub db_time_percentage: f64,
    pub performance_score: u8,
    pub has_performance_issues: bool,
    pub query_types: Vec<QueryTypeStats>,
    pub duplicate_queries: Vec<DuplicateQuery>,
    pub slowest_queries: Vec<SlowQuery>,
    pub queries: Vec<QueryEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewsSection {
    pub rendered_count: usize,
    pub total_render_time: f64,
    pub average_render_time: f64,
    pub templates: Vec<RenderEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationsSection {
    pub loaded_files_count: usize,
    pub total_load_time: f64,
    pub average_load_time: f64,
    pub files: Vec<LanguageFileEvent>,
}

/// Request facts after redaction and callback stripping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSection {
    pub method: String,
    pub url: String,
    pub full_url: String,
    pub user_agent: String,
    pub ip: String,
    pub headers: Map<String, Value>,
    pub query: Map<String, Value>,
    pub post: Map<String, Value>,
    pub cookies: Map<String, Value>,
    pub session: Map<String, Value>,
    pub route: Map<String, Value>,
    pub middlewares: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySection {
    pub snapshots: Vec<MemoryHistoryEntry>,
    pub start_memory: String,
    pub peak_usage: String,
    pub current_usage: String,
    pub request_memory_used: String,
    pub request_peak_memory: String,
    pub memory_efficiency: f64,
    pub request_memory_bytes: u64,
    pub request_peak_memory_bytes: u64,
}

/// Timer as presented; times in milliseconds relative to request start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerView {
    pub name: String,
    pub duration: Option<f64>,
    pub memory_delta: Option<String>,
    pub start_time: f64,
    pub end_time: Option<f64>,
}

/// Small pre-formatted summary for JSON responses and listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactSnapshot {
    pub timestamp: String,
    pub execution_time: String,
    pub memory_used: String,
    pub peak_memory: String,
    pub memory_efficiency: f64,
    pub database: CompactDatabase,
    pub request_info: CompactRequest,
    pub alerts: Vec<Alert>,
    pub summary: CompactSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactDatabase {
    pub query_count: usize,
    pub total_time: String,
    pub average_time: String,
    pub slowest_time: String,
    pub fastest_time: String,
    pub db_time_percentage: f64,
    pub performance_score: u8,
    pub queries_per_second: f64,
    pub query_types: Vec<QueryTypeStats>,
    pub duplicate_queries: Vec<DuplicateQuery>,
    pub slowest_queries: Vec<SlowQuery>,
    pub has_performance_issues: bool,
    pub total_memory_impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactRequest {
    pub method: String,
    pub url: String,
    pub user_agent: String,
    pub ip: String,
    pub route: Map<String, Value>,
    pub middlewares: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactSummary {
    pub status: HealthStatus,
    pub memory_usage: String,
    pub memory_limit: String,
    pub total_queries: usize,
    pub runtime_version: String,
}

/// Persisted blob: `{time, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    #[serde(default)]
    pub version: String,
    /// Unix seconds
    pub time: i64,
    pub data: Value,
}
