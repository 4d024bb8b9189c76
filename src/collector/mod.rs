//! Request-scoped collection of timers, memory, queries and renders.
//!
//! This module holds the collector itself:
//! - Leaf recorders (probe, event log, timers, memory snapshots, ledgers)
//! - Derived analysis (query statistics, timeline, health and alerts)
//! - The [`Aggregator`] that owns one request's state and builds reports

pub mod aggregator;
pub mod events;
pub mod health;
pub mod ledger;
pub mod log;
pub mod memory;
pub mod probe;
pub mod queries;
pub mod request;
pub mod timeline;
pub mod timers;

// Re-export main types
pub use aggregator::{Aggregator, AggregatorBuilder};
pub use events::{channel, decode_notification, EventBus, LifecycleEvent, LifecycleObserver};
pub use health::{Alert, HealthStatus};
pub use ledger::{LanguageFileEvent, QueryEvent, RenderEvent};
pub use self::log::{EventLog, LogEntry, LogLevel};
pub use memory::{MemorySnapshot, ProcessContext, ThresholdLedger};
pub use probe::{ManualProbe, Probe, SystemProbe};
pub use request::{EnvironmentInfo, RequestDataProvider, RequestInfo, StaticRequestData};
