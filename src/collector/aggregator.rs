//! Request aggregator: the root of the collector.
//!
//! One [`Aggregator`] lives for exactly one request. The host feeds it
//! lifecycle notifications (directly or through an
//! [`EventBus`](super::events::EventBus)) plus manual timer, log and memory
//! calls, then asks for a [`Report`] or [`CompactSnapshot`] at the end.
//! Reports are derived on demand from the raw ledgers and never modify them,
//! so they can be produced any number of times.

use super::events::{
    channel, decode_notification, LanguageFilePayload, LifecycleEvent, LifecycleObserver,
    QueryPayload, ViewPayload,
};
use super::health::{overall_score, overall_status, performance_alerts};
use super::ledger::{LanguageFileEvent, Ledger, QueryEvent, RenderEvent, Totals};
use super::log::{EventLog, Frame, LogEntry, LogLevel};
use super::memory::{
    memory_efficiency, memory_history, newly_crossed, MemorySnapshot, MemoryTracker,
    ProcessContext, ThresholdLedger,
};
use super::probe::{Probe, SystemProbe};
use super::queries::{analyze_queries, top_slow_queries, QueryAnalysis};
use super::request::{RequestDataProvider, StaticRequestData};
use super::timeline::build_timeline;
use super::timers::TimerRegistry;
use crate::output::panel::{PanelRenderer, TextPanel};
use crate::output::store::{record_snapshot, FileSnapshotStore, SnapshotStore};
use crate::report::format::{format_bytes, format_ms, round_to, truncate_with_ellipsis};
use crate::report::sanitize::{redact_map, strip_callbacks};
use crate::report::schema::{
    CompactDatabase, CompactRequest, CompactSnapshot, CompactSummary, DatabaseSection,
    MemorySection, PerformanceSection, Report, RequestSection, TimerView, TranslationsSection,
    ViewsSection,
};
use crate::utils::config::{
    DebugBarOptions, ThresholdScope, ASYNC_RESPONSE_KEY, DEFAULT_DUPLICATE_LIMIT,
    DEFAULT_SLOW_QUERY_LIMIT, MEMORY_GROUP, QUERY_PREVIEW_CHARS, SENSITIVE_TERMS,
};
use chrono::Local;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::panic::Location;
use std::sync::Arc;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// End-of-request readings, fixed once
#[derive(Debug, Clone, Copy, PartialEq)]
struct RequestEnd {
    time: f64,
    memory: u64,
    peak: u64,
}

/// Figures shared by the full report and the compact snapshot
struct Measurements {
    end: RequestEnd,
    execution_ms: f64,
    memory_used: u64,
    request_peak: u64,
    analysis: QueryAnalysis,
}

/// Configures and starts an [`Aggregator`]
///
/// Every collaborator has a default: the system probe, the process-wide
/// [`ProcessContext`], empty request facts, a file store under
/// `storage_dir` when recording is enabled, and the [`TextPanel`].
pub struct AggregatorBuilder {
    options: DebugBarOptions,
    probe: Option<Box<dyn Probe>>,
    process: Option<ProcessContext>,
    request_data: Option<Box<dyn RequestDataProvider>>,
    store: Option<Box<dyn SnapshotStore>>,
    panel: Option<Box<dyn PanelRenderer>>,
    started_at: Option<f64>,
}

impl AggregatorBuilder {
    pub fn probe(mut self, probe: impl Probe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    pub fn process_context(mut self, context: ProcessContext) -> Self {
        self.process = Some(context);
        self
    }

    pub fn request_data(mut self, provider: impl RequestDataProvider + 'static) -> Self {
        self.request_data = Some(Box::new(provider));
        self
    }

    pub fn snapshot_store(mut self, store: impl SnapshotStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn panel(mut self, panel: impl PanelRenderer + 'static) -> Self {
        self.panel = Some(Box::new(panel));
        self
    }

    /// Use a start time taken by the host before the collector existed
    pub fn started_at(mut self, epoch_seconds: f64) -> Self {
        self.started_at = Some(epoch_seconds);
        self
    }

    /// Take the start-of-request baseline and return the live aggregator
    pub fn begin(self) -> Aggregator {
        let probe = self.probe.unwrap_or_else(|| Box::new(SystemProbe::new()));

        let thresholds = match self.options.threshold_scope {
            ThresholdScope::Process => self
                .process
                .unwrap_or_else(ProcessContext::shared)
                .thresholds()
                .clone(),
            ThresholdScope::Request => Arc::new(ThresholdLedger::new()),
        };

        let store = match self.store {
            Some(store) => Some(store),
            None if self.options.record => {
                Some(Box::new(FileSnapshotStore::new(&self.options.storage_dir)) as Box<dyn SnapshotStore>)
            }
            None => None,
        };

        let start_time = self.started_at.unwrap_or_else(|| probe.now());
        let start_memory = probe.memory_usage();
        let peak_memory = probe.peak_memory_usage();

        let mut memory = MemoryTracker::new();
        memory.record(MemorySnapshot {
            key: "app_start".to_string(),
            usage: start_memory,
            peak: peak_memory,
            timestamp: start_time,
            label: "Application Start".to_string(),
        });

        debug!(
            "Collector started at {:.6} with {} baseline",
            start_time,
            format_bytes(start_memory as i64)
        );

        Aggregator {
            collecting: self.options.enabled,
            options: self.options,
            probe,
            thresholds,
            request_data: self
                .request_data
                .unwrap_or_else(|| Box::new(StaticRequestData::default())),
            store,
            panel: self.panel.unwrap_or_else(|| Box::new(TextPanel::new())),
            start_time,
            start_memory,
            current_memory: start_memory,
            peak_memory,
            end: None,
            terminated: false,
            timers: TimerRegistry::new(),
            memory,
            logs: EventLog::new(),
            queries: Ledger::new(),
            renders: Ledger::new(),
            language_files: Ledger::new(),
            route: Map::new(),
            middlewares: Vec::new(),
            recorded_key: None,
        }
    }
}

/// Request-scoped metrics collector
pub struct Aggregator {
    options: DebugBarOptions,
    probe: Box<dyn Probe>,
    thresholds: Arc<ThresholdLedger>,
    request_data: Box<dyn RequestDataProvider>,
    store: Option<Box<dyn SnapshotStore>>,
    panel: Box<dyn PanelRenderer>,
    collecting: bool,

    start_time: f64,
    start_memory: u64,
    current_memory: u64,
    peak_memory: u64,
    end: Option<RequestEnd>,
    terminated: bool,

    timers: TimerRegistry,
    memory: MemoryTracker,
    logs: EventLog,
    queries: Ledger<QueryEvent>,
    renders: Ledger<RenderEvent>,
    language_files: Ledger<LanguageFileEvent>,
    route: Map<String, Value>,
    middlewares: Vec<String>,
    recorded_key: Option<String>,
}

impl Aggregator {
    pub fn builder(options: DebugBarOptions) -> AggregatorBuilder {
        AggregatorBuilder {
            options,
            probe: None,
            process: None,
            request_data: None,
            store: None,
            panel: None,
            started_at: None,
        }
    }

    /// Start collecting with default collaborators
    pub fn begin(options: DebugBarOptions) -> Self {
        Self::builder(options).begin()
    }

    pub fn options(&self) -> &DebugBarOptions {
        &self.options
    }

    pub fn enable(&mut self) {
        self.collecting = true;
    }

    /// Turn every hook and manual call into a no-op
    pub fn disable(&mut self) {
        self.collecting = false;
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn start_memory(&self) -> u64 {
        self.start_memory
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn memory_snapshots(&self) -> &[MemorySnapshot] {
        self.memory.snapshots()
    }

    pub fn logs(&self) -> &EventLog {
        &self.logs
    }

    pub fn queries(&self) -> &[QueryEvent] {
        self.queries.as_slice()
    }

    pub fn renders(&self) -> &[RenderEvent] {
        self.renders.as_slice()
    }

    pub fn language_files(&self) -> &[LanguageFileEvent] {
        self.language_files.as_slice()
    }

    pub fn route(&self) -> &Map<String, Value> {
        &self.route
    }

    pub fn middlewares(&self) -> &[String] {
        &self.middlewares
    }

    /// Key of the snapshot persisted at termination, if any
    pub fn recorded_key(&self) -> Option<&str> {
        self.recorded_key.as_deref()
    }

    // ---- measurement primitives ---- //

    fn refresh_memory(&mut self) {
        self.current_memory = self.probe.memory_usage();
        self.peak_memory = self.probe.peak_memory_usage();
    }

    fn relative_ms(&self, timestamp: f64) -> f64 {
        (timestamp - self.start_time) * 1000.0
    }

    fn append_log(
        &mut self,
        message: String,
        context: Map<String, Value>,
        level: LogLevel,
        group: Option<&str>,
        call_chain: Vec<Frame>,
    ) {
        if !self.collecting {
            return;
        }

        let timestamp = self.probe.now();
        self.refresh_memory();

        let entry = LogEntry {
            message,
            context,
            level,
            timestamp,
            relative_time: self.relative_ms(timestamp),
            memory: self.current_memory,
            peak_memory: self.peak_memory,
            call_chain: Vec::new(),
        }
        .with_call_chain(call_chain);

        self.logs.append(entry, group);
    }

    /// Ungrouped warning for a failure the collector absorbed
    fn internal_warning(&mut self, message: &str, context: Map<String, Value>, source: &str) {
        self.append_log(
            message.to_string(),
            context,
            LogLevel::Warning,
            None,
            vec![Frame::notification(source)],
        );
    }

    /// Plain JSON for `value`; a value that cannot be serialized becomes
    /// `null` and leaves an internal warning
    fn plain_value<T: Serialize + ?Sized>(&mut self, value: &T, source: &str) -> Value {
        match serde_json::to_value(value) {
            Ok(plain) => plain,
            Err(e) => {
                warn!("Value could not be serialized: {}", e);
                let mut context = Map::new();
                context.insert("type".to_string(), json!(std::any::type_name::<T>()));
                context.insert("error".to_string(), json!(e.to_string()));
                self.internal_warning("Value could not be serialized", context, source);
                Value::Null
            }
        }
    }

    fn lifecycle_log(&mut self, event: &'static str, message: &str, group: &str, context: Map<String, Value>) {
        self.append_log(
            message.to_string(),
            context,
            LogLevel::Info,
            Some(group),
            vec![Frame::notification(event)],
        );
    }

    /// Record a snapshot from a fresh reading, then evaluate thresholds
    fn snapshot(&mut self, key: &str, label: &str) {
        self.refresh_memory();
        let timestamp = self.probe.now();

        self.memory.record(MemorySnapshot {
            key: key.to_string(),
            usage: self.current_memory,
            peak: self.peak_memory,
            timestamp,
            label: label.to_string(),
        });

        self.check_thresholds();
    }

    fn check_thresholds(&mut self) {
        let growth = self.current_memory as i64 - self.start_memory as i64;

        for crossing in newly_crossed(growth, &self.thresholds) {
            info!("Memory threshold crossed: {}MB", crossing.megabytes);

            self.memory.record(MemorySnapshot {
                key: crossing.key.clone(),
                usage: self.current_memory,
                peak: self.peak_memory,
                timestamp: self.probe.now(),
                label: format!("Memory Threshold: {}MB Used", crossing.megabytes),
            });

            let mut context = Map::new();
            context.insert("current_memory".to_string(), json!(format_bytes(self.current_memory as i64)));
            context.insert("growth_from_start".to_string(), json!(format_bytes(growth)));

            self.append_log(
                format!("Memory threshold crossed: {}MB", crossing.megabytes),
                context,
                LogLevel::Warning,
                Some(MEMORY_GROUP),
                Vec::new(),
            );
        }
    }

    // ---- manual API ---- //

    pub fn start_timer(&mut self, name: &str) {
        if !self.collecting {
            return;
        }
        self.timers.start(name, self.probe.as_ref());
    }

    /// Stop a timer, returning elapsed seconds (0.0 if it was not running)
    pub fn stop_timer(&mut self, name: &str) -> f64 {
        if !self.collecting {
            return 0.0;
        }
        self.timers.stop(name, self.probe.as_ref())
    }

    /// Stop a timer and log its duration under `Timing`
    #[track_caller]
    pub fn stop_timer_logged(&mut self, name: &str) -> f64 {
        if !self.collecting {
            return 0.0;
        }

        if !self.timers.get(name).is_some_and(|t| t.is_running()) {
            self.log(
                format!("Timer '{}' was never started", name),
                Map::new(),
                LogLevel::Warning,
                Some("Timing"),
            );
            return 0.0;
        }

        let seconds = self.stop_timer(name);
        let mut context = Map::new();
        context.insert("duration".to_string(), json!(format_ms(seconds * 1000.0, 2)));
        self.log(format!("{} completed", name), context, LogLevel::Info, Some("Timing"));
        seconds
    }

    /// Append a log entry; the caller's location becomes its call chain
    #[track_caller]
    pub fn log(
        &mut self,
        message: impl Into<String>,
        context: Map<String, Value>,
        level: LogLevel,
        group: Option<&str>,
    ) {
        let caller = Frame::from_location(Location::caller());
        self.append_log(message.into(), context, level, group, vec![caller]);
    }

    /// Snapshot memory under a unique `manual_*` key and log it under `Manual`
    #[track_caller]
    pub fn capture_memory(&mut self, label: &str) {
        if !self.collecting {
            return;
        }

        let key = format!("manual_{:.6}", self.probe.now());
        self.snapshot(&key, label);

        let mut context = Map::new();
        context.insert("current_memory".to_string(), json!(format_bytes(self.current_memory as i64)));
        context.insert("peak_memory".to_string(), json!(format_bytes(self.peak_memory as i64)));
        self.log(
            format!("Manual memory capture: {}", label),
            context,
            LogLevel::Info,
            Some("Manual"),
        );
    }

    /// Log current and peak usage in KB under `Memory`
    #[track_caller]
    pub fn log_memory(&mut self, label: &str) {
        if !self.collecting {
            return;
        }
        self.refresh_memory();

        let mut context = Map::new();
        context.insert("current".to_string(), json!(format!("{:.2} KB", self.current_memory as f64 / 1024.0)));
        context.insert("peak".to_string(), json!(format!("{:.2} KB", self.peak_memory as f64 / 1024.0)));
        self.log(label, context, LogLevel::Info, Some(MEMORY_GROUP));
    }

    /// Log a value with its JSON rendering under `Debug`
    #[track_caller]
    pub fn dump<T: Serialize + ?Sized>(&mut self, label: &str, value: &T) {
        if !self.collecting {
            return;
        }

        let plain = self.plain_value(value, "Debug");
        let pretty = serde_json::to_string_pretty(&plain).unwrap_or_default();

        let mut context = Map::new();
        context.insert("type".to_string(), json!(std::any::type_name::<T>()));
        context.insert("value".to_string(), plain);
        context.insert("json".to_string(), json!(pretty));
        self.log(label, context, LogLevel::Info, Some("Debug"));
    }

    /// Record an executed query
    ///
    /// The memory delta is measured against `memory_before` and is zero when
    /// the caller did not capture one.
    #[track_caller]
    pub fn record_query(&mut self, query: &str, bindings: Vec<Value>, time_ms: f64, memory_before: Option<u64>) {
        let caller = Frame::from_location(Location::caller());
        self.ingest_query(
            QueryPayload {
                query: query.to_string(),
                bindings,
                time: time_ms,
                memory_before,
            },
            caller,
        );
    }

    #[track_caller]
    pub fn record_render(&mut self, path: &str, time_ms: f64, memory_before: Option<u64>) {
        let caller = Frame::from_location(Location::caller());
        self.ingest_render(
            ViewPayload {
                path: path.to_string(),
                time: time_ms,
                memory_before,
            },
            caller,
        );
    }

    #[track_caller]
    pub fn record_language_file(&mut self, file: &str, load_time_ms: f64, memory_before: Option<u64>) {
        let caller = Frame::from_location(Location::caller());
        self.ingest_language_file(
            LanguageFilePayload {
                file: file.to_string(),
                load_time: load_time_ms,
                memory_before,
            },
            caller,
        );
    }

    /// Measure the delta against the caller's reading, or zero without one
    fn memory_delta_since(&self, memory_before: Option<u64>) -> i64 {
        let after = self.probe.memory_usage();
        after as i64 - memory_before.unwrap_or(after) as i64
    }

    fn ingest_query(&mut self, payload: QueryPayload, frame: Frame) {
        if !self.collecting {
            return;
        }

        let timestamp = self.probe.now();
        let memory_delta = self.memory_delta_since(payload.memory_before);

        let mut context = Map::new();
        context.insert(
            "query".to_string(),
            json!(truncate_with_ellipsis(&payload.query, QUERY_PREVIEW_CHARS)),
        );
        context.insert("bindings".to_string(), Value::Array(payload.bindings.clone()));
        context.insert("memory_impact".to_string(), json!(format_bytes(memory_delta)));

        let message = format!("Query executed in {}ms", round_to(payload.time, 3));
        self.queries.push(QueryEvent {
            query: payload.query,
            bindings: payload.bindings,
            time: payload.time,
            timestamp,
            memory_delta,
        });

        self.append_log(message, context, LogLevel::Info, Some("Database"), vec![frame]);
    }

    fn ingest_render(&mut self, payload: ViewPayload, frame: Frame) {
        if !self.collecting {
            return;
        }

        let timestamp = self.probe.now();
        let memory_delta = self.memory_delta_since(payload.memory_before);

        let mut context = Map::new();
        context.insert("template".to_string(), json!(payload.path));

        self.renders.push(RenderEvent {
            template: payload.path,
            render_time: payload.time,
            timestamp,
            memory_delta,
        });

        self.append_log("Template rendered".to_string(), context, LogLevel::Info, Some("Views"), vec![frame]);
    }

    fn ingest_language_file(&mut self, payload: LanguageFilePayload, frame: Frame) {
        if !self.collecting {
            return;
        }

        let timestamp = self.probe.now();
        let memory_delta = self.memory_delta_since(payload.memory_before);

        let mut context = Map::new();
        context.insert("file".to_string(), json!(payload.file));
        context.insert("load_time".to_string(), json!(payload.load_time));

        self.language_files.push(LanguageFileEvent {
            file: payload.file,
            load_time: payload.load_time,
            timestamp,
            memory_delta,
        });

        self.append_log(
            "Language file loaded".to_string(),
            context,
            LogLevel::Info,
            Some("Translation"),
            vec![frame],
        );
    }

    // ---- lifecycle ---- //

    /// Decode and handle a named notification
    pub fn notify(&mut self, name: &str, payload: &Value) {
        self.on_notification(name, payload);
    }

    fn handle_event(&mut self, event: &LifecycleEvent) {
        let ch = event.channel();

        match event {
            LifecycleEvent::Booting => {
                self.refresh_memory();
                self.start_timer("app_boot");
                self.lifecycle_log(ch, "Application booting", "Application", Map::new());
            }
            LifecycleEvent::Booted => {
                self.stop_timer("app_boot");
                self.start_timer("route_execution");
                self.start_timer("route_matching");
                self.snapshot("app_booted", "Application Booted");
                self.lifecycle_log(ch, "Application booted", "Application", Map::new());
            }
            LifecycleEvent::RouteMatched(route) => {
                self.route = route.clone();
                self.stop_timer("route_matching");
                self.start_timer("middleware_processing");
                self.snapshot("route_matched", "Route Matched");
                self.lifecycle_log(ch, "Route matched", "Routing", strip_callbacks(route));
            }
            LifecycleEvent::MiddlewareProcessed(ids) => {
                self.middlewares.extend(ids.iter().cloned());
                self.stop_timer("middleware_processing");
                self.start_timer("route_callback_processing");
                self.snapshot("middlewares_processed", "Middlewares Processed");

                let mut context = Map::new();
                context.insert("middlewares".to_string(), json!(ids));
                self.lifecycle_log(ch, "Middlewares processed", "Routing", context);
            }
            LifecycleEvent::RouteDispatched => {
                self.stop_timer("route_callback_processing");
                self.stop_timer("route_execution");
                self.snapshot("route_completed", "Route Execution Complete");
                self.lifecycle_log(ch, "Route execution completed", "Routing", Map::new());
            }
            LifecycleEvent::QueryExecuted(payload) => {
                self.ingest_query(payload.clone(), Frame::notification(ch));
            }
            LifecycleEvent::ViewRendered(payload) => {
                self.ingest_render(payload.clone(), Frame::notification(ch));
            }
            LifecycleEvent::LanguageFileLoaded(payload) => {
                self.ingest_language_file(payload.clone(), Frame::notification(ch));
            }
            LifecycleEvent::Terminated => self.handle_terminated(),
        }
    }

    fn handle_terminated(&mut self) {
        if self.terminated {
            debug!("Ignoring repeated termination");
            return;
        }
        self.terminated = true;

        self.end = Some(RequestEnd {
            time: self.probe.now(),
            memory: self.probe.memory_usage(),
            peak: self.probe.peak_memory_usage(),
        });

        self.lifecycle_log(channel::TERMINATED, "Application terminated", "Application", Map::new());
        self.snapshot("app_terminated", "Application Terminated");

        if self.options.record {
            self.persist();
        }
    }

    /// Write the sanitized report to the snapshot store
    ///
    /// Failures are absorbed: a `warn!` plus an internal log entry.
    fn persist(&mut self) {
        let Some(mut store) = self.store.take() else {
            warn!("Recording enabled but no snapshot store configured");
            return;
        };

        let report = self.finalize();
        let time = report_time(self.end.map_or(self.start_time, |e| e.time));

        let data = self.plain_value(&report, channel::TERMINATED);
        match record_snapshot(store.as_mut(), data, time, self.options.max_records) {
            Ok(key) => self.recorded_key = Some(key),
            Err(e) => {
                warn!("Failed to record request snapshot: {}", e);
                let mut context = Map::new();
                context.insert("error".to_string(), json!(e.to_string()));
                self.internal_warning("Failed to record request snapshot", context, channel::TERMINATED);
            }
        }

        self.store = Some(store);
    }

    /// Finish the request and merge instrumentation into the host's output
    ///
    /// JSON object bodies get the compact snapshot under `__debug_bar`;
    /// JSON arrays are returned untouched; anything else, JSON scalars
    /// included, gets the panel appended. Each merge honors its option
    /// switch.
    pub fn terminate(&mut self, output: &str) -> String {
        if !self.collecting {
            return output.to_string();
        }

        self.handle_terminated();

        match serde_json::from_str::<Value>(output) {
            Ok(Value::Object(mut body)) => {
                if !self.options.show_on_async_responses {
                    return output.to_string();
                }

                let snapshot = self.get_compact_snapshot();
                let compact = self.plain_value(&snapshot, channel::TERMINATED);
                body.insert(ASYNC_RESPONSE_KEY.to_string(), compact);

                match serde_json::to_string_pretty(&Value::Object(body)) {
                    Ok(merged) => merged,
                    Err(e) => {
                        warn!("Failed to merge snapshot into JSON response: {}", e);
                        output.to_string()
                    }
                }
            }
            Ok(Value::Array(_)) => output.to_string(),
            _ => {
                if !self.options.show_inline_panel {
                    return output.to_string();
                }
                let report = self.finalize();
                format!("{}{}", output, self.panel.render(&report))
            }
        }
    }

    // ---- reports ---- //

    /// End readings, taken now if the request has not terminated
    fn request_end(&mut self) -> RequestEnd {
        match self.end {
            Some(end) => end,
            None => {
                let end = RequestEnd {
                    time: self.probe.now(),
                    memory: self.probe.memory_usage(),
                    peak: self.probe.peak_memory_usage(),
                };
                self.end = Some(end);
                end
            }
        }
    }

    fn measure(&mut self) -> Measurements {
        let end = self.request_end();
        let execution_ms = self.relative_ms(end.time);

        Measurements {
            end,
            execution_ms,
            memory_used: end.memory.saturating_sub(self.start_memory),
            request_peak: end.peak.saturating_sub(self.start_memory),
            analysis: analyze_queries(self.queries.as_slice(), execution_ms),
        }
    }

    fn limit_percentage(&self, bytes: u64) -> f64 {
        match self.request_data.environment().memory_limit_bytes() {
            Some(limit) => round_to(bytes as f64 / limit as f64 * 100.0, 2),
            None => 0.0,
        }
    }

    fn exposed_route(&self) -> Map<String, Value> {
        redact_map(&strip_callbacks(&self.route), SENSITIVE_TERMS)
    }

    /// Build the full report
    ///
    /// Only fills unset end-of-request readings; ledgers are left untouched,
    /// so repeated calls agree.
    pub fn finalize(&mut self) -> Report {
        let m = self.measure();
        let analysis = &m.analysis;
        let request = self.request_data.request();
        let environment = self.request_data.environment();
        let execution_seconds = m.execution_ms / 1000.0;
        let total_query_time = analysis.total_time;

        let performance = PerformanceSection {
            execution_time: round_to(m.execution_ms, 3),
            execution_time_seconds: round_to(execution_seconds, 6),
            peak_memory: format_bytes(m.end.peak as i64),
            current_memory: format_bytes(m.end.memory as i64),
            memory_used: format_bytes(m.memory_used as i64),
            request_peak_memory: format_bytes(m.request_peak as i64),
            start_memory: format_bytes(self.start_memory as i64),
            peak_memory_bytes: m.end.peak,
            current_memory_bytes: m.end.memory,
            memory_used_bytes: m.memory_used,
            request_peak_memory_bytes: m.request_peak,
            start_memory_bytes: self.start_memory,
            runtime_version: environment.runtime_version.clone(),
            memory_limit: environment.memory_limit_bytes().map_or(-1, |b| b as i64),
            memory_usage_percentage: self.limit_percentage(m.end.memory),
            request_memory_percentage: self.limit_percentage(m.memory_used),
            status: overall_status(m.execution_ms, m.memory_used, analysis.score),
            score: round_to(overall_score(m.execution_ms, m.memory_used, analysis.score), 1),
        };

        let database = DatabaseSection {
            query_count: analysis.query_count,
            total_time: round_to(total_query_time, 3),
            average_time: round_to(analysis.average_time, 3),
            slowest_query_time: round_to(analysis.slowest_time, 3),
            fastest_query_time: round_to(analysis.fastest_time, 3),
            total_memory_impact: format_bytes(analysis.total_memory_impact),
            total_memory_impact_bytes: analysis.total_memory_impact,
            queries_per_second: if execution_seconds > 0.0 {
                round_to(analysis.query_count as f64 / execution_seconds, 2)
            } else {
                0.0
            },
            db_time_percentage: db_time_percentage(total_query_time, m.execution_ms),
            performance_score: analysis.score,
            has_performance_issues: analysis.has_performance_issues(),
            query_types: analysis.by_type.clone(),
            duplicate_queries: analysis.duplicates.iter().take(DEFAULT_DUPLICATE_LIMIT).cloned().collect(),
            slowest_queries: top_slow_queries(self.queries.as_slice(), DEFAULT_SLOW_QUERY_LIMIT),
            queries: self.queries.as_slice().to_vec(),
        };

        let render_totals = Totals::of(self.renders.iter().map(|r| r.render_time));
        let views = ViewsSection {
            rendered_count: render_totals.count,
            total_render_time: round_to(render_totals.total, 3),
            average_render_time: round_to(render_totals.average, 3),
            templates: self.renders.as_slice().to_vec(),
        };

        let load_totals = Totals::of(self.language_files.iter().map(|f| f.load_time));
        let translations = TranslationsSection {
            loaded_files_count: load_totals.count,
            total_load_time: round_to(load_totals.total, 2),
            average_load_time: round_to(load_totals.average, 2),
            files: self.language_files.as_slice().to_vec(),
        };

        let request_section = RequestSection {
            method: request.method.clone(),
            url: request.uri.clone(),
            full_url: request.full_url(),
            user_agent: request.user_agent_or_default(),
            ip: request.client_ip(),
            headers: redact_map(&request.headers, SENSITIVE_TERMS),
            query: redact_map(&request.query, SENSITIVE_TERMS),
            post: redact_map(&request.post, SENSITIVE_TERMS),
            cookies: redact_map(&request.cookies, SENSITIVE_TERMS),
            session: redact_map(&request.session, SENSITIVE_TERMS),
            route: self.exposed_route(),
            middlewares: self.middlewares.clone(),
        };

        let memory = MemorySection {
            snapshots: memory_history(self.memory.snapshots(), self.start_memory, self.start_time),
            start_memory: format_bytes(self.start_memory as i64),
            peak_usage: format_bytes(m.end.peak as i64),
            current_usage: format_bytes(m.end.memory as i64),
            request_memory_used: format_bytes(m.memory_used as i64),
            request_peak_memory: format_bytes(m.request_peak as i64),
            memory_efficiency: memory_efficiency(m.memory_used, m.request_peak),
            request_memory_bytes: m.memory_used,
            request_peak_memory_bytes: m.request_peak,
        };

        let timers = self
            .timers
            .iter()
            .map(|timer| TimerView {
                name: timer.name.clone(),
                duration: timer.duration.map(|d| round_to(d * 1000.0, 3)),
                memory_delta: timer.memory_delta.map(format_bytes),
                start_time: round_to(self.relative_ms(timer.start), 2),
                end_time: timer.end.map(|end| round_to(self.relative_ms(end), 2)),
            })
            .collect();

        Report {
            generated_at: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            performance,
            database,
            views,
            translations,
            request: request_section,
            environment,
            logs: self.logs.clone(),
            timeline: build_timeline(
                self.timers.iter(),
                self.logs.groups(),
                self.queries.as_slice(),
                self.start_time,
            ),
            memory,
            timers,
        }
    }

    pub fn get_report(&mut self) -> Report {
        self.finalize()
    }

    /// Pre-formatted summary for JSON responses
    pub fn get_compact_snapshot(&mut self) -> CompactSnapshot {
        let m = self.measure();
        let analysis = &m.analysis;
        let request = self.request_data.request();
        let environment = self.request_data.environment();
        let execution_seconds = m.execution_ms / 1000.0;

        let database = CompactDatabase {
            query_count: analysis.query_count,
            total_time: format_ms(analysis.total_time, 2),
            average_time: format_ms(analysis.average_time, 3),
            slowest_time: format_ms(analysis.slowest_time, 3),
            fastest_time: format_ms(analysis.fastest_time, 3),
            db_time_percentage: db_time_percentage(analysis.total_time, m.execution_ms),
            performance_score: analysis.score,
            queries_per_second: if execution_seconds > 0.0 {
                round_to(analysis.query_count as f64 / execution_seconds, 2)
            } else {
                0.0
            },
            query_types: analysis.by_type.clone(),
            duplicate_queries: analysis.duplicates.iter().take(DEFAULT_DUPLICATE_LIMIT).cloned().collect(),
            slowest_queries: top_slow_queries(self.queries.as_slice(), DEFAULT_SLOW_QUERY_LIMIT),
            has_performance_issues: analysis.has_performance_issues(),
            total_memory_impact: format_bytes(analysis.total_memory_impact),
        };

        CompactSnapshot {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            execution_time: format_ms(m.execution_ms, 2),
            memory_used: format_bytes(m.memory_used as i64),
            peak_memory: format_bytes(m.request_peak as i64),
            memory_efficiency: memory_efficiency(m.memory_used, m.request_peak),
            database,
            request_info: CompactRequest {
                method: request.method.clone(),
                url: request.uri.clone(),
                user_agent: request.user_agent_or_default(),
                ip: request.client_ip(),
                route: self.exposed_route(),
                middlewares: self.middlewares.clone(),
            },
            alerts: performance_alerts(
                m.execution_ms,
                m.memory_used,
                analysis.total_time,
                analysis.query_count,
            ),
            summary: CompactSummary {
                status: overall_status(m.execution_ms, m.memory_used, analysis.score),
                memory_usage: format!("{}%", self.limit_percentage(m.end.memory)),
                memory_limit: environment.memory_limit.clone(),
                total_queries: analysis.query_count,
                runtime_version: environment.runtime_version,
            },
        }
    }
}

impl LifecycleObserver for Aggregator {
    fn on_event(&mut self, event: &LifecycleEvent) {
        if !self.collecting {
            return;
        }
        self.handle_event(event);
    }

    fn on_notification(&mut self, name: &str, payload: &Value) {
        if !self.collecting {
            return;
        }

        let Some(decoded) = decode_notification(name, payload) else {
            return;
        };

        if !decoded.defaulted.is_empty() {
            let mut context = Map::new();
            context.insert("notification".to_string(), json!(name));
            context.insert("defaulted_fields".to_string(), json!(decoded.defaulted));
            self.internal_warning("Malformed notification payload", context, name);
        }

        self.handle_event(&decoded.event);
    }
}

fn db_time_percentage(total_query_time_ms: f64, execution_ms: f64) -> f64 {
    if execution_ms > 0.0 {
        round_to(total_query_time_ms / execution_ms * 100.0, 1)
    } else {
        0.0
    }
}

fn report_time(epoch_seconds: f64) -> i64 {
    epoch_seconds.floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::probe::ManualProbe;
    use crate::collector::request::{EnvironmentInfo, RequestInfo};
    use crate::output::store::InMemoryStore;
    use crate::report::schema::SnapshotEnvelope;
    use crate::utils::error::StoreError;
    use crate::utils::config::MIB;

    fn start(probe: &ManualProbe, options: DebugBarOptions) -> Aggregator {
        Aggregator::builder(options)
            .probe(probe.clone())
            .process_context(ProcessContext::new())
            .begin()
    }

    #[test]
    fn test_begin_records_baseline() {
        let probe = ManualProbe::new(1000.0, 4 * MIB);
        let agg = start(&probe, DebugBarOptions::default());

        assert_eq!(agg.start_time(), 1000.0);
        assert_eq!(agg.memory_snapshots().len(), 1);
        assert_eq!(agg.memory_snapshots()[0].key, "app_start");
        assert_eq!(agg.memory_snapshots()[0].label, "Application Start");
    }

    #[test]
    fn test_started_at_override() {
        let probe = ManualProbe::new(1000.0, 0);
        let agg = Aggregator::builder(DebugBarOptions::default())
            .probe(probe)
            .process_context(ProcessContext::new())
            .started_at(999.5)
            .begin();
        assert_eq!(agg.start_time(), 999.5);
    }

    #[test]
    fn test_lifecycle_timers_and_groups() {
        let probe = ManualProbe::new(0.0, MIB);
        let mut agg = start(&probe, DebugBarOptions::default());

        agg.on_event(&LifecycleEvent::Booting);
        probe.advance_ms(10.0);
        agg.on_event(&LifecycleEvent::Booted);
        probe.advance_ms(2.0);
        let mut route = Map::new();
        route.insert("path".to_string(), json!("/users"));
        route.insert("callback".to_string(), json!("UserController@index"));
        agg.on_event(&LifecycleEvent::RouteMatched(route));
        probe.advance_ms(3.0);
        agg.on_event(&LifecycleEvent::MiddlewareProcessed(vec!["auth".to_string()]));
        probe.advance_ms(20.0);
        agg.on_event(&LifecycleEvent::RouteDispatched);

        let boot = agg.timers().get("app_boot").unwrap();
        assert!((boot.duration.unwrap() - 0.010).abs() < 1e-9);
        let execution = agg.timers().get("route_execution").unwrap();
        assert!((execution.duration.unwrap() - 0.025).abs() < 1e-9);
        assert!(agg.timers().iter().all(|t| !t.is_running()));

        let routing = agg.logs().group("Routing").unwrap();
        assert_eq!(routing.entries.len(), 3);
        assert!(routing.entries[0].context.get("callback").is_none());
        assert_eq!(routing.entries[0].call_chain[0].function.as_deref(), Some(channel::ROUTE_MATCHED));

        let keys: Vec<_> = agg.memory_snapshots().iter().map(|s| s.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["app_start", "app_booted", "route_matched", "middlewares_processed", "route_completed"]
        );
        assert_eq!(agg.middlewares().to_vec(), vec!["auth".to_string()]);
    }

    #[test]
    fn test_query_memory_delta_policy() {
        let probe = ManualProbe::new(0.0, 10 * MIB);
        let mut agg = start(&probe, DebugBarOptions::default());

        agg.record_query("SELECT 1", vec![], 1.0, None);
        agg.record_query("SELECT 2", vec![], 1.0, Some(9 * MIB));

        assert_eq!(agg.queries()[0].memory_delta, 0);
        assert_eq!(agg.queries()[1].memory_delta, MIB as i64);

        let db = agg.logs().group("Database").unwrap();
        assert_eq!(db.entries[1].message, "Query executed in 1ms");
        assert_eq!(db.entries[1].context["memory_impact"], "1 MB");
        assert!(db.entries[0].call_chain[0].file.ends_with("aggregator.rs"));
    }

    #[test]
    fn test_malformed_notification_defaults_and_warns() {
        let probe = ManualProbe::new(0.0, 0);
        let mut agg = start(&probe, DebugBarOptions::default());

        agg.notify(channel::VIEW_RENDERED, &json!({"time": 4}));

        assert_eq!(agg.renders().len(), 1);
        assert_eq!(agg.renders()[0].template, "");
        assert_eq!(agg.renders()[0].render_time, 4.0);

        let warnings = agg.logs().ungrouped();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, LogLevel::Warning);
        assert_eq!(warnings[0].context["defaulted_fields"], json!(["path"]));
    }

    #[test]
    fn test_disabled_collector_is_inert() {
        let probe = ManualProbe::new(0.0, 0);
        let mut agg = start(&probe, DebugBarOptions::default());
        agg.disable();

        agg.start_timer("t");
        assert_eq!(agg.stop_timer("t"), 0.0);
        agg.log("ignored", Map::new(), LogLevel::Info, None);
        agg.notify(channel::QUERY_EXECUTED, &json!({"query": "SELECT 1", "time": 1}));
        agg.capture_memory("x");
        assert_eq!(agg.terminate("<html></html>"), "<html></html>");

        assert!(agg.timers().is_empty());
        assert!(agg.logs().is_empty());
        assert!(agg.queries().is_empty());
        assert_eq!(agg.memory_snapshots().len(), 1);

        agg.enable();
        agg.start_timer("t");
        assert!(agg.is_collecting());
        assert_eq!(agg.timers().len(), 1);
    }

    #[test]
    fn test_stop_timer_logged() {
        let probe = ManualProbe::new(0.0, 0);
        let mut agg = start(&probe, DebugBarOptions::default());

        assert_eq!(agg.stop_timer_logged("missing"), 0.0);
        agg.start_timer("work");
        probe.advance_ms(12.3);
        agg.stop_timer_logged("work");

        let timing = agg.logs().group("Timing").unwrap();
        assert_eq!(timing.entries[0].message, "Timer 'missing' was never started");
        assert_eq!(timing.entries[0].level, LogLevel::Warning);
        assert_eq!(timing.entries[1].message, "work completed");
        assert_eq!(timing.entries[1].context["duration"], "12.3ms");
    }

    #[test]
    fn test_manual_helpers() {
        let probe = ManualProbe::new(5.0, 2048);
        let mut agg = start(&probe, DebugBarOptions::default());

        agg.capture_memory("after load");
        agg.log_memory("checkpoint");
        agg.dump("payload", &json!({"id": 7}));

        assert!(agg.memory_snapshots().iter().any(|s| s.key.starts_with("manual_") && s.label == "after load"));
        let manual = agg.logs().group("Manual").unwrap();
        assert_eq!(manual.entries[0].message, "Manual memory capture: after load");

        let memory = agg.logs().group(MEMORY_GROUP).unwrap();
        assert_eq!(memory.entries[0].context["current"], "2.00 KB");

        let debug = agg.logs().group("Debug").unwrap();
        assert_eq!(debug.entries[0].context["value"], json!({"id": 7}));
        assert!(debug.entries[0].context["json"].as_str().unwrap().contains("\"id\": 7"));
    }

    #[test]
    fn test_request_scope_thresholds_refire() {
        let options = DebugBarOptions::default().with_threshold_scope(ThresholdScope::Request);
        let context = ProcessContext::new();

        for _ in 0..2 {
            let probe = ManualProbe::new(0.0, 10 * MIB);
            let mut agg = Aggregator::builder(options.clone())
                .probe(probe.clone())
                .process_context(context.clone())
                .begin();
            probe.set_memory(16 * MIB);
            agg.capture_memory("grown");
            assert!(agg.memory_snapshots().iter().any(|s| s.key == "threshold_5mb"));
        }
        assert!(context.thresholds().crossed().is_empty());
    }

    #[test]
    fn test_terminate_fixes_end_readings() {
        let probe = ManualProbe::new(0.0, MIB);
        let mut agg = start(&probe, DebugBarOptions::default());

        probe.advance_ms(40.0);
        agg.on_event(&LifecycleEvent::Terminated);
        probe.advance_ms(500.0);
        probe.set_memory(30 * MIB);

        let report = agg.finalize();
        assert_eq!(report.performance.execution_time, 40.0);
        assert_eq!(report.performance.memory_used_bytes, 0);
        assert!(agg.memory_snapshots().iter().any(|s| s.key == "app_terminated"));
    }

    #[test]
    fn test_record_persists_through_store() {
        let probe = ManualProbe::new(1_700_000_000.0, MIB);
        let store = InMemoryStore::new();
        let mut agg = Aggregator::builder(DebugBarOptions::default().with_recording(5))
            .probe(probe.clone())
            .process_context(ProcessContext::new())
            .snapshot_store(store.clone())
            .request_data(StaticRequestData::new(
                RequestInfo {
                    method: "GET".to_string(),
                    uri: "/health".to_string(),
                    ..Default::default()
                },
                EnvironmentInfo::default(),
            ))
            .begin();

        agg.on_event(&LifecycleEvent::Terminated);

        let key = agg.recorded_key().unwrap().to_string();
        let envelope = store.get(&key).unwrap();
        assert_eq!(envelope.time, 1_700_000_000);
        assert_eq!(envelope.data["request"]["url"], "/health");
    }

    #[test]
    fn test_unserializable_dump_leaves_warning() {
        let probe = ManualProbe::new(0.0, MIB);
        let mut agg = start(&probe, DebugBarOptions::default());

        let mut grid = std::collections::HashMap::new();
        grid.insert((1, 2), "x");
        agg.dump("grid", &grid);

        let debug = agg.logs().group("Debug").unwrap();
        assert_eq!(debug.entries[0].context["value"], Value::Null);

        let warnings = agg.logs().ungrouped();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "Value could not be serialized");
        assert_eq!(warnings[0].level, LogLevel::Warning);
    }

    #[test]
    fn test_json_scalar_body_gets_panel() {
        for body in ["42", "true", "null", "\"ok\""] {
            let probe = ManualProbe::new(0.0, MIB);
            let mut agg = start(&probe, DebugBarOptions::default());

            let out = agg.terminate(body);
            assert!(out.starts_with(body));
            assert!(out.contains("<div id=\"debugbar\">"));
            assert!(!out.contains(ASYNC_RESPONSE_KEY));
        }
    }

    #[test]
    fn test_record_keeps_newest_with_single_slot() {
        let store = InMemoryStore::new();

        for _ in 0..40 {
            let probe = ManualProbe::new(1_700_000_000.0, MIB);
            let mut agg = Aggregator::builder(DebugBarOptions::default().with_recording(1))
                .probe(probe)
                .process_context(ProcessContext::new())
                .snapshot_store(store.clone())
                .begin();
            agg.on_event(&LifecycleEvent::Terminated);

            let key = agg.recorded_key().unwrap().to_string();
            assert!(store.get(&key).is_ok());
            assert_eq!(store.keys().unwrap(), vec![key]);
        }
    }

    struct FailingStore;

    impl SnapshotStore for FailingStore {
        fn put(&mut self, _: &str, _: &SnapshotEnvelope) -> Result<(), StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
        fn get(&self, key: &str) -> Result<SnapshotEnvelope, StoreError> {
            Err(StoreError::NotFound(key.to_string()))
        }
        fn keys(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            Err(StoreError::NotFound(key.to_string()))
        }
    }

    #[test]
    fn test_persistence_failure_is_absorbed() {
        let probe = ManualProbe::new(0.0, 0);
        let mut agg = Aggregator::builder(DebugBarOptions::default().with_recording(5))
            .probe(probe)
            .process_context(ProcessContext::new())
            .snapshot_store(FailingStore)
            .begin();

        let out = agg.terminate("{\"ok\":true}");
        assert!(out.contains("__debug_bar"));
        assert!(agg.recorded_key().is_none());

        let warning = &agg.logs().ungrouped()[0];
        assert_eq!(warning.message, "Failed to record request snapshot");
        assert_eq!(warning.level, LogLevel::Warning);
    }
}
