//! Replay command implementation.
//!
//! The replay command:
//! 1. Loads a JSON script of timestamped steps
//! 2. Drives an aggregator with a manual probe, one step at a time
//! 3. Terminates the request and writes the report
//! 4. Optionally prints a summary

use crate::collector::events::channel;
use crate::collector::{
    Aggregator, EnvironmentInfo, EventBus, LifecycleEvent, LifecycleObserver, LogLevel,
    ManualProbe, ProcessContext, RequestInfo, StaticRequestData,
};
use crate::output::write_report;
use crate::report::format::{format_bytes, format_ms};
use crate::utils::config::{load_options, DebugBarOptions};
use crate::utils::error::ReplayError;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// A recorded request, replayable offline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayScript {
    /// Request start, Unix seconds
    pub start: f64,

    /// Memory usage at request start, bytes
    pub memory: u64,

    pub request: RequestInfo,
    pub environment: EnvironmentInfo,

    /// Response body handed to termination
    pub body: Option<String>,

    pub steps: Vec<ReplayStep>,
}

/// One step: a lifecycle notification or a manual API call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStep {
    /// Milliseconds after `start`
    #[serde(default)]
    pub at_ms: f64,

    /// Memory usage to report from this step on
    #[serde(default)]
    pub memory: Option<u64>,

    /// Channel name, or one of `timer.start`, `timer.stop`, `log`, `memory.capture`
    pub event: String,

    #[serde(default)]
    pub payload: Value,
}

/// Counts of lifecycle events seen during a replay
#[derive(Debug, Clone, Default)]
pub struct NotificationTally {
    counts: BTreeMap<&'static str, usize>,
}

impl NotificationTally {
    pub fn count(&self, channel: &str) -> usize {
        self.counts.get(channel).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.counts.iter().map(|(name, count)| (*name, *count))
    }
}

impl LifecycleObserver for NotificationTally {
    fn on_event(&mut self, event: &LifecycleEvent) {
        *self.counts.entry(event.channel()).or_insert(0) += 1;
    }
}

/// Result of running a script
pub struct ReplayOutcome {
    pub aggregator: Aggregator,
    pub tally: NotificationTally,
    /// Termination output with instrumentation merged in
    pub output: String,
}

/// Arguments for the replay command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct ReplayArgs {
    /// Path to the JSON script
    pub script: PathBuf,

    /// Optional options TOML
    pub config: Option<PathBuf>,

    /// Output path for the report
    pub output: PathBuf,

    /// Write the compact snapshot instead of the full report
    pub compact: bool,

    /// Print text summary to stdout
    pub print_summary: bool,
}

impl Default for ReplayArgs {
    fn default() -> Self {
        Self {
            script: PathBuf::from("request.json"),
            config: None,
            output: PathBuf::from("report.json"),
            compact: false,
            print_summary: false,
        }
    }
}

/// Load a replay script
///
/// # Errors
/// * `ReplayError::Io` - File cannot be read
/// * `ReplayError::Json` - Script is not valid JSON
pub fn load_script(path: impl AsRef<Path>) -> Result<ReplayScript, ReplayError> {
    let path = path.as_ref();
    debug!("Loading replay script: {}", path.display());

    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn text_field<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(Value::as_str)
}

/// Drive a fresh aggregator through every step, then terminate it
///
/// # Errors
/// * `ReplayError::UnknownStep` - A step names neither a channel nor a manual call
pub fn run_script(
    script: &ReplayScript,
    options: DebugBarOptions,
    context: ProcessContext,
) -> Result<ReplayOutcome, ReplayError> {
    let probe = ManualProbe::new(script.start, script.memory);
    let mut aggregator = Aggregator::builder(options)
        .probe(probe.clone())
        .process_context(context)
        .request_data(StaticRequestData::new(
            script.request.clone(),
            script.environment.clone(),
        ))
        .begin();
    let mut tally = NotificationTally::default();

    for (index, step) in script.steps.iter().enumerate() {
        probe.set_now(script.start + step.at_ms / 1000.0);
        if let Some(bytes) = step.memory {
            probe.set_memory(bytes);
        }

        debug!("Step {}: {} at {}ms", index + 1, step.event, step.at_ms);

        let event = step.event.as_str();
        if channel::ALL.contains(&event) {
            let mut bus = EventBus::new();
            bus.subscribe(&mut aggregator);
            bus.subscribe(&mut tally);
            bus.publish_named(event, &step.payload);
            continue;
        }

        match event {
            "timer.start" => {
                aggregator.start_timer(text_field(&step.payload, "name").unwrap_or("timer"));
            }
            "timer.stop" => {
                aggregator.stop_timer_logged(text_field(&step.payload, "name").unwrap_or("timer"));
            }
            "log" => {
                let context = step
                    .payload
                    .get("context")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_else(Map::new);
                aggregator.log(
                    text_field(&step.payload, "message").unwrap_or(""),
                    context,
                    LogLevel::parse(text_field(&step.payload, "level").unwrap_or("info")),
                    text_field(&step.payload, "group"),
                );
            }
            "memory.capture" => {
                aggregator.capture_memory(text_field(&step.payload, "label").unwrap_or("Manual Capture"));
            }
            other => return Err(ReplayError::UnknownStep(other.to_string())),
        }
    }

    let output = aggregator.terminate(script.body.as_deref().unwrap_or(""));

    Ok(ReplayOutcome {
        aggregator,
        tally,
        output,
    })
}

/// Execute the replay command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Script or options file unreadable
/// * Unknown script steps
/// * Report write errors
pub fn execute_replay(args: ReplayArgs) -> Result<()> {
    let start_time = Instant::now();

    info!("Replaying script: {}", args.script.display());

    let options = match &args.config {
        Some(path) => load_options(path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => DebugBarOptions::default(),
    };

    let script = load_script(&args.script).context("Failed to load replay script")?;
    info!("Loaded {} step(s)", script.steps.len());

    let mut outcome =
        run_script(&script, options, ProcessContext::new()).context("Failed to replay script")?;

    if args.compact {
        let snapshot = outcome.aggregator.get_compact_snapshot();
        write_report(&snapshot, &args.output, true).context("Failed to write compact snapshot")?;
    } else {
        let report = outcome.aggregator.finalize();
        write_report(&report, &args.output, true).context("Failed to write report")?;
    }

    info!("✓ Report written to: {}", args.output.display());

    if let Some(key) = outcome.aggregator.recorded_key() {
        info!("✓ Snapshot recorded as: {}", key);
    }

    if args.print_summary {
        print_summary(&mut outcome);
    }

    info!("Replay completed in {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}

fn print_summary(outcome: &mut ReplayOutcome) {
    let report = outcome.aggregator.finalize();
    let alerts = outcome.aggregator.get_compact_snapshot().alerts;

    println!("\n{}", "=".repeat(80));
    println!("REQUEST SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Request:     {} {}", report.request.method, report.request.url);
    println!("Execution:   {}", format_ms(report.performance.execution_time, 2));
    println!(
        "Memory:      {} used, {} request peak",
        report.performance.memory_used, report.performance.request_peak_memory
    );
    println!(
        "Queries:     {} in {} (score {})",
        report.database.query_count,
        format_ms(report.database.total_time, 2),
        report.database.performance_score
    );
    println!("Status:      {} ({})", report.performance.status, report.performance.score);

    println!("\nNotifications:");
    for (name, count) in outcome.tally.iter() {
        println!("  {:<24} {}", name, count);
    }

    if !report.timers.is_empty() {
        println!("\nTimers:");
        for timer in &report.timers {
            let duration = timer
                .duration
                .map(|d| format_ms(d, 2))
                .unwrap_or_else(|| "running".to_string());
            println!("  {:<28} {}", timer.name, duration);
        }
    }

    if !report.memory.snapshots.is_empty() {
        println!("\nMemory:");
        for snapshot in &report.memory.snapshots {
            println!(
                "  {:<32} {:>10} ({} from start)",
                snapshot.label,
                snapshot.usage_formatted,
                format_bytes(snapshot.delta_from_start)
            );
        }
    }

    if !alerts.is_empty() {
        println!("\nAlerts:");
        for alert in &alerts {
            println!("  [{:?}] {} - {}", alert.kind, alert.message, alert.suggestion);
        }
    }

    println!("{}", "=".repeat(80));
}

/// Validate replay arguments before execution
///
/// **Public** - called by main.rs before execute_replay
pub fn validate_args(args: &ReplayArgs) -> Result<()> {
    if !args.script.exists() {
        anyhow::bail!("Script not found: {}", args.script.display());
    }

    if args.output.as_os_str().is_empty() {
        anyhow::bail!("Output path cannot be empty");
    }

    if let Some(config) = &args.config {
        if !config.exists() {
            anyhow::bail!("Options file not found: {}", config.display());
        }
    }

    Ok(())
}
