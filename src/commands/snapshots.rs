//! Commands over recorded request snapshots.

use crate::output::{list_snapshots, load_snapshot, FileSnapshotStore, SnapshotSummary};
use crate::report::format::{format_ms, truncate_with_ellipsis};
use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use log::info;
use std::path::Path;

const URL_COLUMN_CHARS: usize = 40;

/// Print a table of stored snapshots, newest first
///
/// **Public** - main entry point called from main.rs
///
/// # Arguments
/// * `dir` - Snapshot storage directory
/// * `limit` - Show at most this many rows
pub fn execute_list(dir: &Path, limit: Option<usize>) -> Result<()> {
    let store = FileSnapshotStore::new(dir);
    let mut summaries = list_snapshots(&store)
        .with_context(|| format!("Failed to list snapshots in {}", dir.display()))?;

    if summaries.is_empty() {
        println!("No recorded snapshots in {}", dir.display());
        return Ok(());
    }

    let total = summaries.len();
    if let Some(limit) = limit {
        summaries.truncate(limit);
    }

    println!(
        "{:<36} {:<19} {:<7} {:<40} {:>12} {:>10} {:>7}",
        "KEY", "TIME", "METHOD", "URL", "EXECUTION", "MEMORY", "QUERIES"
    );
    println!("{}", "-".repeat(137));
    for summary in &summaries {
        println!("{}", format_row(summary));
    }

    info!("Showing {} of {} snapshot(s)", summaries.len(), total);

    Ok(())
}

/// Print one stored snapshot as pretty JSON
///
/// **Public** - main entry point called from main.rs
///
/// # Arguments
/// * `dir` - Snapshot storage directory
/// * `key` - Snapshot key, with or without the `.json` extension
pub fn execute_show(dir: &Path, key: &str) -> Result<()> {
    let store = FileSnapshotStore::new(dir);
    let envelope = load_snapshot(&store, key).with_context(|| format!("Failed to load snapshot {}", key))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&envelope).context("Failed to format snapshot")?
    );

    Ok(())
}

fn format_time(epoch_seconds: i64) -> String {
    Local
        .timestamp_opt(epoch_seconds, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_seconds.to_string())
}

fn format_row(summary: &SnapshotSummary) -> String {
    format!(
        "{:<36} {:<19} {:<7} {:<40} {:>12} {:>10} {:>7}",
        summary.key,
        format_time(summary.time),
        summary.method,
        truncate_with_ellipsis(&summary.url, URL_COLUMN_CHARS - 3),
        format_ms(summary.execution_time, 2),
        summary.memory_used,
        summary.query_count
    )
}
