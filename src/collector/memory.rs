//! Memory Snapshot Tracker and threshold-crossing detection.
//!
//! Snapshots are keyed; recording an existing key overwrites it in place.
//! Threshold tiers are deduplicated through a [`ThresholdLedger`], which is
//! normally shared process-wide through a [`ProcessContext`] so a long-lived
//! worker alerts on each growth tier once, not on every request.

use crate::report::format::{format_bytes, round_to};
use crate::utils::config::{MEMORY_THRESHOLDS_MB, MIB};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Labeled point-in-time memory capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub key: String,
    pub usage: u64,
    pub peak: u64,
    pub timestamp: f64,
    pub label: String,
}

/// Keyed snapshots in first-recorded order
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    snapshots: Vec<MemorySnapshot>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot, replacing any previous one with the same key
    pub fn record(&mut self, snapshot: MemorySnapshot) {
        match self.snapshots.iter_mut().find(|s| s.key == snapshot.key) {
            Some(existing) => *existing = snapshot,
            None => self.snapshots.push(snapshot),
        }
    }

    pub fn get(&self, key: &str) -> Option<&MemorySnapshot> {
        self.snapshots.iter().find(|s| s.key == key)
    }

    pub fn snapshots(&self) -> &[MemorySnapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Set of threshold keys that have already alerted
///
/// Safe to share across concurrently handled requests.
#[derive(Debug, Default)]
pub struct ThresholdLedger {
    crossed: Mutex<HashSet<String>>,
}

impl ThresholdLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // poisoning is ignored; the set is always consistent
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.crossed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Mark a key as crossed; true only for the first caller
    pub fn try_mark(&self, key: &str) -> bool {
        self.lock().insert(key.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    /// Crossed keys, sorted
    pub fn crossed(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().iter().cloned().collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// State that outlives individual requests
///
/// Construct once per process and hand a clone to every request's
/// aggregator.
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    thresholds: Arc<ThresholdLedger>,
}

impl ProcessContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context shared by every aggregator built without an explicit one
    pub fn shared() -> Self {
        static SHARED: OnceLock<ProcessContext> = OnceLock::new();
        SHARED.get_or_init(ProcessContext::new).clone()
    }

    pub fn thresholds(&self) -> &Arc<ThresholdLedger> {
        &self.thresholds
    }
}

/// A threshold tier crossed for the first time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdCrossing {
    pub key: String,
    pub megabytes: u64,
}

pub fn threshold_key(megabytes: u64) -> String {
    format!("threshold_{}mb", megabytes)
}

/// Tiers reached by `growth` that the ledger has not seen yet
///
/// Marks each returned tier in the ledger.
pub fn newly_crossed(growth: i64, ledger: &ThresholdLedger) -> Vec<ThresholdCrossing> {
    MEMORY_THRESHOLDS_MB
        .iter()
        .filter(|&&mb| growth >= (mb * MIB) as i64)
        .filter_map(|&mb| {
            let key = threshold_key(mb);
            ledger.try_mark(&key).then_some(ThresholdCrossing { key, megabytes: mb })
        })
        .collect()
}

/// One row of the memory history view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHistoryEntry {
    pub key: String,
    pub label: String,
    pub usage: u64,
    pub usage_formatted: String,
    pub delta_from_start: i64,
    pub delta_from_start_formatted: String,
    pub delta_from_previous: i64,
    pub delta_from_previous_formatted: String,
    pub delta_direction: String,
    pub peak: u64,
    pub peak_formatted: String,
    pub timestamp: f64,
    /// Milliseconds since request start
    pub relative_time: f64,
}

/// Snapshot history with deltas against the baseline and the previous row
pub fn memory_history(
    snapshots: &[MemorySnapshot],
    start_memory: u64,
    start_time: f64,
) -> Vec<MemoryHistoryEntry> {
    let mut previous = start_memory as i64;

    snapshots
        .iter()
        .map(|snapshot| {
            let usage = snapshot.usage as i64;
            let from_start = usage - start_memory as i64;
            let from_previous = usage - previous;
            previous = usage;

            MemoryHistoryEntry {
                key: snapshot.key.clone(),
                label: snapshot.label.clone(),
                usage: snapshot.usage,
                usage_formatted: format_bytes(usage),
                delta_from_start: from_start,
                delta_from_start_formatted: format_bytes(from_start),
                delta_from_previous: from_previous,
                delta_from_previous_formatted: format_bytes(from_previous.abs()),
                delta_direction: if from_previous >= 0 { "increase" } else { "decrease" }
                    .to_string(),
                peak: snapshot.peak,
                peak_formatted: format_bytes(snapshot.peak as i64),
                timestamp: snapshot.timestamp,
                relative_time: round_to((snapshot.timestamp - start_time) * 1000.0, 2),
            }
        })
        .collect()
}

/// `used / peak` as a percentage; 100 when either side is zero
pub fn memory_efficiency(used: u64, peak: u64) -> f64 {
    if used > 0 && peak > 0 {
        round_to(used as f64 / peak as f64 * 100.0, 1)
    } else {
        100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(key: &str, usage: u64, timestamp: f64) -> MemorySnapshot {
        MemorySnapshot {
            key: key.to_string(),
            usage,
            peak: usage,
            timestamp,
            label: key.to_string(),
        }
    }

    #[test]
    fn test_record_overwrites_by_key() {
        let mut tracker = MemoryTracker::new();
        tracker.record(snapshot("app_start", 100, 1.0));
        tracker.record(snapshot("booted", 200, 2.0));
        tracker.record(snapshot("app_start", 150, 3.0));

        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.snapshots()[0].key, "app_start");
        assert_eq!(tracker.get("app_start").unwrap().usage, 150);
    }

    #[test]
    fn test_newly_crossed_fires_once() {
        let ledger = ThresholdLedger::new();

        let first = newly_crossed((6 * MIB) as i64, &ledger);
        assert_eq!(first, vec![ThresholdCrossing { key: "threshold_5mb".to_string(), megabytes: 5 }]);

        assert!(newly_crossed((7 * MIB) as i64, &ledger).is_empty());

        let jump: Vec<_> = newly_crossed((25 * MIB) as i64, &ledger)
            .into_iter()
            .map(|c| c.megabytes)
            .collect();
        assert_eq!(jump, vec![10, 20]);
    }

    #[test]
    fn test_negative_growth_crosses_nothing() {
        let ledger = ThresholdLedger::new();
        assert!(newly_crossed(-(60 * MIB as i64), &ledger).is_empty());
        assert!(ledger.crossed().is_empty());
    }

    #[test]
    fn test_ledger_shared_between_threads() {
        let context = ProcessContext::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = context.clone();
                std::thread::spawn(move || ctx.thresholds().try_mark("threshold_5mb"))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_shared_context_is_one_ledger() {
        let a = ProcessContext::shared();
        let b = ProcessContext::shared();
        assert!(Arc::ptr_eq(a.thresholds(), b.thresholds()));
        assert!(!Arc::ptr_eq(a.thresholds(), ProcessContext::new().thresholds()));
    }

    #[test]
    fn test_memory_history_deltas() {
        let snapshots = vec![
            snapshot("app_start", 1000, 10.0),
            snapshot("booted", 3000, 10.005),
            snapshot("done", 2000, 10.010),
        ];

        let history = memory_history(&snapshots, 1000, 10.0);
        assert_eq!(history[0].delta_from_start, 0);
        assert_eq!(history[1].delta_from_previous, 2000);
        assert_eq!(history[1].delta_direction, "increase");
        assert_eq!(history[2].delta_from_previous, -1000);
        assert_eq!(history[2].delta_direction, "decrease");
        assert_eq!(history[2].delta_from_previous_formatted, "1000 B");
        assert_eq!(history[2].relative_time, 10.0);
    }

    #[test]
    fn test_memory_efficiency() {
        assert_eq!(memory_efficiency(0, 100), 100.0);
        assert_eq!(memory_efficiency(50, 200), 25.0);
    }
}
