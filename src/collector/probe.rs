//! Clock and process-memory readings.
//!
//! Every timestamp the collector records comes from a [`Probe`], as do all
//! memory figures. Production code uses [`SystemProbe`]; tests and script
//! replay drive a [`ManualProbe`] so readings are fully deterministic.

use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of wall-clock time and memory usage
pub trait Probe: Send {
    /// Seconds since the Unix epoch
    fn now(&self) -> f64;

    /// Current memory usage in bytes
    fn memory_usage(&self) -> u64;

    /// Highest memory usage observed so far, in bytes
    fn peak_memory_usage(&self) -> u64;
}

/// Probe backed by the system clock and the process resident set size
///
/// Time is anchored to a monotonic `Instant`, so readings never go
/// backwards even if the wall clock is adjusted mid-request.
pub struct SystemProbe {
    origin: Instant,
    origin_epoch: f64,
    pid: Option<Pid>,
    system: Mutex<System>,
    peak: AtomicU64,
}

impl SystemProbe {
    pub fn new() -> Self {
        let origin_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!("Process memory unavailable: {}", e);
                None
            }
        };

        let probe = Self {
            origin: Instant::now(),
            origin_epoch,
            pid,
            system: Mutex::new(System::new()),
            peak: AtomicU64::new(0),
        };
        // seed the high-water mark
        probe.memory_usage();
        probe
    }

    fn read_resident(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for SystemProbe {
    fn now(&self) -> f64 {
        self.origin_epoch + self.origin.elapsed().as_secs_f64()
    }

    fn memory_usage(&self) -> u64 {
        let usage = self.read_resident();
        self.peak.fetch_max(usage, Ordering::Relaxed);
        usage
    }

    fn peak_memory_usage(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
struct ManualReading {
    now: f64,
    memory: u64,
    peak: u64,
}

/// Probe whose readings are set explicitly
///
/// Clones share state: hand one clone to the aggregator and keep another to
/// advance time or change memory from outside.
#[derive(Debug, Clone)]
pub struct ManualProbe {
    reading: Arc<Mutex<ManualReading>>,
}

impl ManualProbe {
    pub fn new(start: f64, memory: u64) -> Self {
        Self {
            reading: Arc::new(Mutex::new(ManualReading {
                now: start,
                memory,
                peak: memory,
            })),
        }
    }

    fn with_reading<R>(&self, f: impl FnOnce(&mut ManualReading) -> R) -> R {
        let mut guard = match self.reading.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Move the clock forward; negative values are ignored
    pub fn advance_ms(&self, ms: f64) {
        self.with_reading(|r| r.now += ms.max(0.0) / 1000.0);
    }

    /// Jump the clock to an absolute time, never moving it backwards
    pub fn set_now(&self, now: f64) {
        self.with_reading(|r| r.now = r.now.max(now));
    }

    /// Set the current usage; the peak follows if exceeded
    pub fn set_memory(&self, bytes: u64) {
        self.with_reading(|r| {
            r.memory = bytes;
            r.peak = r.peak.max(bytes);
        });
    }
}

impl Probe for ManualProbe {
    fn now(&self) -> f64 {
        self.with_reading(|r| r.now)
    }

    fn memory_usage(&self) -> u64 {
        self.with_reading(|r| r.memory)
    }

    fn peak_memory_usage(&self) -> u64 {
        self.with_reading(|r| r.peak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_probe_shared_state() {
        let probe = ManualProbe::new(100.0, 1024);
        let handle = probe.clone();

        handle.advance_ms(250.0);
        handle.set_memory(4096);
        handle.set_memory(2048);

        assert!((probe.now() - 100.25).abs() < 1e-9);
        assert_eq!(probe.memory_usage(), 2048);
        assert_eq!(probe.peak_memory_usage(), 4096);
    }

    #[test]
    fn test_manual_probe_clock_is_monotonic() {
        let probe = ManualProbe::new(10.0, 0);
        probe.set_now(5.0);
        probe.advance_ms(-50.0);
        assert_eq!(probe.now(), 10.0);
    }

    #[test]
    fn test_system_probe_readings() {
        let probe = SystemProbe::new();
        let first = probe.now();
        let second = probe.now();
        assert!(second >= first);
        assert!(first > 0.0);

        let usage = probe.memory_usage();
        assert!(probe.peak_memory_usage() >= usage);
    }
}
