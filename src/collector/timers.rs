//! Timer Registry: named start/stop intervals with memory deltas.
//!
//! Flat name → interval map, no nesting. Starting a name that already
//! exists replaces it in place (restart), keeping its original position so
//! report order reflects first use.

use super::probe::Probe;
use log::debug;
use serde::{Deserialize, Serialize};

/// One named interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub name: String,
    /// Seconds since the Unix epoch
    pub start: f64,
    pub start_memory: u64,
    pub end: Option<f64>,
    pub end_memory: Option<u64>,
    /// Elapsed seconds; may be negative only if the clock misbehaves
    pub duration: Option<f64>,
    /// Memory change over the interval; negative when memory was released
    pub memory_delta: Option<i64>,
}

impl Timer {
    pub fn is_running(&self) -> bool {
        self.duration.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimerRegistry {
    timers: Vec<Timer>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a timer
    pub fn start(&mut self, name: &str, probe: &dyn Probe) {
        let timer = Timer {
            name: name.to_string(),
            start: probe.now(),
            start_memory: probe.memory_usage(),
            end: None,
            end_memory: None,
            duration: None,
            memory_delta: None,
        };

        match self.timers.iter_mut().find(|t| t.name == name) {
            Some(existing) => *existing = timer,
            None => self.timers.push(timer),
        }
    }

    /// Stop a running timer and return its duration in seconds
    ///
    /// Returns 0.0 without touching state when the timer was never started
    /// or has already been stopped.
    pub fn stop(&mut self, name: &str, probe: &dyn Probe) -> f64 {
        let Some(timer) = self.timers.iter_mut().find(|t| t.name == name && t.is_running()) else {
            debug!("Ignoring stop for inactive timer '{}'", name);
            return 0.0;
        };

        let end = probe.now();
        let end_memory = probe.memory_usage();
        let duration = end - timer.start;

        timer.end = Some(end);
        timer.end_memory = Some(end_memory);
        timer.duration = Some(duration);
        timer.memory_delta = Some(end_memory as i64 - timer.start_memory as i64);

        duration
    }

    pub fn get(&self, name: &str) -> Option<&Timer> {
        self.timers.iter().find(|t| t.name == name)
    }

    /// All timers in first-start order
    pub fn iter(&self) -> impl Iterator<Item = &Timer> {
        self.timers.iter()
    }

    /// Stopped timers only
    pub fn completed(&self) -> impl Iterator<Item = &Timer> {
        self.timers.iter().filter(|t| !t.is_running())
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
