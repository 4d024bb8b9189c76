//! Timeline assembly: timers, grouped log markers and queries merged into
//! one chronological strip for Gantt-style rendering.

use super::ledger::QueryEvent;
use super::log::LogGroup;
use super::timers::Timer;
use crate::report::format::{humanize_name, round_to, truncate_with_ellipsis};
use crate::utils::config::{
    DEFAULT_GROUP_COLOR, GROUP_COLORS, QUERY_COLOR, QUERY_PREVIEW_CHARS, TIMELINE_MARKER_MS,
    TIMER_COLOR,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub name: String,
    pub group: String,
    /// Milliseconds since request start
    pub start: f64,
    /// Milliseconds
    pub duration: f64,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Fixed color per log group; gray for unknown groups
pub fn group_color(group: &str) -> &'static str {
    GROUP_COLORS
        .iter()
        .find(|(name, _)| *name == group)
        .map(|(_, color)| *color)
        .unwrap_or(DEFAULT_GROUP_COLOR)
}

/// Merge the three sources and sort by start time
///
/// The sort is stable, so entries with equal start keep merge order:
/// timers, then log markers, then queries.
pub fn build_timeline<'a>(
    timers: impl Iterator<Item = &'a Timer>,
    groups: &[LogGroup],
    queries: &[QueryEvent],
    start_time: f64,
) -> Vec<TimelineEvent> {
    let mut timeline = Vec::new();

    for timer in timers {
        let Some(duration) = timer.duration else {
            continue;
        };
        timeline.push(TimelineEvent {
            name: humanize_name(&timer.name),
            group: "Timers".to_string(),
            start: round_to((timer.start - start_time) * 1000.0, 2),
            duration: round_to(duration * 1000.0, 2),
            color: TIMER_COLOR.to_string(),
            details: None,
        });
    }

    for group in groups {
        for entry in &group.entries {
            timeline.push(TimelineEvent {
                name: entry.message.clone(),
                group: group.name.clone(),
                start: round_to(entry.relative_time, 2),
                duration: TIMELINE_MARKER_MS,
                color: group_color(&group.name).to_string(),
                details: None,
            });
        }
    }

    for (index, query) in queries.iter().enumerate() {
        timeline.push(TimelineEvent {
            name: format!("Query #{}", index + 1),
            group: "Database".to_string(),
            start: round_to((query.timestamp - start_time) * 1000.0, 2),
            duration: query.time,
            color: QUERY_COLOR.to_string(),
            details: Some(truncate_with_ellipsis(&query.query, QUERY_PREVIEW_CHARS)),
        });
    }

    timeline.sort_by(|a, b| a.start.total_cmp(&b.start));
    timeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::log::{LogEntry, LogLevel};
    use serde_json::Map;

    fn timer(name: &str, start: f64, duration: Option<f64>) -> Timer {
        Timer {
            name: name.to_string(),
            start,
            start_memory: 0,
            end: duration.map(|d| start + d),
            end_memory: duration.map(|_| 0),
            duration,
            memory_delta: duration.map(|_| 0),
        }
    }

    fn marker(message: &str, relative_time: f64) -> LogEntry {
        LogEntry {
            message: message.to_string(),
            context: Map::new(),
            level: LogLevel::Info,
            timestamp: 0.0,
            relative_time,
            memory: 0,
            peak_memory: 0,
            call_chain: Vec::new(),
        }
    }

    fn query(text: &str, timestamp: f64, time: f64) -> QueryEvent {
        QueryEvent {
            query: text.to_string(),
            bindings: Vec::new(),
            time,
            timestamp,
            memory_delta: 0,
        }
    }

    #[test]
    fn test_sorted_by_start() {
        let timers = vec![timer("late_timer", 100.030, Some(0.010))];
        let groups = vec![LogGroup {
            name: "Routing".to_string(),
            entries: vec![marker("Route matched", 20.0)],
        }];
        let queries = vec![query("SELECT 1", 100.005, 2.5)];

        let timeline = build_timeline(timers.iter(), &groups, &queries, 100.0);
        let starts: Vec<_> = timeline.iter().map(|e| e.start).collect();
        assert_eq!(starts, vec![5.0, 20.0, 30.0]);

        assert_eq!(timeline[0].name, "Query #1");
        assert_eq!(timeline[0].details.as_deref(), Some("SELECT 1"));
        assert_eq!(timeline[1].color, "#2ecc71");
        assert_eq!(timeline[1].duration, TIMELINE_MARKER_MS);
        assert_eq!(timeline[2].name, "Late timer");
        assert_eq!(timeline[2].duration, 10.0);
    }

    #[test]
    fn test_equal_starts_keep_source_order() {
        let timers = vec![timer("t", 100.010, Some(0.001))];
        let groups = vec![LogGroup {
            name: "Custom".to_string(),
            entries: vec![marker("mark", 10.0)],
        }];
        let queries = vec![query("SELECT 1", 100.010, 1.0)];

        let timeline = build_timeline(timers.iter(), &groups, &queries, 100.0);
        let groups: Vec<_> = timeline.iter().map(|e| e.group.as_str()).collect();
        assert_eq!(groups, vec!["Timers", "Custom", "Database"]);
        assert_eq!(timeline[1].color, DEFAULT_GROUP_COLOR);
    }

    #[test]
    fn test_running_timers_excluded() {
        let timers = vec![timer("running", 100.0, None)];
        let timeline = build_timeline(timers.iter(), &[], &[], 100.0);
        assert!(timeline.is_empty());
    }
}
