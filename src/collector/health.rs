//! Overall request status and performance alerts.

use crate::report::format::{format_bytes, round_to};
use crate::utils::config::MIB;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall request health bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthStatus::Excellent
        } else if score >= 75.0 {
            HealthStatus::Good
        } else if score >= 60.0 {
            HealthStatus::Fair
        } else if score >= 40.0 {
            HealthStatus::Poor
        } else {
            HealthStatus::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blended 0..=100 request score
///
/// Execution-time and memory tiers are exclusive within their category; the
/// database score contributes 30% of its shortfall.
pub fn overall_score(execution_time_ms: f64, memory_used: u64, db_score: u8) -> f64 {
    let mut score = 100.0;

    if execution_time_ms > 2000.0 {
        score -= 40.0;
    } else if execution_time_ms > 1000.0 {
        score -= 25.0;
    } else if execution_time_ms > 500.0 {
        score -= 15.0;
    }

    if memory_used > 50 * MIB {
        score -= 30.0;
    } else if memory_used > 20 * MIB {
        score -= 15.0;
    }

    score -= (100.0 - f64::from(db_score)) * 0.3;

    score.clamp(0.0, 100.0)
}

pub fn overall_status(execution_time_ms: f64, memory_used: u64, db_score: u8) -> HealthStatus {
    HealthStatus::from_score(overall_score(execution_time_ms, memory_used, db_score))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Performance,
    Memory,
    Database,
}

/// One actionable finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertType,
    pub category: AlertCategory,
    pub message: String,
    pub suggestion: String,
}

impl Alert {
    fn new(kind: AlertType, category: AlertCategory, message: String, suggestion: &str) -> Self {
        Self {
            kind,
            category,
            message,
            suggestion: suggestion.to_string(),
        }
    }
}

/// Independent checks; any number of alerts may be raised together
pub fn performance_alerts(
    execution_time_ms: f64,
    memory_used: u64,
    total_query_time_ms: f64,
    query_count: usize,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if execution_time_ms > 2000.0 {
        alerts.push(Alert::new(
            AlertType::Critical,
            AlertCategory::Performance,
            format!("Very slow response time ({}ms)", round_to(execution_time_ms, 2)),
            "Consider optimizing database queries or caching",
        ));
    } else if execution_time_ms > 1000.0 {
        alerts.push(Alert::new(
            AlertType::Warning,
            AlertCategory::Performance,
            format!("Slow response time ({}ms)", round_to(execution_time_ms, 2)),
            "Review query performance and consider optimization",
        ));
    }

    if memory_used > 50 * MIB {
        alerts.push(Alert::new(
            AlertType::Critical,
            AlertCategory::Memory,
            format!("High memory usage ({})", format_bytes(memory_used as i64)),
            "Check for memory leaks or large data processing",
        ));
    } else if memory_used > 20 * MIB {
        alerts.push(Alert::new(
            AlertType::Warning,
            AlertCategory::Memory,
            format!("Elevated memory usage ({})", format_bytes(memory_used as i64)),
            "Monitor memory consumption patterns",
        ));
    }

    if query_count > 100 {
        alerts.push(Alert::new(
            AlertType::Critical,
            AlertCategory::Database,
            format!("Too many database queries ({})", query_count),
            "Consider query optimization, eager loading, or caching",
        ));
    } else if query_count > 50 {
        alerts.push(Alert::new(
            AlertType::Warning,
            AlertCategory::Database,
            format!("High number of database queries ({})", query_count),
            "Review N+1 query problems and consider optimization",
        ));
    }

    if execution_time_ms > 0.0 && total_query_time_ms > execution_time_ms * 0.5 {
        alerts.push(Alert::new(
            AlertType::Critical,
            AlertCategory::Database,
            format!(
                "Database queries consuming {}% of response time",
                round_to(total_query_time_ms / execution_time_ms * 100.0, 1)
            ),
            "Optimize slow queries or add database indexes",
        ));
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_buckets() {
        assert_eq!(HealthStatus::from_score(90.0), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(89.9), HealthStatus::Good);
        assert_eq!(HealthStatus::from_score(60.0), HealthStatus::Fair);
        assert_eq!(HealthStatus::from_score(40.0), HealthStatus::Poor);
        assert_eq!(HealthStatus::from_score(39.0), HealthStatus::Critical);
    }

    #[test]
    fn test_overall_score_blend() {
        assert_eq!(overall_score(100.0, 0, 100), 100.0);
        // 100 - 15 (time) - 15 (memory) - 30 * 0.3
        assert!((overall_score(600.0, 21 * MIB, 70) - 61.0).abs() < 1e-9);
        assert_eq!(overall_status(600.0, 21 * MIB, 70), HealthStatus::Fair);
        assert_eq!(overall_score(5000.0, 100 * MIB, 0), 0.0);
    }

    #[test]
    fn test_quiet_request_has_no_alerts() {
        assert!(performance_alerts(120.0, MIB, 10.0, 3).is_empty());
    }

    #[test]
    fn test_alerts_are_additive() {
        let alerts = performance_alerts(2500.0, 60 * MIB, 2000.0, 120);
        let categories: Vec<_> = alerts.iter().map(|a| (a.kind, a.category)).collect();
        assert_eq!(
            categories,
            vec![
                (AlertType::Critical, AlertCategory::Performance),
                (AlertType::Critical, AlertCategory::Memory),
                (AlertType::Critical, AlertCategory::Database),
                (AlertType::Critical, AlertCategory::Database),
            ]
        );
        assert_eq!(alerts[3].message, "Database queries consuming 80% of response time");
    }

    #[test]
    fn test_warning_tiers() {
        let alerts = performance_alerts(1500.0, 25 * MIB, 0.0, 60);
        assert!(alerts.iter().all(|a| a.kind == AlertType::Warning));
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].message, "Slow response time (1500ms)");
    }

    #[test]
    fn test_alert_serialization() {
        let alert = &performance_alerts(1500.0, 0, 0.0, 0)[0];
        let value = serde_json::to_value(alert).unwrap();
        assert_eq!(value["type"], "warning");
        assert_eq!(value["category"], "performance");
    }
}
