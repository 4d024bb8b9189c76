//! Query analysis: per-type aggregation, duplicate detection, slowest
//! queries and the database score.
//!
//! Everything here is read-only over the query ledger, so the analysis can
//! be recomputed any number of times with identical results.

use super::ledger::{QueryEvent, Totals};
use crate::report::format::{format_bytes, round_to, truncate_with_ellipsis};
use crate::utils::config::{QUERY_PREVIEW_CHARS, SLOW_QUERY_PREVIEW_CHARS};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Aggregate for one statement type (`SELECT`, `INSERT`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTypeStats {
    #[serde(rename = "type")]
    pub query_type: String,
    pub count: usize,
    pub total_time: f64,
    pub avg_time: f64,
    pub memory_impact: i64,
}

/// A whitespace-normalized statement executed more than once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateQuery {
    pub fingerprint: String,
    pub query: String,
    pub executions: usize,
    pub total_time: f64,
    pub avg_time: f64,
    pub memory_impact: String,
    pub memory_impact_bytes: i64,
}

/// Display-safe entry of the slowest-queries list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQuery {
    pub query: String,
    pub time: f64,
    pub bindings: Vec<Value>,
    pub memory_delta: String,
}

/// Inputs of [`database_score`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreInputs {
    pub query_count: usize,
    pub average_time_ms: f64,
    pub total_query_time_ms: f64,
    pub execution_time_ms: f64,
    pub duplicate_count: usize,
}

impl ScoreInputs {
    /// Share of the request spent in queries
    pub fn time_ratio(&self) -> f64 {
        if self.execution_time_ms > 0.0 {
            self.total_query_time_ms / self.execution_time_ms
        } else {
            0.0
        }
    }
}

/// Full analysis of a request's queries
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryAnalysis {
    pub query_count: usize,
    pub total_time: f64,
    pub average_time: f64,
    pub slowest_time: f64,
    pub fastest_time: f64,
    pub total_memory_impact: i64,
    pub by_type: Vec<QueryTypeStats>,
    /// Sorted by execution count, descending
    pub duplicates: Vec<DuplicateQuery>,
    pub score: u8,
}

impl QueryAnalysis {
    pub fn has_performance_issues(&self) -> bool {
        self.score < 70
    }
}

/// Analyze a ledger of queries against the request's execution time
pub fn analyze_queries(queries: &[QueryEvent], execution_time_ms: f64) -> QueryAnalysis {
    debug!("Analyzing {} queries", queries.len());

    let totals = Totals::of(queries.iter().map(|q| q.time));
    let slowest_time = queries.iter().map(|q| q.time).reduce(f64::max).unwrap_or(0.0);
    let fastest_time = queries.iter().map(|q| q.time).reduce(f64::min).unwrap_or(0.0);
    let total_memory_impact = queries.iter().map(|q| q.memory_delta).sum();

    let by_type = aggregate_by_type(queries);
    let duplicates = find_duplicates(queries);

    let score = database_score(&ScoreInputs {
        query_count: totals.count,
        average_time_ms: totals.average,
        total_query_time_ms: totals.total,
        execution_time_ms,
        duplicate_count: duplicates.len(),
    });

    QueryAnalysis {
        query_count: totals.count,
        total_time: totals.total,
        average_time: totals.average,
        slowest_time,
        fastest_time,
        total_memory_impact,
        by_type,
        duplicates,
        score,
    }
}

/// Statement type: first whitespace-delimited token, upper-cased
pub fn query_type(query: &str) -> Option<String> {
    query.split_whitespace().next().map(|t| t.to_uppercase())
}

/// Collapse whitespace runs to single spaces
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable hash of the normalized statement text
pub fn query_fingerprint(query: &str) -> String {
    blake3::hash(normalize_query(query).as_bytes()).to_hex().to_string()
}

/// Per-type aggregation in first-seen order; blank statements are skipped
pub fn aggregate_by_type(queries: &[QueryEvent]) -> Vec<QueryTypeStats> {
    let mut stats: Vec<QueryTypeStats> = Vec::new();

    for query in queries {
        let Some(kind) = query_type(&query.query) else {
            continue;
        };

        let idx = match stats.iter().position(|s| s.query_type == kind) {
            Some(idx) => idx,
            None => {
                stats.push(QueryTypeStats {
                    query_type: kind,
                    count: 0,
                    total_time: 0.0,
                    avg_time: 0.0,
                    memory_impact: 0,
                });
                stats.len() - 1
            }
        };

        let entry = &mut stats[idx];
        entry.count += 1;
        entry.total_time += query.time;
        entry.memory_impact += query.memory_delta;
        entry.avg_time = entry.total_time / entry.count as f64;
    }

    stats
}

struct DuplicateGroup {
    fingerprint: String,
    normalized: String,
    count: usize,
    total_time: f64,
    total_memory: i64,
}

/// Statements executed more than once, most repeated first
///
/// Ties keep first-execution order.
pub fn find_duplicates(queries: &[QueryEvent]) -> Vec<DuplicateQuery> {
    let mut groups: Vec<DuplicateGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for query in queries {
        let normalized = normalize_query(&query.query);
        if normalized.is_empty() {
            continue;
        }

        let fingerprint = blake3::hash(normalized.as_bytes()).to_hex().to_string();
        let idx = *index.entry(fingerprint.clone()).or_insert_with(|| {
            groups.push(DuplicateGroup {
                fingerprint,
                normalized,
                count: 0,
                total_time: 0.0,
                total_memory: 0,
            });
            groups.len() - 1
        });

        let group = &mut groups[idx];
        group.count += 1;
        group.total_time += query.time;
        group.total_memory += query.memory_delta;
    }

    let mut duplicates: Vec<DuplicateQuery> = groups
        .into_iter()
        .filter(|g| g.count > 1)
        .map(|g| DuplicateQuery {
            query: truncate_with_ellipsis(&g.normalized, QUERY_PREVIEW_CHARS),
            fingerprint: g.fingerprint,
            executions: g.count,
            total_time: round_to(g.total_time, 3),
            avg_time: round_to(g.total_time / g.count as f64, 3),
            memory_impact: format_bytes(g.total_memory),
            memory_impact_bytes: g.total_memory,
        })
        .collect();

    duplicates.sort_by(|a, b| b.executions.cmp(&a.executions));
    duplicates
}

/// The `limit` slowest queries, slowest first
///
/// Equal durations keep execution order.
pub fn top_slow_queries(queries: &[QueryEvent], limit: usize) -> Vec<SlowQuery> {
    let mut sorted: Vec<&QueryEvent> = queries.iter().collect();
    sorted.sort_by(|a, b| b.time.total_cmp(&a.time));

    sorted
        .into_iter()
        .take(limit)
        .map(|q| SlowQuery {
            query: truncate_with_ellipsis(q.query.trim(), SLOW_QUERY_PREVIEW_CHARS),
            time: round_to(q.time, 3),
            bindings: q.bindings.clone(),
            memory_delta: format_bytes(q.memory_delta),
        })
        .collect()
}

/// Database health score, 0..=100, higher is better
///
/// Each category applies only its highest matching tier.
pub fn database_score(inputs: &ScoreInputs) -> u8 {
    let mut score: i32 = 100;

    score -= match inputs.query_count {
        n if n > 100 => 30,
        n if n > 50 => 20,
        n if n > 25 => 10,
        _ => 0,
    };

    score -= tier_penalty(inputs.average_time_ms, &[(100.0, 25), (50.0, 15), (25.0, 10)]);
    score -= tier_penalty(inputs.time_ratio(), &[(0.7, 25), (0.5, 15), (0.3, 10)]);

    score -= match inputs.duplicate_count {
        n if n > 10 => 20,
        n if n > 5 => 15,
        n if n > 0 => 10,
        _ => 0,
    };

    score.clamp(0, 100) as u8
}

// tiers are ordered highest bound first
fn tier_penalty(value: f64, tiers: &[(f64, i32)]) -> i32 {
    tiers
        .iter()
        .find(|(bound, _)| value > *bound)
        .map(|(_, penalty)| *penalty)
        .unwrap_or(0)
}
