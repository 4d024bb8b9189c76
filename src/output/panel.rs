//! Presentation contract for the inline debug panel.
//!
//! The collector hands a finished [`Report`] to a [`PanelRenderer`] and
//! appends whatever markup comes back to the host's output. Rich front-ends
//! implement the trait themselves; [`TextPanel`] is the built-in fallback.

use crate::report::format::{format_bytes, format_ms};
use crate::report::schema::Report;
use std::fmt::Write;

/// Read-only renderer over a finalized report
pub trait PanelRenderer: Send {
    fn render(&self, report: &Report) -> String;
}

/// Plain-text summary wrapped in a `<pre>` block
#[derive(Debug, Clone, Copy, Default)]
pub struct TextPanel;

impl TextPanel {
    pub fn new() -> Self {
        Self
    }

    /// The summary without markup
    pub fn summary(report: &Report) -> String {
        let perf = &report.performance;
        let db = &report.database;
        let mut out = String::new();

        let _ = writeln!(
            out,
            "{} {} | {} | status {} ({})",
            report.request.method,
            report.request.url,
            format_ms(perf.execution_time, 2),
            perf.status,
            perf.score
        );
        let _ = writeln!(
            out,
            "memory used {} | request peak {} | limit usage {}%",
            perf.memory_used, perf.request_peak_memory, perf.memory_usage_percentage
        );
        let _ = writeln!(
            out,
            "queries {} in {} | score {} | duplicates {}",
            db.query_count,
            format_ms(db.total_time, 2),
            db.performance_score,
            db.duplicate_queries.len()
        );
        let _ = writeln!(
            out,
            "views {} | translations {} | log entries {}",
            report.views.rendered_count,
            report.translations.loaded_files_count,
            report.logs.len()
        );

        for timer in &report.timers {
            let duration = timer
                .duration
                .map(|d| format_ms(d, 2))
                .unwrap_or_else(|| "running".to_string());
            let _ = writeln!(out, "  timer {:<28} {}", timer.name, duration);
        }

        for query in &db.slowest_queries {
            let _ = writeln!(out, "  slow  {:>10} {}", format_ms(query.time, 3), query.query);
        }

        if report.memory.request_memory_bytes > 0 {
            let _ = writeln!(
                out,
                "  memory growth {}",
                format_bytes(report.memory.request_memory_bytes as i64)
            );
        }

        out
    }
}

impl PanelRenderer for TextPanel {
    fn render(&self, report: &Report) -> String {
        format!(
            "\n<div id=\"debugbar\"><pre>{}</pre></div>\n",
            escape_html(&Self::summary(report))
        )
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
