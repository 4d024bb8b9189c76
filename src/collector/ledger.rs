//! Append-only ledgers for queries, renders and language-file loads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An executed database query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvent {
    pub query: String,
    pub bindings: Vec<Value>,
    /// Execution time in milliseconds
    pub time: f64,
    pub timestamp: f64,
    pub memory_delta: i64,
}

/// A rendered template or view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderEvent {
    pub template: String,
    /// Render time in milliseconds
    pub render_time: f64,
    pub timestamp: f64,
    pub memory_delta: i64,
}

/// A loaded translation file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageFileEvent {
    pub file: String,
    /// Load time in milliseconds
    pub load_time: f64,
    pub timestamp: f64,
    pub memory_delta: i64,
}

/// Ordered record of one event kind; insertion order is observation order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Ledger<T> {
    entries: Vec<T>,
}

impl<T> Default for Ledger<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> Ledger<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Count, total and mean of a measured quantity
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Totals {
    pub count: usize,
    pub total: f64,
    pub average: f64,
}

impl Totals {
    pub fn of(values: impl Iterator<Item = f64>) -> Self {
        let (count, total) = values.fold((0usize, 0.0), |(n, sum), v| (n + 1, sum + v));
        let average = if count > 0 { total / count as f64 } else { 0.0 };
        Self { count, total, average }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_keeps_insertion_order() {
        let mut ledger = Ledger::new();
        for (i, path) in ["layout", "header", "footer"].iter().enumerate() {
            ledger.push(RenderEvent {
                template: path.to_string(),
                render_time: i as f64,
                timestamp: i as f64,
                memory_delta: 0,
            });
        }

        let order: Vec<_> = ledger.iter().map(|r| r.template.as_str()).collect();
        assert_eq!(order, vec!["layout", "header", "footer"]);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_totals() {
        let totals = Totals::of([2.0, 4.0, 6.0].into_iter());
        assert_eq!(totals.count, 3);
        assert_eq!(totals.total, 12.0);
        assert_eq!(totals.average, 4.0);

        let empty = Totals::of(std::iter::empty());
        assert_eq!(empty.average, 0.0);
    }
}
