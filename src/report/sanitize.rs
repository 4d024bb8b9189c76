//! Serialization boundary helpers.
//!
//! Request input passes through [`redact_sensitive`] before it reaches a
//! report; routes lose their handler references through [`strip_callbacks`].

use crate::utils::config::{CALLBACK_KEYS, REDACTION_MARKER, SENSITIVE_TERMS};
use serde_json::{Map, Value};

/// True when `key` contains any sensitive term, ignoring case
pub fn is_sensitive_key(key: &str, terms: &[&str]) -> bool {
    let lower = key.to_lowercase();
    terms.iter().any(|term| lower.contains(term))
}

/// Replace values under sensitive keys with the redaction marker, at any depth
///
/// Arrays are walked so maps nested inside lists are covered too.
pub fn redact_sensitive(value: &Value) -> Value {
    redact_with(value, SENSITIVE_TERMS)
}

pub fn redact_with(value: &Value, terms: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_map(map, terms)),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_with(v, terms)).collect()),
        other => other.clone(),
    }
}

pub fn redact_map(map: &Map<String, Value>, terms: &[&str]) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let cleaned = if is_sensitive_key(key, terms) {
                Value::String(REDACTION_MARKER.to_string())
            } else {
                redact_with(value, terms)
            };
            (key.clone(), cleaned)
        })
        .collect()
}

/// Drop top-level keys that reference executable handlers
pub fn strip_callbacks(route: &Map<String, Value>) -> Map<String, Value> {
    route
        .iter()
        .filter(|(key, _)| !CALLBACK_KEYS.iter().any(|c| key.eq_ignore_ascii_case(c)))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
