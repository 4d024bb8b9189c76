//! Human-readable formatting for report fields.

const BYTE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Format a signed byte count with binary units, e.g. `"1.2 MB"` or `"-512 B"`
pub fn format_bytes(bytes: i64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let sign = if bytes < 0 { "-" } else { "" };
    let abs = bytes.unsigned_abs();

    let mut pow = 0;
    while pow + 1 < BYTE_UNITS.len() && abs >= 1u64 << (10 * (pow + 1)) {
        pow += 1;
    }
    let value = abs as f64 / (1u64 << (10 * pow)) as f64;

    format!("{}{} {}", sign, round_to(value, 2), BYTE_UNITS[pow])
}

/// Format milliseconds with a fixed precision, e.g. `"12.34ms"`
pub fn format_ms(ms: f64, places: i32) -> String {
    format!("{}ms", round_to(ms, places))
}

/// Truncate to `max_chars` characters, appending `...` when shortened
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// `"route_matching"` → `"Route matching"`
pub fn humanize_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
