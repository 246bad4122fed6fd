//! Utility helpers shared by the sample pipeline.
//!
//! This module contains:
//! - Time helpers
//! - Metric / label name sanitizing
//!
//! IMPORTANT:
//! - No collector-specific logic should live here.
//! - Everything in here must stay pure and deterministic.

use chrono::{DateTime, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts a sample timestamp into remote-write milliseconds.
pub fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Rewrites a metric or label name into the Prometheus name alphabet.
///
/// Allowed characters are `[a-zA-Z0-9_:]`, and the first character
/// must not be a digit. Everything else becomes `_`.
///
/// Examples:
/// - "redis.up"          -> "redis_up"
/// - "mysql-schema size" -> "mysql_schema_size"
/// - "9lives"            -> "_9lives"
///
/// An empty input stays empty; callers treat that as "unsampleable".
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);

    for (i, c) in raw.chars().enumerate() {
        let ok = c.is_ascii_alphanumeric() || c == '_' || c == ':';
        if i == 0 && c.is_ascii_digit() {
            out.push('_');
        }
        out.push(if ok { c } else { '_' });
    }

    out
}

/// Joins a collector source and a metric name into the wire metric name.
///
/// - ("redis", "up")  -> "redis_up"
/// - ("", "up")       -> "up"
pub fn metric_name(source: &str, metric: &str) -> String {
    if source.is_empty() {
        sanitize_name(metric)
    } else if metric.is_empty() {
        String::new()
    } else {
        sanitize_name(&format!("{source}_{metric}"))
    }
}
