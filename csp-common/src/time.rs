//! Timestamp utilities
//!
//! Report timestamps are stored as RFC 3339 strings and keep the offset they
//! were written with; bucketing works on that offset, never a re-projection.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as an RFC 3339 string with millisecond precision
pub fn now_rfc3339() -> String {
    to_rfc3339(&now())
}

/// Format a UTC timestamp the way reports store it
pub fn to_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp, keeping its original offset
///
/// Returns `None` for empty or unparsable input.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(trimmed).ok()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
