//! Timestamp helpers shared by every stream.
//!
//! All persisted and transmitted timestamps use one canonical form: RFC 3339,
//! UTC, microsecond precision, `Z` suffix. The fixed width keeps the stored
//! text sortable in the same order as the instants it represents.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{CoreError, CoreResult};

/// Instant type used throughout the system.
pub type Timestamp = DateTime<Utc>;

/// Naive layouts accepted in recorded traces, tried in order. All are read as UTC.
const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d-%H:%M:%S%.f",
];

/// Format a timestamp in the canonical storage/wire form.
pub fn format_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse RFC 3339 (any offset) or one of the naive trace layouts.
pub fn parse_timestamp(value: &str) -> CoreResult<Timestamp> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(CoreError::InvalidTimestamp {
        value: value.to_string(),
    })
}

/// Signed seconds from `from` to `to`.
pub fn seconds_between(from: Timestamp, to: Timestamp) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}
