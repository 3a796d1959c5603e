//! Timestamp utilities

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Milliseconds elapsed from `earlier` to `later`, clamped at zero
///
/// Wall clocks on different hosts disagree; a `later` that reads before
/// `earlier` yields 0 rather than a negative offset.
pub fn elapsed_ms(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    (later - earlier).num_milliseconds().max(0) as u64
}

/// Shift a timestamp forward by a number of milliseconds
pub fn add_ms(at: DateTime<Utc>, millis: u64) -> DateTime<Utc> {
    at + ChronoDuration::milliseconds(millis.min(i64::MAX as u64) as i64)
}
