/// Snapshot freshness.
///
/// When a cycle fails on a communication error the coordinator may hand back
/// the last good snapshot instead, but only while that snapshot is younger
/// than a ceiling.
///
/// # Clock injection
/// `is_fresh_at` takes `now` as a parameter; the coordinator passes the
/// cycle's own timestamp.

use chrono::{DateTime, Duration, Utc};

/// Oldest snapshot that may stand in for a failed cycle.
pub const MAX_STALE_DATA_HOURS: i64 = 4;

pub fn max_stale_age() -> Duration {
    Duration::hours(MAX_STALE_DATA_HOURS)
}

/// Returns `true` if `last_success` is strictly younger than `max_age`.
///
/// No success yet is never fresh. A timestamp in the future (clock skew)
/// counts as fresh.
pub fn is_fresh_at(last_success: Option<DateTime<Utc>>, max_age: Duration, now: DateTime<Utc>) -> bool {
    match last_success {
        Some(at) => now - at < max_age,
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
