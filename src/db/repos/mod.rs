mod scheduled_executions;

use chrono::{DateTime, Utc};
pub use scheduled_executions::*;

/// Message recorded on executions closed by the timeout sweep.
pub const TIMED_OUT_ERROR_MESSAGE: &str =
    "Execution timed out: no progress reported within the configured timeout";

/// Truncate a timestamp to millisecond precision.
///
/// SQLite stores timestamps as text and PostgreSQL keeps microseconds, so
/// values are normalized before they are written to keep both backends
/// returning the same instant that was stored.
pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(dt)
}

/// Upper bound on rows deleted per run; 0 means unlimited.
pub fn max_deletes_limit(max_deletes_per_run: u64) -> u64 {
    if max_deletes_per_run == 0 {
        u64::MAX
    } else {
        max_deletes_per_run
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_truncate_to_millis_drops_sub_millisecond_part() {
        let dt = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let truncated = truncate_to_millis(dt);
        assert_eq!(truncated.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(truncated.timestamp(), dt.timestamp());
    }

    #[test]
    fn test_max_deletes_zero_is_unlimited() {
        assert_eq!(max_deletes_limit(0), u64::MAX);
        assert_eq!(max_deletes_limit(500), 500);
    }
}
