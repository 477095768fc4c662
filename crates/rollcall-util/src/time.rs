//! Time utilities for rollcall
//!
//! The engine never reads a clock: every operation takes `now` from its
//! caller. The only place that does read the system clock is [`now`], which
//! the service binary calls once per request.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `ROLLCALL_MOCK_TIME` environment variable can be set
//! to shift the clock returned by [`now`]. This is useful for exercising
//! check-in windows and leave deadlines against a fixed timetable.
//!
//! Format: `YYYY-MM-DD HH:MM:SS`, interpreted as UTC (e.g. `2025-03-01 08:55:00`)

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// All persisted and computed instants are UTC
pub type Timestamp = DateTime<Utc>;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "ROLLCALL_MOCK_TIME";

/// Format accepted by `ROLLCALL_MOCK_TIME`
pub const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Offset between mock time and real time, captured once at first use so
/// mock time advances naturally.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Utc::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT) {
                    Ok(naive_dt) => {
                        let mock_dt = Utc.from_utc_datetime(&naive_dt);
                        let offset = mock_dt.signed_duration_since(Utc::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = MOCK_TIME_FORMAT,
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Get the current time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> Timestamp {
    let real_now = Utc::now();

    if let Some(offset) = get_mock_time_offset() {
        real_now + offset
    } else {
        real_now
    }
}

/// Whole minutes as a signed chrono duration
pub fn minutes(n: u32) -> chrono::Duration {
    chrono::Duration::minutes(i64::from(n))
}

/// Format a timestamp as `HH:MM` for guard messages.
pub fn format_clock_time(dt: &Timestamp) -> String {
    dt.format("%H:%M").to_string()
}

/// A closed interval `[start, end]` of wall-clock instants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Both bounds are inclusive
    pub fn contains(&self, at: Timestamp) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn is_before(&self, at: Timestamp) -> bool {
        at < self.start
    }

    pub fn has_elapsed(&self, at: Timestamp) -> bool {
        at > self.end
    }

    /// Time left until `end`, or zero once elapsed
    pub fn remaining(&self, at: Timestamp) -> Duration {
        (self.end - at).to_std().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn at(h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_interval_bounds_inclusive() {
        let window = Interval::new(at(8, 50), at(9, 10));

        assert!(!window.contains(at(8, 49)));
        assert!(window.contains(at(8, 50)));
        assert!(window.contains(at(9, 0)));
        assert!(window.contains(at(9, 10)));
        assert!(!window.contains(at(9, 11)));

        assert!(window.is_before(at(8, 49)));
        assert!(window.has_elapsed(at(9, 11)));
        assert!(!window.has_elapsed(at(9, 10)));
    }

    #[test]
    fn test_interval_remaining() {
        let window = Interval::new(at(9, 10), at(9, 12));
        assert_eq!(window.remaining(at(9, 11)), Duration::from_secs(60));
        assert_eq!(window.remaining(at(9, 30)), Duration::ZERO);
    }

    #[test]
    fn test_minutes_helper() {
        assert_eq!(at(9, 0) + minutes(10), at(9, 10));
        assert_eq!(at(9, 0) - minutes(10), at(8, 50));
    }

    #[test]
    fn test_format_clock_time() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 1, 9, 10, 45).unwrap();
        assert_eq!(format_clock_time(&dt), "09:10");
    }

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }

    #[test]
    fn test_parse_mock_time_format() {
        let valid_formats = ["2025-03-01 08:55:00", "2025-01-01 00:00:00"];
        for format_str in &valid_formats {
            assert!(
                NaiveDateTime::parse_from_str(format_str, MOCK_TIME_FORMAT).is_ok(),
                "Expected '{}' to parse",
                format_str
            );
        }

        let invalid_formats = ["2025-03-01", "08:55:00", "2025-03-01T08:55:00", ""];
        for format_str in &invalid_formats {
            assert!(
                NaiveDateTime::parse_from_str(format_str, MOCK_TIME_FORMAT).is_err(),
                "Expected '{}' to fail",
                format_str
            );
        }
    }
}
