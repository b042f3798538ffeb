//! Time tags and the clock used to sanity-check them.
//!
//! A [`TimeTag`] is a signed count of microseconds since the Unix epoch. Hardware
//! drivers only know the time of day, so driver-framed samples carry a time-of-day
//! value that a [`SampleClock`] resolves to an absolute tag, rejecting values that
//! are too far from the system's notion of now.

use crate::limits::{USECS_PER_DAY, USECS_PER_SEC};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::trace;

/// Microseconds since 1970-01-01 00:00 UTC.
pub type TimeTag = i64;

/// Default distance from the current time beyond which a resolved time tag is rejected.
pub const DEFAULT_MAX_CLOCK_SKEW: TimeTag = 10 * 60 * USECS_PER_SEC;

/// Source of "now" for time tagging, plus the date resolution of time-of-day tags.
pub trait SampleClock: Send + Sync {
    /// Current time.
    fn now(&self) -> TimeTag;

    /// Largest accepted difference between a resolved tag and [`SampleClock::now`].
    fn max_skew(&self) -> TimeTag {
        DEFAULT_MAX_CLOCK_SKEW
    }

    /// Resolve microseconds since midnight UTC to an absolute time tag.
    ///
    /// The nearest midnight is chosen so that samples taken just before midnight but
    /// read just after it land on the previous day. Returns `None` when the value is
    /// not a time of day or lands further than [`SampleClock::max_skew`] from now.
    fn resolve_time_of_day(&self, tod: TimeTag) -> Option<TimeTag> {
        if !(0..USECS_PER_DAY).contains(&tod) {
            trace!(tod, "Time of day out of range");
            return None;
        }
        let now = self.now();
        let midnight = now - now.rem_euclid(USECS_PER_DAY);
        let mut tt = midnight + tod;
        if tt - now > USECS_PER_DAY / 2 {
            tt -= USECS_PER_DAY;
        } else if now - tt > USECS_PER_DAY / 2 {
            tt += USECS_PER_DAY;
        }
        if (tt - now).abs() > self.max_skew() {
            trace!(tt, now, max_skew = self.max_skew(), "Time tag too far from clock");
            return None;
        }
        Some(tt)
    }
}

/// Wall clock backed by the system time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    max_skew: TimeTag,
}

impl SystemClock {
    /// System clock with a custom skew tolerance.
    pub fn with_max_skew(max_skew: TimeTag) -> Self {
        Self { max_skew }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            max_skew: DEFAULT_MAX_CLOCK_SKEW,
        }
    }
}

impl SampleClock for SystemClock {
    fn now(&self) -> TimeTag {
        Utc::now().timestamp_micros()
    }

    fn max_skew(&self) -> TimeTag {
        self.max_skew
    }
}

/// Manually driven clock for tests and replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Clock frozen at `now`.
    pub fn new(now: TimeTag) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Set the current time.
    pub fn set(&self, now: TimeTag) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward by `usecs`.
    pub fn advance(&self, usecs: TimeTag) {
        self.now.fetch_add(usecs, Ordering::SeqCst);
    }
}

impl SampleClock for ManualClock {
    fn now(&self) -> TimeTag {
        self.now.load(Ordering::SeqCst)
    }
}

/// Format a time tag as an RFC 3339 UTC timestamp with microseconds.
pub fn format_time_tag(tt: TimeTag) -> String {
    match DateTime::<Utc>::from_timestamp_micros(tt) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        None => format!("{}us", tt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> TimeTag {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, s)
            .single()
            .map(|dt| dt.timestamp_micros())
            .unwrap_or_default()
    }

    #[test]
    fn resolves_time_of_day_to_today() {
        let clock = ManualClock::new(at(12, 0, 0));
        let tod = 11 * 3600 * USECS_PER_SEC + 59 * 60 * USECS_PER_SEC;
        assert_eq!(clock.resolve_time_of_day(tod), Some(at(11, 59, 0)));
    }

    #[test]
    fn handles_midnight_rollover() {
        // read just after midnight, sampled just before
        let clock = ManualClock::new(at(0, 0, 2));
        let tod = USECS_PER_DAY - USECS_PER_SEC;
        assert_eq!(clock.resolve_time_of_day(tod), Some(at(0, 0, 1) - 2 * USECS_PER_SEC));
    }

    #[test]
    fn rejects_out_of_range_and_skewed_tags() {
        let clock = ManualClock::new(at(12, 0, 0));
        assert_eq!(clock.resolve_time_of_day(-1), None);
        assert_eq!(clock.resolve_time_of_day(USECS_PER_DAY), None);
        let an_hour_ago = 11 * 3600 * USECS_PER_SEC;
        assert_eq!(clock.resolve_time_of_day(an_hour_ago), None);
    }

    #[test]
    fn rejections_are_traced() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let clock = ManualClock::new(at(12, 0, 0));
            assert_eq!(clock.resolve_time_of_day(USECS_PER_DAY + 1), None);
            assert_eq!(clock.resolve_time_of_day(13 * 3600 * USECS_PER_SEC), None);
        });
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        clock.advance(50);
        assert_eq!(clock.now(), 150);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn formats_microseconds() {
        assert_eq!(format_time_tag(at(1, 2, 3) + 45), "2024-03-05T01:02:03.000045Z");
    }
}
