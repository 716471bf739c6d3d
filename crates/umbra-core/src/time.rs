//! Wall-clock time values
//!
//! All timestamps in Umbra are milliseconds since the Unix epoch, obtained
//! through [`crate::effects::PhysicalTimeEffects`] and never from the system
//! clock directly.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One second in milliseconds
pub const SECOND_MS: u64 = 1_000;
/// One minute in milliseconds
pub const MINUTE_MS: u64 = 60 * SECOND_MS;
/// One hour in milliseconds
pub const HOUR_MS: u64 = 60 * MINUTE_MS;
/// One day in milliseconds
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// A physical (wall-clock) timestamp
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PhysicalTime {
    /// Milliseconds since the Unix epoch
    pub ts_ms: u64,
}

impl PhysicalTime {
    /// Create a timestamp from milliseconds since the epoch
    pub const fn from_ms(ts_ms: u64) -> Self {
        Self { ts_ms }
    }

    /// Timestamp `ms` later
    pub fn add_ms(self, ms: u64) -> Self {
        Self {
            ts_ms: self.ts_ms.saturating_add(ms),
        }
    }

    /// Timestamp `ms` earlier, clamped at the epoch
    pub fn sub_ms(self, ms: u64) -> Self {
        Self {
            ts_ms: self.ts_ms.saturating_sub(ms),
        }
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is in the future
    pub fn since(self, earlier: PhysicalTime) -> u64 {
        self.ts_ms.saturating_sub(earlier.ts_ms)
    }

    /// Convert to a UTC datetime
    pub fn to_datetime(self) -> DateTime<Utc> {
        let ms = i64::try_from(self.ts_ms).unwrap_or(i64::MAX);
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
    }

    /// Day of week (0 = Sunday) and minute of day after applying a UTC offset
    pub fn local_day_and_minute(self, utc_offset_minutes: i32) -> (u32, u32) {
        let local = self.to_datetime() + ChronoDuration::minutes(i64::from(utc_offset_minutes));
        let day = local.weekday().num_days_from_sunday();
        let minute = local.hour() * 60 + local.minute();
        (day, minute)
    }
}

impl fmt::Display for PhysicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_saturates() {
        let t = PhysicalTime::from_ms(10);
        assert_eq!(t.sub_ms(100).ts_ms, 0);
        assert_eq!(t.add_ms(5).ts_ms, 15);
        assert_eq!(t.since(PhysicalTime::from_ms(20)), 0);
    }

    #[test]
    fn test_local_day_and_minute() {
        // 2024-01-07 is a Sunday; 23:30 UTC
        let t = PhysicalTime::from_ms(1_704_670_200_000);
        assert_eq!(t.local_day_and_minute(0), (0, 23 * 60 + 30));
        // One hour ahead rolls over into Monday
        assert_eq!(t.local_day_and_minute(60), (1, 30));
    }
}
