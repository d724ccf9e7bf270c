//! Day-boundary service.
//!
//! History rows, streaks and "today's focus" all key on the user's calendar
//! day rather than the UTC date. The boundary is a fixed UTC offset taken
//! from config.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCalendar {
    utc_offset_minutes: i32,
}

impl Default for DayCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl DayCalendar {
    pub fn utc() -> Self {
        Self {
            utc_offset_minutes: 0,
        }
    }

    /// Calendar with days starting at local midnight for `utc_offset_minutes`.
    ///
    /// Offsets outside +/-14h are clamped.
    pub fn with_offset_minutes(utc_offset_minutes: i32) -> Self {
        Self {
            utc_offset_minutes: utc_offset_minutes.clamp(-14 * 60, 14 * 60),
        }
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        self.utc_offset_minutes
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Calendar day containing `at`.
    pub fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset()).date_naive()
    }
}
