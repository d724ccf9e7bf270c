//! Statistics module for Bossroom
//!
//! Folds finished battles into the per-day history ledger and derives
//! streaks and week-over-week growth from it.

mod history;

pub use history::{
    calculate_current_streak, calculate_longest_streak, calculate_weekly_growth, update_history,
    week_total, DailyHistoryEntry, SessionTotals,
};
