//! Per-day history ledger, streaks and week-over-week growth.
//!
//! The ledger holds at most one row per calendar day. Sessions are merged
//! into the row for their day rather than appended.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyHistoryEntry {
    pub date: NaiveDate,
    pub focused_secs: u64,
    pub wasted_secs: u64,
    pub session_count: u32,
}

/// One session's contribution to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTotals {
    pub date: NaiveDate,
    pub focused_secs: u64,
    pub wasted_secs: u64,
}

/// Merge `session` into the row for its day, appending a row if none exists.
pub fn update_history(history: &mut Vec<DailyHistoryEntry>, session: SessionTotals) {
    match history.iter_mut().find(|e| e.date == session.date) {
        Some(entry) => {
            entry.focused_secs += session.focused_secs;
            entry.wasted_secs += session.wasted_secs;
            entry.session_count += 1;
        }
        None => history.push(DailyHistoryEntry {
            date: session.date,
            focused_secs: session.focused_secs,
            wasted_secs: session.wasted_secs,
            session_count: 1,
        }),
    }
}

/// Consecutive active days ending today, or ending yesterday if nothing
/// has been logged yet today. Any older gap yields 0.
pub fn calculate_current_streak(history: &[DailyHistoryEntry], today: NaiveDate) -> u32 {
    let mut dates: Vec<NaiveDate> = history
        .iter()
        .filter(|e| e.date <= today)
        .map(|e| e.date)
        .collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.dedup();

    let Some(&latest) = dates.first() else {
        return 0;
    };
    let yesterday = today - Duration::days(1);
    if latest != today && latest != yesterday {
        return 0;
    }

    let mut streak = 0;
    let mut expected = latest;
    for date in dates {
        if date != expected {
            break;
        }
        streak += 1;
        expected = date - Duration::days(1);
    }
    streak
}

/// Longest run of consecutive days anywhere in the ledger.
pub fn calculate_longest_streak(history: &[DailyHistoryEntry]) -> u32 {
    let mut dates: Vec<NaiveDate> = history.iter().map(|e| e.date).collect();
    dates.sort_unstable();
    dates.dedup();

    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for date in dates {
        run = match prev {
            Some(p) if date - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(date);
    }
    best
}

/// Focused seconds over the 7 days ending on `week_ending` (inclusive).
pub fn week_total(history: &[DailyHistoryEntry], week_ending: NaiveDate) -> u64 {
    let start = week_ending - Duration::days(6);
    history
        .iter()
        .filter(|e| e.date >= start && e.date <= week_ending)
        .map(|e| e.focused_secs)
        .sum()
}

/// Percentage change from `previous` to `current`.
///
/// A zero baseline gives 100% for any activity this week, else 0%.
pub fn calculate_weekly_growth(current: u64, previous: u64) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    (current as f64 - previous as f64) / previous as f64 * 100.0
}
