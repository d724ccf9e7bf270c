use bossroom_core::stats::{
    calculate_current_streak, calculate_longest_streak, calculate_weekly_growth, week_total,
    DailyHistoryEntry,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Subcommand;
use serde::Serialize;

use super::session;

#[derive(Subcommand)]
pub enum StatsAction {
    /// Today's totals
    Today,
    /// Current and longest streak of active days
    Streak,
    /// Per-day history
    History {
        /// Number of days to show, ending today
        #[arg(long, default_value = "7")]
        days: u32,
    },
    /// This week's focus compared with last week's
    Growth,
    /// Most recent battle results
    Recent {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Serialize)]
struct Streak {
    current: u32,
    longest: u32,
}

#[derive(Serialize)]
struct Growth {
    week_ending: NaiveDate,
    this_week_secs: u64,
    last_week_secs: u64,
    growth_percent: f64,
}

pub fn run(action: StatsAction, now: DateTime<Utc>) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = session::open(now)?;
    let engine = coordinator.engine();
    let history = engine.history();
    let today = engine.calendar().day_of(now);

    match action {
        StatsAction::Today => {
            let entry = history
                .iter()
                .find(|e| e.date == today)
                .cloned()
                .unwrap_or(DailyHistoryEntry {
                    date: today,
                    focused_secs: 0,
                    wasted_secs: 0,
                    session_count: 0,
                });
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        StatsAction::Streak => {
            let streak = Streak {
                current: calculate_current_streak(history, today),
                longest: calculate_longest_streak(history),
            };
            println!("{}", serde_json::to_string_pretty(&streak)?);
        }
        StatsAction::History { days } => {
            let since = today - Duration::days(i64::from(days.saturating_sub(1)));
            let mut entries: Vec<&DailyHistoryEntry> = history
                .iter()
                .filter(|e| e.date >= since && e.date <= today)
                .collect();
            entries.sort_by_key(|e| e.date);
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        StatsAction::Growth => {
            let this_week_secs = week_total(history, today);
            let last_week_secs = week_total(history, today - Duration::days(7));
            let growth = Growth {
                week_ending: today,
                this_week_secs,
                last_week_secs,
                growth_percent: calculate_weekly_growth(this_week_secs, last_week_secs),
            };
            println!("{}", serde_json::to_string_pretty(&growth)?);
        }
        StatsAction::Recent { limit } => {
            let results = coordinator.store().recent_results(limit)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }
    Ok(())
}
