use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::battle::{BattleStyle, ReconcileOutcome, SessionResult};

/// Every state change in the system produces an Event.
/// The UI drains them after each call; the coordinator consumes
/// `SessionEnded` to advance the queue and feed stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    BattleStarted {
        task_id: String,
        task_name: String,
        style: BattleStyle,
        max_duration_secs: u64,
        at: DateTime<Utc>,
    },
    BattlePaused {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    BattleResumed {
        at: DateTime<Utc>,
    },
    BattleFrozen {
        tokens_remaining: u32,
        at: DateTime<Utc>,
    },
    BattleThawed {
        frozen_ms: u64,
        at: DateTime<Utc>,
    },
    DistractionStarted {
        at: DateTime<Utc>,
    },
    /// `counted` is false when the interval fell inside the grace period.
    DistractionEnded {
        duration_ms: u64,
        counted: bool,
        at: DateTime<Utc>,
    },
    ImmunityGranted {
        tokens: u32,
    },
    ImmunityConsumed {
        at: DateTime<Utc>,
    },
    GapReconciled {
        gap_ms: u64,
        outcome: ReconcileOutcome,
        at: DateTime<Utc>,
    },
    SessionEnded {
        result: SessionResult,
    },
    RestStarted {
        at: DateTime<Utc>,
    },
    RestEnded {
        rested_ms: u64,
        at: DateTime<Utc>,
    },
    DayRolledOver {
        date: NaiveDate,
    },
    /// Cumulative focus crossed the rest threshold.
    RestSuggested {
        focused_secs: u64,
    },
    ReminderDue {
        task_id: String,
        task_name: String,
        secs_until: u64,
        overdue: bool,
    },
}

impl Event {
    /// The session result carried by this event, if any.
    pub fn session_result(&self) -> Option<&SessionResult> {
        match self {
            Event::SessionEnded { result } => Some(result),
            _ => None,
        }
    }
}
