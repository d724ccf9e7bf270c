//! Immutable facts produced by a battle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::focus_group::FocusGroupSummary;

/// Why a battle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// Task completed.
    Victory,
    /// Time ran out while the task still had remaining duration.
    Retreat,
    /// User gave up, or the battle was force-ended after a long offline gap.
    IncompleteExit,
    /// A multi-task session was wrapped up.
    CompletedExploration,
}

/// One completed battle. Exactly one per started task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub task_id: String,
    pub task_name: String,
    pub focused_secs: u64,
    pub wasted_secs: u64,
    pub end_reason: EndReason,
    /// Only set for non-victory endings of focus-style tasks.
    #[serde(default)]
    pub remaining_secs_at_exit: Option<u64>,
    #[serde(default)]
    pub focus_group: Option<FocusGroupSummary>,
    pub ended_at: DateTime<Utc>,
}

impl SessionResult {
    pub fn is_victory(&self) -> bool {
        self.end_reason == EndReason::Victory
    }
}

/// A consumed freeze token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreezeRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: u64,
    pub task_name: String,
}
