//! Bosses: the time-boxed tasks a battle is fought against.
//!
//! A task's `remaining_ms` is its hit points. Only the engine writes it, and
//! it always stays within `0..=max_duration_ms`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name written into snapshots when no task is active.
pub const IDLE_TASK_NAME: &str = "Idle";

/// Longest task the engine accepts. Keeps every duration representable as
/// signed milliseconds for storage and chrono arithmetic.
pub const MAX_DURATION_MS: u64 = i64::MAX as u64;

/// How a task's clock behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleStyle {
    /// Strict countdown; can time out.
    Focus,
    /// No countdown and no failure; completed by hand.
    Passive,
}

/// Member list for a session that covers several tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusGroupPayload {
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub active_index: usize,
}

/// Single task, or a bundle of member tasks sharing one clock.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "TaskModeRepr", into = "TaskModeRepr")]
pub enum TaskMode {
    #[default]
    Single,
    FocusGroup(FocusGroupPayload),
}

// Wire form: the bare tag `"single"`, or `{"focusGroup": {...}}` when the
// mode carries data. Decoding tries the bare tag first.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TaskModeRepr {
    Simple(String),
    Structured(StructuredMode),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum StructuredMode {
    FocusGroup(FocusGroupPayload),
}

impl TryFrom<TaskModeRepr> for TaskMode {
    type Error = String;

    fn try_from(repr: TaskModeRepr) -> Result<Self, Self::Error> {
        match repr {
            TaskModeRepr::Simple(tag) => match tag.as_str() {
                "single" => Ok(TaskMode::Single),
                other => Err(format!("unknown task mode: {other}")),
            },
            TaskModeRepr::Structured(StructuredMode::FocusGroup(payload)) => {
                Ok(TaskMode::FocusGroup(payload))
            }
        }
    }
}

impl From<TaskMode> for TaskModeRepr {
    fn from(mode: TaskMode) -> Self {
        match mode {
            TaskMode::Single => TaskModeRepr::Simple("single".into()),
            TaskMode::FocusGroup(payload) => {
                TaskModeRepr::Structured(StructuredMode::FocusGroup(payload))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    max_duration_ms: u64,
    remaining_ms: u64,
    pub style: BattleStyle,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub mode: TaskMode,
}

impl Task {
    /// A fresh task at full health.
    pub fn new(name: impl Into<String>, max_duration_secs: u64, style: BattleStyle) -> Self {
        let max_duration_ms = max_duration_secs
            .saturating_mul(1000)
            .min(MAX_DURATION_MS);
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            max_duration_ms,
            remaining_ms: max_duration_ms,
            style,
            template_id: None,
            mode: TaskMode::Single,
        }
    }

    pub fn focus(name: impl Into<String>, max_duration_secs: u64) -> Self {
        Self::new(name, max_duration_secs, BattleStyle::Focus)
    }

    pub fn passive(name: impl Into<String>, max_duration_secs: u64) -> Self {
        Self::new(name, max_duration_secs, BattleStyle::Passive)
    }

    /// Spawn a task from a template.
    pub fn from_template(template: &TaskTemplate) -> Self {
        let mut task = Self::new(
            template.name.clone(),
            template.max_duration_secs,
            template.style,
        );
        task.template_id = Some(template.id.clone());
        task
    }

    pub fn with_focus_group(mut self, payload: FocusGroupPayload) -> Self {
        self.mode = TaskMode::FocusGroup(payload);
        self
    }

    /// Placeholder stored in snapshots while nothing is active.
    pub fn idle_marker() -> Self {
        Self {
            id: String::new(),
            name: IDLE_TASK_NAME.into(),
            max_duration_ms: 0,
            remaining_ms: 0,
            style: BattleStyle::Passive,
            template_id: None,
            mode: TaskMode::Single,
        }
    }

    /// Real tasks always carry a uuid, so an empty id marks the placeholder.
    pub fn is_idle_marker(&self) -> bool {
        self.id.is_empty() && self.name == IDLE_TASK_NAME && self.max_duration_ms == 0
    }

    pub fn max_duration_ms(&self) -> u64 {
        self.max_duration_ms
    }

    pub fn max_duration_secs(&self) -> u64 {
        self.max_duration_ms / 1000
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining_ms
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_ms / 1000
    }

    pub fn is_focus(&self) -> bool {
        self.style == BattleStyle::Focus
    }

    pub fn focus_group(&self) -> Option<&FocusGroupPayload> {
        match &self.mode {
            TaskMode::FocusGroup(payload) => Some(payload),
            TaskMode::Single => None,
        }
    }

    /// Set hit points, capped at full health.
    pub(crate) fn set_remaining(&mut self, remaining_ms: u64) {
        self.remaining_ms = remaining_ms.min(self.max_duration_ms);
    }

    /// Restore full health.
    pub(crate) fn reset_remaining(&mut self) {
        self.remaining_ms = self.max_duration_ms;
    }

    /// Repair a task decoded from storage so the hit-point invariant holds.
    pub(crate) fn normalized(mut self) -> Self {
        self.max_duration_ms = self.max_duration_ms.min(MAX_DURATION_MS);
        self.remaining_ms = self.remaining_ms.min(self.max_duration_ms);
        self
    }
}

/// Source a task can be spawned from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
    pub id: String,
    pub name: String,
    pub max_duration_secs: u64,
    pub style: BattleStyle,
}

/// Resolves template ids to templates.
pub trait TemplateLookup {
    fn template(&self, id: &str) -> Option<&TaskTemplate>;
}

impl TemplateLookup for HashMap<String, TaskTemplate> {
    fn template(&self, id: &str) -> Option<&TaskTemplate> {
        self.get(id)
    }
}

impl TemplateLookup for [TaskTemplate] {
    fn template(&self, id: &str) -> Option<&TaskTemplate> {
        self.iter().find(|t| t.id == id)
    }
}

/// Display name for a task, preferring the current template name.
pub fn display_name(task: &Task, lookup: &dyn TemplateLookup) -> String {
    task.template_id
        .as_deref()
        .and_then(|id| lookup.template(id))
        .map(|t| t.name.clone())
        .unwrap_or_else(|| task.name.clone())
}
