//! "It's time" reminders for scheduled tasks.
//!
//! A reminder fires once `lead_time` before a task's `remind_at`, and only
//! once per distinct `remind_at`: rescheduling to a new time arms it again.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::elapsed_ms;
use crate::events::Event;

/// A task as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub remind_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderEvent {
    pub task_id: String,
    pub task_name: String,
    /// Seconds from evaluation until `remind_at`; zero once overdue.
    pub secs_until: u64,
    pub overdue: bool,
}

impl From<ReminderEvent> for Event {
    fn from(r: ReminderEvent) -> Self {
        Event::ReminderDue {
            task_id: r.task_id,
            task_name: r.task_name,
            secs_until: r.secs_until,
            overdue: r.overdue,
        }
    }
}

/// Serializes with its firing record so once-per-`remind_at` holds across
/// restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderScheduler {
    lead_time_min: u32,
    /// Task id -> the `remind_at` it last fired for.
    #[serde(default)]
    fired: HashMap<String, DateTime<Utc>>,
}

impl ReminderScheduler {
    pub fn new(lead_time_min: u32) -> Self {
        Self {
            lead_time_min,
            fired: HashMap::new(),
        }
    }

    pub fn lead_time_min(&self) -> u32 {
        self.lead_time_min
    }

    /// Change the lead time, keeping the firing record.
    pub fn set_lead_time_min(&mut self, lead_time_min: u32) {
        self.lead_time_min = lead_time_min;
    }

    /// Emit a reminder for every due task that has not fired for its
    /// current `remind_at`.
    pub fn evaluate(&mut self, tasks: &[ScheduledTask], at: DateTime<Utc>) -> Vec<ReminderEvent> {
        let lead = Duration::minutes(i64::from(self.lead_time_min));
        let mut due = Vec::new();
        for task in tasks.iter().filter(|t| !t.completed) {
            let Some(remind_at) = task.remind_at else {
                continue;
            };
            if at < remind_at - lead {
                continue;
            }
            if self.fired.get(&task.id) == Some(&remind_at) {
                continue;
            }
            debug!(task = %task.name, %remind_at, "reminder due");
            self.fired.insert(task.id.clone(), remind_at);
            due.push(ReminderEvent {
                task_id: task.id.clone(),
                task_name: task.name.clone(),
                secs_until: elapsed_ms(at, remind_at) / 1000,
                overdue: at > remind_at,
            });
        }
        due
    }

    /// Forget that `task_id` fired, e.g. after a snooze.
    pub fn reset(&mut self, task_id: &str) {
        self.fired.remove(task_id);
    }

    pub fn has_fired(&self, task_id: &str) -> bool {
        self.fired.contains_key(task_id)
    }
}
