//! Drives the engine for a queue of tasks.
//!
//! The coordinator is what a UI talks to: it owns the engine, the task
//! queue, the rest prompt, the reminder scheduler, the focus-group tracker
//! for multi-task battles and the snapshot store. After each call the UI drains [`Event`]s with
//! [`BattleCoordinator::pump`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::engine::{ReconcileOutcome, SessionEngine};
use super::focus_group::FocusGroupSession;
use super::result::SessionResult;
use super::task::{Task, TemplateLookup};
use crate::error::Result;
use crate::events::Event;
use crate::reminder::{ReminderScheduler, ScheduledTask};
use crate::rest_prompt::RestPromptService;
use crate::storage::{Config, SnapshotStore};

pub struct BattleCoordinator<S: SnapshotStore> {
    engine: SessionEngine,
    queue: VecDeque<Task>,
    rest: RestPromptService,
    reminders: ReminderScheduler,
    focus_group: Option<FocusGroupSession>,
    auto_advance: bool,
    store: S,
}

impl<S: SnapshotStore> BattleCoordinator<S> {
    pub fn new(engine: SessionEngine, rest: RestPromptService, store: S) -> Self {
        Self {
            engine,
            queue: VecDeque::new(),
            rest,
            reminders: ReminderScheduler::default(),
            focus_group: None,
            auto_advance: false,
            store,
        }
    }

    /// Build from config and reload whatever the store holds.
    ///
    /// # Errors
    /// Returns an error if the stored snapshot cannot be read or decoded.
    pub fn from_config(config: &Config, store: S) -> Result<Self> {
        let mut engine = SessionEngine::new(config.engine.clone(), config.calendar());
        if let Some(snapshot) = store.load()? {
            engine.restore(snapshot);
        }
        let mut coordinator = Self::new(engine, config.rest_prompt(), store);
        coordinator.auto_advance = config.auto_advance;
        coordinator.reminders = config.reminder_scheduler();
        Ok(coordinator)
    }

    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }

    /// Carry over a rest prompt from a previous run.
    pub fn with_rest_prompt(mut self, rest: RestPromptService) -> Self {
        self.rest = rest;
        self
    }

    /// Carry over reminder firings from a previous run. The configured lead
    /// time wins over the stored one.
    pub fn with_reminders(mut self, mut reminders: ReminderScheduler) -> Self {
        reminders.set_lead_time_min(self.reminders.lead_time_min());
        self.reminders = reminders;
        self
    }

    /// Carry over the tracker of an in-progress multi-task battle.
    pub fn with_focus_group(mut self, focus_group: Option<FocusGroupSession>) -> Self {
        self.focus_group = focus_group.filter(|_| self.engine.state().has_active_task());
        self
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SessionEngine {
        &mut self.engine
    }

    pub fn rest_prompt(&self) -> &RestPromptService {
        &self.rest
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn queued(&self) -> impl Iterator<Item = &Task> {
        self.queue.iter()
    }

    pub fn enqueue(&mut self, task: Task) {
        self.queue.push_back(task);
    }

    /// Spawn a task from a template and queue it.
    pub fn enqueue_template(&mut self, template_id: &str, lookup: &dyn TemplateLookup) -> bool {
        match lookup.template(template_id) {
            Some(template) => {
                self.queue.push_back(Task::from_template(template));
                true
            }
            None => {
                debug!(template_id, "unknown template");
                false
            }
        }
    }

    /// Start the next queued task. False if the queue is empty or a battle
    /// is already active.
    pub fn start_next(&mut self, at: DateTime<Utc>) -> bool {
        if self.engine.state().has_active_task() {
            return false;
        }
        let Some(task) = self.queue.pop_front() else {
            return false;
        };
        self.focus_group = task
            .focus_group()
            .map(|payload| FocusGroupSession::from_payload(payload, at));
        self.engine.start_battle(task, at)
    }

    /// Switch the active member of a running multi-task battle.
    pub fn switch_member(&mut self, index: usize, at: DateTime<Utc>) -> bool {
        match self.focus_group.as_mut() {
            Some(group) if self.engine.state().has_active_task() => group.switch_to(index, at),
            _ => false,
        }
    }

    pub fn focus_group(&self) -> Option<&FocusGroupSession> {
        self.focus_group.as_ref()
    }

    pub fn active_member(&self) -> Option<&str> {
        self.focus_group.as_ref().and_then(FocusGroupSession::active_member)
    }

    /// End a multi-task battle with the tracked allocation.
    pub fn end_exploration(&mut self, at: DateTime<Utc>) -> Option<SessionResult> {
        let summary = self.focus_group.as_mut().map(|g| g.end(at));
        self.engine.end_exploration(summary, at)
    }

    pub fn tick(&mut self, at: DateTime<Utc>) -> Result<Vec<Event>> {
        self.engine.tick(at);
        self.pump()
    }

    /// Drain engine events, reacting to finished battles.
    ///
    /// Each result feeds the rest prompt; the snapshot is saved after a
    /// battle ends. With auto-advance on, the next task starts unless a
    /// rest was just suggested.
    pub fn pump(&mut self) -> Result<Vec<Event>> {
        let mut out = Vec::new();
        loop {
            let batch = self.engine.drain_events();
            if batch.is_empty() {
                break;
            }
            for event in batch {
                let ended = event.session_result().cloned();
                out.push(event);
                let Some(result) = ended else {
                    continue;
                };
                self.focus_group = None;
                let suggested = self.rest.record_focus(result.focused_secs);
                if suggested {
                    info!(focused_secs = self.rest.accumulated_secs(), "rest suggested");
                    out.push(Event::RestSuggested {
                        focused_secs: self.rest.accumulated_secs(),
                    });
                }
                self.persist()?;
                if self.auto_advance && !suggested {
                    self.start_next(result.ended_at);
                }
            }
        }
        Ok(out)
    }

    /// Reminders that came due among `tasks` as of `at`.
    pub fn check_reminders(&mut self, tasks: &[ScheduledTask], at: DateTime<Utc>) -> Vec<Event> {
        self.reminders
            .evaluate(tasks, at)
            .into_iter()
            .map(Event::from)
            .collect()
    }

    /// Re-arm a task's reminder after a snooze or reschedule.
    pub fn reset_reminder(&mut self, task_id: &str) {
        self.reminders.reset(task_id);
    }

    /// User accepted the rest suggestion.
    pub fn take_rest(&mut self, at: DateTime<Utc>) -> bool {
        if !self.engine.start_rest(at) {
            return false;
        }
        self.rest.reset_after_rest();
        true
    }

    /// User declined the rest suggestion.
    pub fn decline_rest(&mut self) {
        self.rest.reset_after_continue();
    }

    pub fn on_background(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.engine.handle_backgrounding(at);
        self.persist()
    }

    pub fn on_foreground(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.engine.handle_foregrounding(at);
        self.persist()
    }

    /// Cold start: roll the day and attribute the offline gap.
    pub fn on_launch(
        &mut self,
        last_seen_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        self.engine.roll_day(now);
        let outcome = self.engine.reconcile(last_seen_at, now);
        self.persist()?;
        Ok(outcome)
    }

    pub fn persist(&mut self) -> Result<()> {
        self.store.save(&self.engine.snapshot())
    }
}
