//! Battle session engine.
//!
//! A timestamp-driven state machine. It never reads the wall clock: every
//! operation takes the caller's `at`, and the caller is responsible for
//! calling `tick()` periodically while a battle is running.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Fighting <-> Paused
//!         Fighting <-> Frozen
//!         Fighting -> (Victory | Retreat) -> Idle
//! Idle -> Resting -> Idle
//! ```
//!
//! ## Accounting
//!
//! Progress on a focus-style task is *effective combat time*: elapsed
//! running time minus wasted (distracted) time. Elapsed time is kept as
//! `elapsed_before_ms` (closed runs) plus the open run since
//! `run_started_at`. Remaining hit points are `max - effective`.
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = SessionEngine::default();
//! engine.start_battle(Task::focus("Write", 1500), now);
//! // In a loop:
//! if let Some(result) = engine.tick(clock.now()) { /* battle over */ }
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::focus_group::{FocusGroupSession, FocusGroupSummary};
use super::result::{EndReason, FreezeRecord, SessionResult};
use super::snapshot::{EngineSnapshot, SNAPSHOT_VERSION};
use super::task::Task;
use crate::calendar::DayCalendar;
use crate::clock::elapsed_ms;
use crate::events::Event;
use crate::stats::{update_history, DailyHistoryEntry, SessionTotals};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Fighting,
    Paused,
    Frozen,
    Resting,
    Victory,
    Retreat,
}

impl SessionState {
    /// States in which a clock is running.
    pub fn is_running(self) -> bool {
        matches!(self, SessionState::Fighting | SessionState::Resting)
    }

    /// States in which a task is current.
    pub fn has_active_task(self) -> bool {
        matches!(
            self,
            SessionState::Fighting | SessionState::Paused | SessionState::Frozen
        )
    }
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Distractions shorter than this are forgiven.
    #[serde(default = "default_distraction_grace_secs")]
    pub distraction_grace_secs: u64,
    /// Offline gaps shorter than this are ignored on reconcile.
    #[serde(default = "default_reconcile_negligible_secs")]
    pub reconcile_negligible_secs: u64,
    /// Offline gaps longer than this end the battle on reconcile.
    #[serde(default = "default_reconcile_retreat_secs")]
    pub reconcile_retreat_secs: u64,
    /// Freeze tokens available per task.
    #[serde(default = "default_freeze_token_cap")]
    pub freeze_token_cap: u32,
    /// How long after starting a battle it may still be undone.
    #[serde(default = "default_abort_grace_secs")]
    pub abort_grace_secs: u64,
}

fn default_distraction_grace_secs() -> u64 {
    10
}
fn default_reconcile_negligible_secs() -> u64 {
    30
}
fn default_reconcile_retreat_secs() -> u64 {
    300
}
fn default_freeze_token_cap() -> u32 {
    3
}
fn default_abort_grace_secs() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            distraction_grace_secs: default_distraction_grace_secs(),
            reconcile_negligible_secs: default_reconcile_negligible_secs(),
            reconcile_retreat_secs: default_reconcile_retreat_secs(),
            freeze_token_cap: default_freeze_token_cap(),
            abort_grace_secs: default_abort_grace_secs(),
        }
    }
}

/// What `reconcile` did with an offline gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// No battle running; nothing to attribute.
    Inactive,
    /// Immunity was spent; the gap counts as progress.
    Immune,
    /// Gap too short to matter.
    Negligible,
    /// Gap added to wasted time.
    Wasted,
    /// Gap too long; the battle was ended.
    Retreated,
}

#[derive(Debug, Clone)]
pub struct SessionEngine {
    config: EngineConfig,
    calendar: DayCalendar,
    state: SessionState,
    current: Option<Task>,
    battle_started_at: Option<DateTime<Utc>>,
    /// Start of the open run (fighting or resting).
    run_started_at: Option<DateTime<Utc>>,
    elapsed_before_ms: u64,
    wasted_ms: u64,
    immune: bool,
    immunity_tokens: u32,
    distraction_started_at: Option<DateTime<Utc>>,
    freeze_tokens_used: u32,
    freeze_log: Vec<FreezeRecord>,
    freeze_started_at: Option<DateTime<Utc>>,
    today: Option<NaiveDate>,
    today_focused_secs: u64,
    history: Vec<DailyHistoryEntry>,
    end_reason: Option<EndReason>,
    exit_remaining_ms: Option<u64>,
    pending_summary: Option<FocusGroupSummary>,
    finalized: bool,
    last_result: Option<SessionResult>,
    events: VecDeque<Event>,
}

impl Default for SessionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default(), DayCalendar::default())
    }
}

impl SessionEngine {
    pub fn new(config: EngineConfig, calendar: DayCalendar) -> Self {
        Self {
            config,
            calendar,
            state: SessionState::Idle,
            current: None,
            battle_started_at: None,
            run_started_at: None,
            elapsed_before_ms: 0,
            wasted_ms: 0,
            immune: false,
            immunity_tokens: 0,
            distraction_started_at: None,
            freeze_tokens_used: 0,
            freeze_log: Vec::new(),
            freeze_started_at: None,
            today: None,
            today_focused_secs: 0,
            history: Vec::new(),
            end_reason: None,
            exit_remaining_ms: None,
            pending_summary: None,
            finalized: false,
            last_result: None,
            events: VecDeque::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calendar(&self) -> DayCalendar {
        self.calendar
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current.as_ref()
    }

    pub fn wasted_ms(&self) -> u64 {
        self.wasted_ms
    }

    pub fn wasted_secs(&self) -> u64 {
        self.wasted_ms / 1000
    }

    pub fn is_immune(&self) -> bool {
        self.immune
    }

    pub fn immunity_tokens(&self) -> u32 {
        self.immunity_tokens
    }

    pub fn has_open_distraction(&self) -> bool {
        self.distraction_started_at.is_some()
    }

    pub fn freeze_tokens_remaining(&self) -> u32 {
        self.config
            .freeze_token_cap
            .saturating_sub(self.freeze_tokens_used)
    }

    pub fn freeze_log(&self) -> &[FreezeRecord] {
        &self.freeze_log
    }

    pub fn history(&self) -> &[DailyHistoryEntry] {
        &self.history
    }

    pub fn today_focused_secs(&self) -> u64 {
        self.today_focused_secs
    }

    /// Calendar day the engine is currently tracking.
    pub fn today(&self) -> Option<NaiveDate> {
        self.today
    }

    /// Result of the most recently finalized battle.
    pub fn last_result(&self) -> Option<&SessionResult> {
        self.last_result.as_ref()
    }

    /// Elapsed running time for the current battle as of `at`.
    pub fn total_elapsed_ms(&self, at: DateTime<Utc>) -> u64 {
        let open = self.run_started_at.map(|s| elapsed_ms(s, at)).unwrap_or(0);
        self.elapsed_before_ms.saturating_add(open)
    }

    /// Wasted time including an open distraction interval.
    pub fn wasted_so_far_ms(&self, at: DateTime<Utc>) -> u64 {
        let open = self
            .distraction_started_at
            .map(|s| elapsed_ms(s, at))
            .unwrap_or(0);
        self.wasted_ms.saturating_add(open)
    }

    pub fn effective_combat_ms(&self, at: DateTime<Utc>) -> u64 {
        self.total_elapsed_ms(at)
            .saturating_sub(self.wasted_so_far_ms(at))
    }

    /// Remaining hit points as of `at`, without mutating anything.
    pub fn remaining_ms(&self, at: DateTime<Utc>) -> u64 {
        match &self.current {
            Some(task) if task.is_focus() && self.state == SessionState::Fighting => task
                .max_duration_ms()
                .saturating_sub(self.effective_combat_ms(at)),
            Some(task) => task.remaining_ms(),
            None => 0,
        }
    }

    /// 0.0 .. 1.0 progress through the current focus task.
    pub fn progress(&self, at: DateTime<Utc>) -> f64 {
        let Some(task) = &self.current else {
            return 0.0;
        };
        let total = task.max_duration_ms();
        if total == 0 {
            return 0.0;
        }
        1.0 - (self.remaining_ms(at) as f64 / total as f64)
    }

    /// Take all events emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    // ── Battle lifecycle ─────────────────────────────────────────────

    /// Begin fighting `task`. Fails while another task is active.
    pub fn start_battle(&mut self, task: Task, at: DateTime<Utc>) -> bool {
        if self.state.has_active_task() {
            warn!(state = ?self.state, "start_battle ignored: a battle is already active");
            return false;
        }
        if self.state == SessionState::Resting {
            self.end_rest(at);
        }
        self.advance_day(at);

        let mut task = task.normalized();
        task.reset_remaining();
        info!(task = %task.name, max_secs = task.max_duration_secs(), style = ?task.style, "battle started");
        self.events.push_back(Event::BattleStarted {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            style: task.style,
            max_duration_secs: task.max_duration_secs(),
            at,
        });

        self.current = Some(task);
        self.battle_started_at = Some(at);
        self.run_started_at = Some(at);
        self.elapsed_before_ms = 0;
        self.wasted_ms = 0;
        self.immune = false;
        self.distraction_started_at = None;
        self.freeze_tokens_used = 0;
        self.freeze_started_at = None;
        self.end_reason = None;
        self.exit_remaining_ms = None;
        self.pending_summary = None;
        self.finalized = false;
        self.state = SessionState::Fighting;
        true
    }

    pub fn pause(&mut self, at: DateTime<Utc>) -> bool {
        if self.state != SessionState::Fighting {
            return false;
        }
        self.close_run(at);
        self.refresh_remaining(at);
        self.state = SessionState::Paused;
        let remaining_secs = self.current.as_ref().map(Task::remaining_secs).unwrap_or(0);
        self.events.push_back(Event::BattlePaused { remaining_secs, at });
        true
    }

    pub fn resume(&mut self, at: DateTime<Utc>) -> bool {
        if self.state != SessionState::Paused {
            return false;
        }
        self.run_started_at = Some(at);
        self.state = SessionState::Fighting;
        self.events.push_back(Event::BattleResumed { at });
        true
    }

    /// Spend a freeze token and stop the clock.
    ///
    /// Fails when not fighting, when the task is passive, or when no tokens
    /// remain.
    pub fn freeze(&mut self, at: DateTime<Utc>) -> bool {
        if self.state != SessionState::Fighting {
            return false;
        }
        if !self.current.as_ref().is_some_and(Task::is_focus) {
            return false;
        }
        if self.freeze_tokens_remaining() == 0 {
            debug!("freeze refused: no tokens left");
            return false;
        }
        self.close_run(at);
        self.refresh_remaining(at);
        self.freeze_started_at = Some(at);
        self.freeze_tokens_used += 1;
        self.state = SessionState::Frozen;
        self.events.push_back(Event::BattleFrozen {
            tokens_remaining: self.freeze_tokens_remaining(),
            at,
        });
        true
    }

    pub fn resume_from_freeze(&mut self, at: DateTime<Utc>) -> bool {
        if self.state != SessionState::Frozen {
            return false;
        }
        let frozen_ms = self.close_freeze(at);
        self.run_started_at = Some(at);
        self.state = SessionState::Fighting;
        self.events.push_back(Event::BattleThawed { frozen_ms, at });
        true
    }

    /// Give up on the current task.
    pub fn retreat(&mut self, at: DateTime<Utc>) -> Option<SessionResult> {
        if !self.state.has_active_task() {
            return None;
        }
        self.capture_exit(at);
        self.end_reason = Some(EndReason::IncompleteExit);
        self.state = SessionState::Retreat;
        self.finalize(at)
    }

    /// Wrap up a multi-task session.
    ///
    /// Without a `summary`, one is derived from the task's focus-group
    /// payload, crediting the active member with the whole battle.
    pub fn end_exploration(
        &mut self,
        summary: Option<FocusGroupSummary>,
        at: DateTime<Utc>,
    ) -> Option<SessionResult> {
        if !self.state.has_active_task() {
            return None;
        }
        self.capture_exit(at);
        self.end_reason = Some(EndReason::CompletedExploration);
        self.pending_summary = summary.or_else(|| self.derived_summary(at));
        self.state = SessionState::Retreat;
        self.finalize(at)
    }

    /// Undo a battle started moments ago. Emits nothing.
    ///
    /// Only allowed within `abort_grace_secs` of the start.
    pub fn abort_session(&mut self, at: DateTime<Utc>) -> bool {
        if !self.state.has_active_task() {
            return false;
        }
        let within_grace = self
            .battle_started_at
            .is_some_and(|s| elapsed_ms(s, at) <= self.config.abort_grace_secs * 1000);
        if !within_grace {
            return false;
        }
        info!("battle aborted");
        self.current = None;
        self.clear_battle_markers();
        self.elapsed_before_ms = 0;
        self.wasted_ms = 0;
        self.immune = false;
        self.freeze_tokens_used = 0;
        self.end_reason = None;
        self.exit_remaining_ms = None;
        self.pending_summary = None;
        self.state = SessionState::Idle;
        true
    }

    /// Finish a passive task by hand.
    pub fn complete_passive_task(&mut self, at: DateTime<Utc>) -> Option<SessionResult> {
        if !self.state.has_active_task() || self.current.as_ref().is_some_and(Task::is_focus) {
            return None;
        }
        self.capture_exit(at);
        self.exit_remaining_ms = None;
        self.end_reason = Some(EndReason::Victory);
        self.state = SessionState::Victory;
        self.finalize(at)
    }

    /// Instant win regardless of remaining time.
    pub fn force_complete_task(&mut self, at: DateTime<Utc>) -> Option<SessionResult> {
        if !self.state.has_active_task() {
            return None;
        }
        self.capture_exit(at);
        if let Some(task) = self.current.as_mut() {
            if task.is_focus() {
                task.set_remaining(0);
            }
        }
        self.exit_remaining_ms = None;
        self.end_reason = Some(EndReason::Victory);
        self.state = SessionState::Victory;
        self.finalize(at)
    }

    /// Advance the countdown. Returns the result when the battle ends.
    pub fn tick(&mut self, at: DateTime<Utc>) -> Option<SessionResult> {
        if self.state != SessionState::Fighting {
            return None;
        }
        let (max_ms, is_focus) = match &self.current {
            Some(task) => (task.max_duration_ms(), task.is_focus()),
            None => return None,
        };
        if !is_focus {
            return None;
        }
        if self.run_started_at.is_none() {
            self.run_started_at = Some(at);
        }

        let total = self.total_elapsed_ms(at);
        let wasted = self.wasted_so_far_ms(at);
        let effective = total.saturating_sub(wasted);
        let remaining = max_ms.saturating_sub(effective);
        if let Some(task) = self.current.as_mut() {
            task.set_remaining(remaining);
        }

        if total >= max_ms {
            self.settle_running(at, total, wasted);
            if remaining == 0 {
                self.end_reason = Some(EndReason::Victory);
                self.state = SessionState::Victory;
            } else {
                info!(remaining_ms = remaining, wasted_ms = wasted, "time over with boss alive");
                self.end_reason = Some(EndReason::Retreat);
                self.exit_remaining_ms = Some(remaining);
                self.state = SessionState::Retreat;
            }
            return self.finalize(at);
        }
        if remaining == 0 {
            self.settle_running(at, total, wasted);
            self.end_reason = Some(EndReason::Victory);
            self.state = SessionState::Victory;
            return self.finalize(at);
        }
        None
    }

    // ── App lifecycle ────────────────────────────────────────────────

    /// App left the foreground. Returns true if a distraction was opened.
    pub fn handle_backgrounding(&mut self, at: DateTime<Utc>) -> bool {
        if self.state != SessionState::Fighting || self.immune {
            return false;
        }
        if self.distraction_started_at.is_some() {
            return false;
        }
        self.distraction_started_at = Some(at);
        self.events.push_back(Event::DistractionStarted { at });
        true
    }

    /// App returned. Spends immunity if active, else closes the distraction.
    pub fn handle_foregrounding(&mut self, at: DateTime<Utc>) {
        if self.state != SessionState::Fighting {
            return;
        }
        if self.immune {
            self.consume_immunity(at);
            return;
        }
        self.close_distraction(at);
    }

    /// Attribute time during which the process was not running.
    pub fn reconcile(&mut self, last_seen_at: DateTime<Utc>, now: DateTime<Utc>) -> ReconcileOutcome {
        if self.state != SessionState::Fighting {
            return ReconcileOutcome::Inactive;
        }
        let gap_ms = elapsed_ms(last_seen_at, now);

        let outcome = if self.immune {
            self.consume_immunity(now);
            ReconcileOutcome::Immune
        } else if gap_ms < self.config.reconcile_negligible_secs * 1000 {
            ReconcileOutcome::Negligible
        } else if gap_ms > self.config.reconcile_retreat_secs * 1000 {
            ReconcileOutcome::Retreated
        } else {
            // An open distraction already covers part of the gap.
            let covered = self
                .distraction_started_at
                .map(|d| elapsed_ms(d.max(last_seen_at), now))
                .unwrap_or(0);
            self.wasted_ms += gap_ms.saturating_sub(covered);
            ReconcileOutcome::Wasted
        };
        debug!(gap_ms, ?outcome, "offline gap reconciled");
        self.events.push_back(Event::GapReconciled {
            gap_ms,
            outcome,
            at: now,
        });

        if outcome == ReconcileOutcome::Retreated {
            self.retreat(last_seen_at);
        }
        outcome
    }

    // ── Immunity ─────────────────────────────────────────────────────

    pub fn grant_immunity(&mut self, tokens: u32) {
        self.immunity_tokens = self.immunity_tokens.saturating_add(tokens);
        self.events.push_back(Event::ImmunityGranted {
            tokens: self.immunity_tokens,
        });
    }

    /// Spend a token to shield the next backgrounding.
    pub fn activate_immunity(&mut self) -> bool {
        if self.immune || self.immunity_tokens == 0 {
            return false;
        }
        self.immunity_tokens -= 1;
        self.immune = true;
        true
    }

    // ── Rest and days ────────────────────────────────────────────────

    pub fn start_rest(&mut self, at: DateTime<Utc>) -> bool {
        if !matches!(
            self.state,
            SessionState::Idle | SessionState::Victory | SessionState::Retreat
        ) {
            return false;
        }
        self.run_started_at = Some(at);
        self.state = SessionState::Resting;
        self.events.push_back(Event::RestStarted { at });
        true
    }

    pub fn end_rest(&mut self, at: DateTime<Utc>) -> bool {
        if self.state != SessionState::Resting {
            return false;
        }
        let rested_ms = self.run_started_at.take().map(|s| elapsed_ms(s, at)).unwrap_or(0);
        self.state = SessionState::Idle;
        self.events.push_back(Event::RestEnded { rested_ms, at });
        true
    }

    /// Move to the calendar day of `at`. Returns true if the day changed.
    ///
    /// A finished battle left on screen goes back to idle on a new day.
    pub fn roll_day(&mut self, at: DateTime<Utc>) -> bool {
        if !self.advance_day(at) {
            return false;
        }
        if matches!(self.state, SessionState::Victory | SessionState::Retreat) {
            self.state = SessionState::Idle;
        }
        true
    }

    // ── Persistence ──────────────────────────────────────────────────

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            current_task: self.current.clone().unwrap_or_else(Task::idle_marker),
            state: self.state,
            run_started_at: self.run_started_at,
            elapsed_before_ms: self.elapsed_before_ms,
            wasted_ms: self.wasted_ms,
            immune: self.immune,
            immunity_tokens: self.immunity_tokens,
            distraction_started_at: self.distraction_started_at,
            freeze_tokens_used: self.freeze_tokens_used,
            freeze_log: self.freeze_log.clone(),
            freeze_started_at: self.freeze_started_at,
            battle_started_at: self.battle_started_at,
            today: self.today,
            today_focused_secs: self.today_focused_secs,
            history: self.history.clone(),
        }
    }

    /// Replace all accounting state with `snapshot`.
    ///
    /// Run markers are reinstated only for running states, so a reload
    /// never lets time advance for a paused or frozen battle.
    pub fn restore(&mut self, snapshot: EngineSnapshot) {
        let current = if snapshot.current_task.is_idle_marker() {
            None
        } else {
            Some(snapshot.current_task.normalized())
        };
        let mut state = snapshot.state;
        if current.is_none() && state.has_active_task() {
            warn!(?state, "snapshot has no task for an active state; restoring as idle");
            state = SessionState::Idle;
        }

        self.current = current;
        self.state = state;
        self.run_started_at = if state.is_running() {
            snapshot.run_started_at
        } else {
            None
        };
        self.distraction_started_at = if state == SessionState::Fighting {
            snapshot.distraction_started_at
        } else {
            None
        };
        self.freeze_started_at = if state == SessionState::Frozen {
            snapshot.freeze_started_at
        } else {
            None
        };
        self.battle_started_at = snapshot.battle_started_at;
        self.elapsed_before_ms = snapshot.elapsed_before_ms;
        self.wasted_ms = snapshot.wasted_ms;
        self.immune = snapshot.immune;
        self.immunity_tokens = snapshot.immunity_tokens;
        self.freeze_tokens_used = snapshot.freeze_tokens_used.min(self.config.freeze_token_cap);
        self.freeze_log = snapshot.freeze_log;
        self.today = snapshot.today;
        self.today_focused_secs = snapshot.today_focused_secs;
        self.history = snapshot.history;
        self.end_reason = None;
        self.exit_remaining_ms = None;
        self.pending_summary = None;
        self.finalized = false;
        self.events.clear();
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Fold the open run into `elapsed_before_ms`, closing any distraction.
    fn close_run(&mut self, at: DateTime<Utc>) {
        self.close_distraction(at);
        if let Some(start) = self.run_started_at.take() {
            self.elapsed_before_ms = self.elapsed_before_ms.saturating_add(elapsed_ms(start, at));
        }
    }

    /// Terminal fold used by `tick`: the open distraction counts in full.
    fn settle_running(&mut self, at: DateTime<Utc>, total_ms: u64, wasted_ms: u64) {
        if let Some(start) = self.distraction_started_at.take() {
            self.events.push_back(Event::DistractionEnded {
                duration_ms: elapsed_ms(start, at),
                counted: true,
                at,
            });
        }
        self.elapsed_before_ms = total_ms;
        self.wasted_ms = wasted_ms;
        self.run_started_at = None;
    }

    fn close_distraction(&mut self, at: DateTime<Utc>) {
        let Some(start) = self.distraction_started_at.take() else {
            return;
        };
        let duration_ms = elapsed_ms(start, at);
        let counted = duration_ms >= self.config.distraction_grace_secs * 1000;
        if counted {
            self.wasted_ms = self.wasted_ms.saturating_add(duration_ms);
        } else {
            debug!(duration_ms, "distraction inside grace period discarded");
        }
        self.events.push_back(Event::DistractionEnded {
            duration_ms,
            counted,
            at,
        });
    }

    fn close_freeze(&mut self, at: DateTime<Utc>) -> u64 {
        let start = self.freeze_started_at.take().unwrap_or(at);
        let duration_ms = elapsed_ms(start, at);
        self.freeze_log.push(FreezeRecord {
            start,
            end: at,
            duration_ms,
            task_name: self
                .current
                .as_ref()
                .map(|t| t.name.clone())
                .unwrap_or_default(),
        });
        duration_ms
    }

    fn consume_immunity(&mut self, at: DateTime<Utc>) {
        self.immune = false;
        self.events.push_back(Event::ImmunityConsumed { at });
    }

    /// Recompute a focus task's hit points from the accumulators.
    fn refresh_remaining(&mut self, at: DateTime<Utc>) {
        let effective = self.effective_combat_ms(at);
        if let Some(task) = self.current.as_mut() {
            if task.is_focus() {
                task.set_remaining(task.max_duration_ms().saturating_sub(effective));
            }
        }
    }

    /// Stop whatever clock is running and remember the exit hit points.
    fn capture_exit(&mut self, at: DateTime<Utc>) {
        match self.state {
            SessionState::Fighting => self.close_run(at),
            SessionState::Frozen => {
                self.close_freeze(at);
            }
            _ => {}
        }
        self.refresh_remaining(at);
        self.exit_remaining_ms = self
            .current
            .as_ref()
            .filter(|t| t.is_focus())
            .map(Task::remaining_ms);
    }

    fn derived_summary(&self, at: DateTime<Utc>) -> Option<FocusGroupSummary> {
        let payload = self.current.as_ref()?.focus_group()?;
        let started_at = self.battle_started_at.unwrap_or(at);
        Some(FocusGroupSession::from_payload(payload, started_at).end(at))
    }

    fn clear_battle_markers(&mut self) {
        self.run_started_at = None;
        self.distraction_started_at = None;
        self.freeze_started_at = None;
        self.battle_started_at = None;
    }

    /// Days only move forward; an earlier `at` leaves the tracked day alone.
    fn advance_day(&mut self, at: DateTime<Utc>) -> bool {
        let day = self.calendar.day_of(at);
        if self.today.is_some_and(|today| day <= today) {
            return false;
        }
        let had_day = self.today.is_some();
        self.today = Some(day);
        self.today_focused_secs = 0;
        if had_day {
            self.events.push_back(Event::DayRolledOver { date: day });
        }
        true
    }

    /// Turn the ended battle into its one result. No-op after the first call.
    fn finalize(&mut self, at: DateTime<Utc>) -> Option<SessionResult> {
        if self.finalized {
            return None;
        }
        let task = self.current.take()?;
        self.finalized = true;

        let focused_ms = if task.is_focus() {
            task.max_duration_ms().saturating_sub(task.remaining_ms())
        } else {
            self.effective_combat_ms(at)
        };
        let focused_secs = focused_ms / 1000;
        let wasted_secs = self.wasted_ms / 1000;
        let end_reason = self.end_reason.take().unwrap_or(EndReason::IncompleteExit);
        let remaining_secs_at_exit = match end_reason {
            EndReason::Victory => None,
            _ => self.exit_remaining_ms.take().map(|ms| ms / 1000),
        };

        self.advance_day(at);
        let date = self.calendar.day_of(at);
        update_history(
            &mut self.history,
            SessionTotals {
                date,
                focused_secs,
                wasted_secs,
            },
        );
        // A battle retreated as of yesterday is filed under yesterday only.
        if self.today == Some(date) {
            self.today_focused_secs += focused_secs;
        }

        let result = SessionResult {
            task_id: task.id,
            task_name: task.name,
            focused_secs,
            wasted_secs,
            end_reason,
            remaining_secs_at_exit,
            focus_group: self.pending_summary.take(),
            ended_at: at,
        };
        info!(
            task = %result.task_name,
            focused_secs,
            wasted_secs,
            reason = ?end_reason,
            "battle finalized"
        );
        self.clear_battle_markers();
        self.exit_remaining_ms = None;
        self.last_result = Some(result.clone());
        self.events.push_back(Event::SessionEnded {
            result: result.clone(),
        });
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::task::{FocusGroupPayload, IDLE_TASK_NAME};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    fn fighting(max_secs: u64) -> SessionEngine {
        let mut engine = SessionEngine::default();
        assert!(engine.start_battle(Task::focus("Boss", max_secs), t0()));
        engine
    }

    fn results(engine: &mut SessionEngine) -> Vec<SessionResult> {
        engine
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                Event::SessionEnded { result } => Some(result),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn full_countdown_ends_in_victory() {
        let mut engine = fighting(1500);
        assert!(engine.tick(at(600)).is_none());
        let result = engine.tick(at(1500)).expect("battle should end");

        assert_eq!(engine.state(), SessionState::Victory);
        assert_eq!(result.focused_secs, 1500);
        assert_eq!(result.end_reason, EndReason::Victory);
        assert_eq!(result.remaining_secs_at_exit, None);
        assert_eq!(results(&mut engine).len(), 1);
        assert!(engine.current_task().is_none());
    }

    #[test]
    fn repeated_ticks_after_victory_emit_nothing() {
        let mut engine = fighting(60);
        engine.tick(at(60));
        engine.tick(at(61));
        engine.tick(at(120));
        assert!(engine.retreat(at(130)).is_none());
        assert!(engine.force_complete_task(at(140)).is_none());
        assert_eq!(results(&mut engine).len(), 1);
        assert_eq!(engine.history()[0].session_count, 1);
    }

    #[test]
    fn tick_updates_remaining() {
        let mut engine = fighting(100);
        engine.tick(at(40));
        assert_eq!(engine.current_task().unwrap().remaining_secs(), 60);
        assert!((engine.progress(at(40)) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn wasted_time_past_the_window_ends_in_retreat() {
        let mut engine = fighting(100);
        engine.handle_backgrounding(at(10));
        engine.handle_foregrounding(at(40));
        assert_eq!(engine.wasted_secs(), 30);

        let result = engine.tick(at(100)).expect("time is over");
        assert_eq!(engine.state(), SessionState::Retreat);
        assert_eq!(result.end_reason, EndReason::Retreat);
        assert_eq!(result.remaining_secs_at_exit, Some(30));
        assert_eq!(result.focused_secs, 70);
        assert_eq!(result.wasted_secs, 30);
    }

    #[test]
    fn open_distraction_counts_in_full_when_time_runs_out() {
        let mut engine = fighting(100);
        engine.handle_backgrounding(at(95));
        let result = engine.tick(at(100)).unwrap();
        assert_eq!(result.wasted_secs, 5);
        assert_eq!(result.end_reason, EndReason::Retreat);
    }

    #[test]
    fn short_distraction_is_forgiven() {
        let mut engine = fighting(1500);
        assert!(engine.handle_backgrounding(at(100)));
        engine.handle_foregrounding(at(105));
        assert_eq!(engine.wasted_ms(), 0);
    }

    #[test]
    fn distraction_at_threshold_is_counted_exactly() {
        let mut engine = fighting(1500);
        engine.handle_backgrounding(at(100));
        engine.handle_foregrounding(at(110));
        assert_eq!(engine.wasted_ms(), 10_000);

        engine.handle_backgrounding(at(200));
        engine.handle_foregrounding(at(230));
        assert_eq!(engine.wasted_ms(), 40_000);
    }

    #[test]
    fn immunity_shields_one_backgrounding() {
        let mut engine = fighting(1500);
        engine.grant_immunity(1);
        assert!(engine.activate_immunity());
        assert!(!engine.handle_backgrounding(at(100)));
        engine.handle_foregrounding(at(400));
        assert_eq!(engine.wasted_ms(), 0);
        assert!(!engine.is_immune());

        assert!(engine.handle_backgrounding(at(500)));
        engine.handle_foregrounding(at(530));
        assert_eq!(engine.wasted_secs(), 30);
    }

    #[test]
    fn immunity_needs_a_token() {
        let mut engine = fighting(60);
        assert!(!engine.activate_immunity());
        engine.grant_immunity(1);
        assert!(engine.activate_immunity());
        assert!(!engine.activate_immunity());
        assert_eq!(engine.immunity_tokens(), 0);
    }

    #[test]
    fn pause_stops_the_clock() {
        let mut engine = fighting(100);
        assert!(engine.pause(at(30)));
        assert!(!engine.pause(at(31)));
        assert!(engine.tick(at(500)).is_none());
        assert!(engine.resume(at(500)));
        engine.tick(at(520));
        assert_eq!(engine.current_task().unwrap().remaining_secs(), 50);
    }

    #[test]
    fn freeze_logs_a_record_and_spends_a_token() {
        let mut engine = fighting(1500);
        assert!(engine.freeze(at(100)));
        assert_eq!(engine.state(), SessionState::Frozen);
        assert_eq!(engine.freeze_tokens_remaining(), 2);
        assert!(engine.tick(at(5000)).is_none());

        assert!(engine.resume_from_freeze(at(400)));
        assert_eq!(engine.freeze_log().len(), 1);
        assert_eq!(engine.freeze_log()[0].duration_ms, 300_000);
        assert_eq!(engine.freeze_log()[0].task_name, "Boss");

        engine.tick(at(500));
        assert_eq!(engine.current_task().unwrap().remaining_secs(), 1300);
    }

    #[test]
    fn freeze_fails_without_tokens() {
        let mut engine = fighting(1500);
        for i in 0..3 {
            assert!(engine.freeze(at(i * 10)));
            assert!(engine.resume_from_freeze(at(i * 10 + 5)));
        }
        assert!(!engine.freeze(at(100)));
        assert_eq!(engine.freeze_tokens_remaining(), 0);
    }

    #[test]
    fn freeze_fails_for_passive_tasks_and_wrong_states() {
        let mut engine = SessionEngine::default();
        assert!(!engine.freeze(t0()));
        engine.start_battle(Task::passive("Read", 600), t0());
        assert!(!engine.freeze(at(5)));
    }

    #[test]
    fn new_battle_replenishes_freeze_tokens() {
        let mut engine = fighting(60);
        engine.freeze(at(1));
        engine.resume_from_freeze(at(2));
        engine.retreat(at(3));
        engine.start_battle(Task::focus("Next", 60), at(10));
        assert_eq!(engine.freeze_tokens_remaining(), 3);
        assert_eq!(engine.freeze_log().len(), 1);
    }

    #[test]
    fn freeze_closes_open_distraction() {
        let mut engine = fighting(1500);
        engine.handle_backgrounding(at(100));
        assert!(engine.freeze(at(150)));
        assert_eq!(engine.wasted_secs(), 50);
        assert!(!engine.has_open_distraction());
    }

    #[test]
    fn retreat_captures_remaining() {
        let mut engine = fighting(1500);
        let result = engine.retreat(at(500)).unwrap();
        assert_eq!(engine.state(), SessionState::Retreat);
        assert_eq!(result.end_reason, EndReason::IncompleteExit);
        assert_eq!(result.remaining_secs_at_exit, Some(1000));
        assert_eq!(result.focused_secs, 500);
    }

    #[test]
    fn retreat_from_frozen_logs_the_freeze() {
        let mut engine = fighting(1500);
        engine.freeze(at(100));
        let result = engine.retreat(at(160)).unwrap();
        assert_eq!(result.focused_secs, 100);
        assert_eq!(engine.freeze_log()[0].duration_ms, 60_000);
    }

    #[test]
    fn passive_tasks_do_not_count_down() {
        let mut engine = SessionEngine::default();
        engine.start_battle(Task::passive("Read", 60), t0());
        assert!(engine.tick(at(10_000)).is_none());
        assert_eq!(engine.state(), SessionState::Fighting);

        let result = engine.complete_passive_task(at(900)).unwrap();
        assert_eq!(result.focused_secs, 900);
        assert_eq!(result.end_reason, EndReason::Victory);
        assert_eq!(result.remaining_secs_at_exit, None);
    }

    #[test]
    fn complete_passive_rejects_focus_tasks() {
        let mut engine = fighting(60);
        assert!(engine.complete_passive_task(at(10)).is_none());
        assert_eq!(engine.state(), SessionState::Fighting);
    }

    #[test]
    fn force_complete_is_a_full_victory() {
        let mut engine = fighting(1500);
        let result = engine.force_complete_task(at(5)).unwrap();
        assert_eq!(result.focused_secs, 1500);
        assert_eq!(engine.state(), SessionState::Victory);
    }

    #[test]
    fn abort_inside_grace_leaves_no_trace() {
        let mut engine = fighting(1500);
        engine.drain_events();
        assert!(engine.abort_session(at(5)));
        assert_eq!(engine.state(), SessionState::Idle);
        assert!(engine.drain_events().is_empty());
        assert!(engine.history().is_empty());
        assert!(engine.last_result().is_none());
    }

    #[test]
    fn abort_after_grace_is_refused() {
        let mut engine = fighting(1500);
        assert!(!engine.abort_session(at(60)));
        assert_eq!(engine.state(), SessionState::Fighting);
    }

    #[test]
    fn reconcile_thresholds() {
        let mut engine = fighting(1500);
        assert_eq!(engine.reconcile(at(100), at(129)), ReconcileOutcome::Negligible);
        assert_eq!(engine.wasted_ms(), 0);

        assert_eq!(engine.reconcile(at(200), at(231)), ReconcileOutcome::Wasted);
        assert_eq!(engine.wasted_ms(), 31_000);

        assert_eq!(engine.reconcile(at(300), at(601)), ReconcileOutcome::Retreated);
        assert_eq!(engine.state(), SessionState::Retreat);
        let result = engine.last_result().unwrap();
        assert_eq!(result.end_reason, EndReason::IncompleteExit);
        assert_eq!(result.ended_at, at(300));
    }

    #[test]
    fn reconcile_spends_immunity_and_credits_the_gap() {
        let mut engine = fighting(1500);
        engine.grant_immunity(1);
        engine.activate_immunity();
        assert_eq!(engine.reconcile(at(100), at(1000)), ReconcileOutcome::Immune);
        assert!(!engine.is_immune());
        assert_eq!(engine.wasted_ms(), 0);
        assert_eq!(engine.state(), SessionState::Fighting);
    }

    #[test]
    fn reconcile_does_not_double_count_an_open_distraction() {
        let mut engine = fighting(1500);
        engine.handle_backgrounding(at(100));
        assert_eq!(engine.reconcile(at(100), at(200)), ReconcileOutcome::Wasted);
        assert_eq!(engine.wasted_ms(), 0);
        engine.handle_foregrounding(at(200));
        assert_eq!(engine.wasted_secs(), 100);
    }

    #[test]
    fn reconcile_is_inactive_outside_fighting() {
        let mut engine = fighting(1500);
        engine.pause(at(10));
        assert_eq!(engine.reconcile(at(10), at(5000)), ReconcileOutcome::Inactive);
    }

    #[test]
    fn exploration_attaches_summary() {
        let mut engine = SessionEngine::default();
        let task = Task::passive("Sprint", 3600).with_focus_group(FocusGroupPayload {
            member_ids: vec!["a".into(), "b".into()],
            active_index: 1,
        });
        engine.start_battle(task, t0());
        let result = engine.end_exploration(None, at(120)).unwrap();
        assert_eq!(result.end_reason, EndReason::CompletedExploration);
        let summary = result.focus_group.unwrap();
        assert_eq!(summary.allocation_secs("b"), 120);
        assert_eq!(summary.allocation_secs("a"), 0);
    }

    #[test]
    fn cannot_start_over_an_active_battle() {
        let mut engine = fighting(60);
        assert!(!engine.start_battle(Task::focus("Other", 60), at(1)));
        assert_eq!(engine.current_task().unwrap().name, "Boss");
    }

    #[test]
    fn rest_runs_between_battles() {
        let mut engine = SessionEngine::default();
        assert!(engine.start_rest(t0()));
        assert!(engine.start_battle(Task::focus("After rest", 60), at(300)));
        let rest_end = engine
            .drain_events()
            .into_iter()
            .find_map(|e| match e {
                Event::RestEnded { rested_ms, .. } => Some(rested_ms),
                _ => None,
            });
        assert_eq!(rest_end, Some(300_000));
    }

    #[test]
    fn new_day_resets_today_and_idles() {
        let mut engine = fighting(60);
        engine.tick(at(60));
        assert_eq!(engine.today_focused_secs(), 60);

        assert!(engine.roll_day(at(24 * 3600)));
        assert_eq!(engine.state(), SessionState::Idle);
        assert_eq!(engine.today_focused_secs(), 0);
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn snapshot_round_trip_preserves_accounting() {
        let mut engine = fighting(1500);
        engine.handle_backgrounding(at(100));
        engine.handle_foregrounding(at(150));
        engine.handle_backgrounding(at(200));

        let snap = engine.snapshot();
        let mut restored = SessionEngine::default();
        restored.restore(snap.clone());
        assert_eq!(restored.snapshot(), snap);
        assert_eq!(
            restored.effective_combat_ms(at(300)),
            engine.effective_combat_ms(at(300))
        );
    }

    #[test]
    fn restore_drops_run_marker_for_paused_state() {
        let mut engine = fighting(1500);
        engine.pause(at(100));
        let mut snap = engine.snapshot();
        snap.run_started_at = Some(at(100));

        let mut restored = SessionEngine::default();
        restored.restore(snap);
        assert_eq!(restored.total_elapsed_ms(at(10_000)), 100_000);
    }

    #[test]
    fn idle_snapshot_uses_sentinel_task() {
        let engine = SessionEngine::default();
        let snap = engine.snapshot();
        assert!(snap.current_task.is_idle_marker());

        let mut restored = SessionEngine::default();
        restored.restore(snap);
        assert!(restored.current_task().is_none());
    }

    #[test]
    fn restore_keeps_a_real_task_named_idle() {
        let mut engine = SessionEngine::default();
        engine.start_battle(Task::passive(IDLE_TASK_NAME, 0), t0());

        let mut restored = SessionEngine::default();
        restored.restore(engine.snapshot());
        assert_eq!(restored.state(), SessionState::Fighting);
        assert_eq!(restored.current_task().unwrap().name, IDLE_TASK_NAME);
    }

    #[test]
    fn huge_focus_task_ticks_without_overflow() {
        let mut engine = SessionEngine::default();
        engine.start_battle(Task::focus("Big", u64::MAX / 1000), t0());
        assert!(engine.tick(at(5)).is_none());
        let task = engine.current_task().unwrap();
        assert_eq!(task.remaining_ms(), task.max_duration_ms() - 5_000);

        let result = engine.retreat(at(10)).unwrap();
        assert_eq!(result.focused_secs, 10);
    }

    #[test]
    fn overnight_retreat_never_moves_the_day_back() {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 23, 50, 0).unwrap();
        let next_morning = Utc.with_ymd_and_hms(2024, 6, 4, 8, 0, 0).unwrap();
        let mut engine = SessionEngine::default();
        engine.start_battle(Task::focus("Boss", 1500), start);
        engine.drain_events();

        assert!(engine.roll_day(next_morning));
        let outcome = engine.reconcile(start + Duration::seconds(100), next_morning);
        assert_eq!(outcome, ReconcileOutcome::Retreated);

        let day = |d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap();
        assert_eq!(engine.today(), Some(day(4)));
        assert_eq!(engine.today_focused_secs(), 0);
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.history()[0].date, day(3));
        assert_eq!(engine.history()[0].focused_secs, 100);

        let rolls: Vec<_> = engine
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                Event::DayRolledOver { date } => Some(date),
                _ => None,
            })
            .collect();
        assert_eq!(rolls, vec![day(4)]);
        assert_eq!(engine.snapshot().today, Some(day(4)));
    }
}
