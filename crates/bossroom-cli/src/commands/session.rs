//! Loading and saving the engine around a single CLI invocation.

use bossroom_core::battle::{FocusGroupSession, Task};
use bossroom_core::{
    BattleCoordinator, Config, Database, Event, ReminderScheduler, RestPromptService,
    ScheduledTask, SessionState,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

const REST_PROMPT_KEY: &str = "rest_prompt";
const FOCUS_GROUP_KEY: &str = "focus_group";
const REMINDERS_KEY: &str = "reminders";
const SCHEDULED_TASKS_KEY: &str = "scheduled_tasks";

pub type Coordinator = BattleCoordinator<Database>;

/// Restore the coordinator and move it to the calendar day of `now`.
pub fn open(now: DateTime<Utc>) -> Result<Coordinator, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Database::open()?;

    let fresh = config.rest_prompt();
    let rest = match db.kv_get(REST_PROMPT_KEY)? {
        Some(json) => serde_json::from_str::<RestPromptService>(&json)?,
        None => fresh.clone(),
    };
    // A changed threshold starts the count over.
    let rest = if rest.threshold_secs() == fresh.threshold_secs() {
        rest
    } else {
        fresh
    };
    let focus_group = match db.kv_get(FOCUS_GROUP_KEY)? {
        Some(json) => serde_json::from_str::<Option<FocusGroupSession>>(&json)?,
        None => None,
    };

    let reminders = match db.kv_get(REMINDERS_KEY)? {
        Some(json) => Some(serde_json::from_str::<ReminderScheduler>(&json)?),
        None => None,
    };

    let mut coordinator = BattleCoordinator::from_config(&config, db)?
        .with_rest_prompt(rest)
        .with_focus_group(focus_group);
    if let Some(reminders) = reminders {
        coordinator = coordinator.with_reminders(reminders);
    }
    coordinator.engine_mut().roll_day(now);
    Ok(coordinator)
}

/// Tasks with reminders, as saved by `remind add`.
pub fn scheduled_tasks(db: &Database) -> Result<Vec<ScheduledTask>, Box<dyn std::error::Error>> {
    match db.kv_get(SCHEDULED_TASKS_KEY)? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

pub fn save_scheduled_tasks(
    db: &Database,
    tasks: &[ScheduledTask],
) -> Result<(), Box<dyn std::error::Error>> {
    db.kv_set(SCHEDULED_TASKS_KEY, &serde_json::to_string(tasks)?)?;
    Ok(())
}

/// Drain events, check reminders, log results and persist everything.
pub fn close(
    coordinator: &mut Coordinator,
    now: DateTime<Utc>,
) -> Result<Vec<Event>, Box<dyn std::error::Error>> {
    let mut events = coordinator.pump()?;
    for result in events.iter().filter_map(Event::session_result) {
        coordinator.store().record_result(result)?;
    }
    coordinator.persist()?;

    let tasks = scheduled_tasks(coordinator.store())?;
    events.extend(coordinator.check_reminders(&tasks, now));

    let db = coordinator.store();
    db.kv_set(
        REST_PROMPT_KEY,
        &serde_json::to_string(coordinator.rest_prompt())?,
    )?;
    db.kv_set(
        FOCUS_GROUP_KEY,
        &serde_json::to_string(&coordinator.focus_group())?,
    )?;
    db.kv_set(REMINDERS_KEY, &serde_json::to_string(coordinator.reminders())?)?;
    db.set_last_seen_at(now)?;
    debug!(events = events.len(), %now, "state saved");
    Ok(events)
}

#[derive(Serialize)]
pub struct Status<'a> {
    pub state: SessionState,
    pub task: Option<&'a Task>,
    pub remaining_secs: u64,
    pub progress: f64,
    pub wasted_secs: u64,
    pub immune: bool,
    pub immunity_tokens: u32,
    pub freeze_tokens_remaining: u32,
    pub active_member: Option<&'a str>,
    pub today_focused_secs: u64,
    pub rest_focus_secs: u64,
    pub rest_suggested: bool,
}

impl<'a> Status<'a> {
    pub fn of(coordinator: &'a Coordinator, now: DateTime<Utc>) -> Self {
        let engine = coordinator.engine();
        Self {
            state: engine.state(),
            task: engine.current_task(),
            remaining_secs: engine.remaining_ms(now) / 1000,
            progress: engine.progress(now),
            wasted_secs: engine.wasted_so_far_ms(now) / 1000,
            immune: engine.is_immune(),
            immunity_tokens: engine.immunity_tokens(),
            freeze_tokens_remaining: engine.freeze_tokens_remaining(),
            active_member: coordinator.active_member(),
            today_focused_secs: engine.today_focused_secs(),
            rest_focus_secs: coordinator.rest_prompt().accumulated_secs(),
            rest_suggested: coordinator.rest_prompt().has_suggested(),
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    events: &'a [Event],
    status: Status<'a>,
}

/// Print the drained events and the resulting status as one JSON document.
pub fn print_report(
    coordinator: &Coordinator,
    events: &[Event],
    now: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = Report {
        events,
        status: Status::of(coordinator, now),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Error for a transition the engine refused.
pub fn rejected(what: &str, coordinator: &Coordinator) -> Box<dyn std::error::Error> {
    let state = format!("{:?}", coordinator.engine().state()).to_lowercase();
    format!("cannot {what} while {state}").into()
}
