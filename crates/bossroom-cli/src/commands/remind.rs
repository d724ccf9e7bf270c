use bossroom_core::ScheduledTask;
use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;

use super::session;

#[derive(Subcommand)]
pub enum RemindAction {
    /// Schedule a task, or move an existing one to a new time
    Add {
        /// Task id
        id: String,
        /// Task name
        name: String,
        /// When the task is due (RFC 3339)
        #[arg(long)]
        remind_at: DateTime<Utc>,
    },
    /// Mark a task done so it never fires again
    Done { id: String },
    /// Push a task's reminder back and re-arm it
    Snooze {
        id: String,
        #[arg(long, default_value = "10")]
        minutes: i64,
    },
    /// Print scheduled tasks as JSON
    List,
    /// Report reminders that are due now
    Check,
}

pub fn run(action: RemindAction, now: DateTime<Utc>) -> Result<(), Box<dyn std::error::Error>> {
    let mut coordinator = session::open(now)?;
    let mut tasks = session::scheduled_tasks(coordinator.store())?;

    match action {
        RemindAction::Add {
            id,
            name,
            remind_at,
        } => {
            tasks.retain(|t| t.id != id);
            coordinator.reset_reminder(&id);
            tasks.push(ScheduledTask {
                id,
                name,
                remind_at: Some(remind_at),
                completed: false,
            });
        }
        RemindAction::Done { id } => {
            let task = find(&mut tasks, &id)?;
            task.completed = true;
        }
        RemindAction::Snooze { id, minutes } => {
            let task = find(&mut tasks, &id)?;
            task.remind_at = Some(now + Duration::minutes(minutes));
            coordinator.reset_reminder(&id);
        }
        RemindAction::List => {
            println!("{}", serde_json::to_string_pretty(&tasks)?);
            return Ok(());
        }
        RemindAction::Check => {}
    }

    session::save_scheduled_tasks(coordinator.store(), &tasks)?;
    let events = session::close(&mut coordinator, now)?;
    session::print_report(&coordinator, &events, now)
}

fn find<'a>(
    tasks: &'a mut [ScheduledTask],
    id: &str,
) -> Result<&'a mut ScheduledTask, Box<dyn std::error::Error>> {
    tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| format!("no scheduled task: {id}").into())
}
