use bossroom_core::battle::{FocusGroupPayload, Task};
use chrono::{DateTime, Utc};
use clap::Subcommand;

use super::session;

#[derive(Subcommand)]
pub enum BattleAction {
    /// Start a battle against a new task
    Start {
        /// Task name
        name: String,
        /// Boss hit points in seconds
        #[arg(long, default_value = "1500")]
        secs: u64,
        /// No countdown; the task is finished by hand
        #[arg(long)]
        passive: bool,
        /// Member task ids for a multi-task battle (comma separated)
        #[arg(long, value_delimiter = ',')]
        members: Vec<String>,
    },
    /// Pause the countdown
    Pause,
    /// Resume after a pause
    Resume,
    /// Spend a freeze token
    Freeze,
    /// Resume after a freeze
    Thaw,
    /// Give up on the current task
    Retreat,
    /// Undo a battle started moments ago
    Abort,
    /// Finish the current task by hand
    Complete {
        /// Win even if the boss still has hit points
        #[arg(long)]
        force: bool,
    },
    /// Switch the active member of a multi-task battle
    Switch {
        /// Index into the member list
        index: usize,
    },
    /// Wrap up a multi-task battle
    ExploreEnd,
    /// Advance the countdown
    Tick,
    /// The app left the foreground
    Background,
    /// The app came back
    Foreground,
    /// Cold start: reconcile the time since the app was last seen
    Launch,
    /// Print the current battle as JSON
    Status,
    /// Activate immunity, or add tokens with --grant
    Immunity {
        #[arg(long)]
        grant: Option<u32>,
    },
}

pub fn run(action: BattleAction, now: DateTime<Utc>) -> Result<(), Box<dyn std::error::Error>> {
    let mut coordinator = session::open(now)?;

    let (what, applied) = match action {
        BattleAction::Start {
            name,
            secs,
            passive,
            members,
        } => {
            let mut task = if passive {
                Task::passive(name, secs)
            } else {
                Task::focus(name, secs)
            };
            if !members.is_empty() {
                task = task.with_focus_group(FocusGroupPayload {
                    member_ids: members,
                    active_index: 0,
                });
            }
            coordinator.enqueue(task);
            ("start a battle", coordinator.start_next(now))
        }
        BattleAction::Pause => ("pause", coordinator.engine_mut().pause(now)),
        BattleAction::Resume => ("resume", coordinator.engine_mut().resume(now)),
        BattleAction::Freeze => ("freeze", coordinator.engine_mut().freeze(now)),
        BattleAction::Thaw => ("thaw", coordinator.engine_mut().resume_from_freeze(now)),
        BattleAction::Retreat => ("retreat", coordinator.engine_mut().retreat(now).is_some()),
        BattleAction::Abort => ("abort", coordinator.engine_mut().abort_session(now)),
        BattleAction::Complete { force } => {
            let engine = coordinator.engine_mut();
            let result = if force {
                engine.force_complete_task(now)
            } else {
                engine.complete_passive_task(now)
            };
            ("complete the task", result.is_some())
        }
        BattleAction::Switch { index } => ("switch member", coordinator.switch_member(index, now)),
        BattleAction::ExploreEnd => ("end exploration", coordinator.end_exploration(now).is_some()),
        BattleAction::Tick => {
            coordinator.engine_mut().tick(now);
            ("tick", true)
        }
        BattleAction::Background => {
            coordinator.engine_mut().handle_backgrounding(now);
            ("background", true)
        }
        BattleAction::Foreground => {
            coordinator.engine_mut().handle_foregrounding(now);
            ("foreground", true)
        }
        BattleAction::Launch => {
            if let Some(last_seen_at) = coordinator.store().last_seen_at()? {
                coordinator.on_launch(last_seen_at, now)?;
            }
            ("launch", true)
        }
        BattleAction::Status => ("report status", true),
        BattleAction::Immunity { grant: Some(tokens) } => {
            coordinator.engine_mut().grant_immunity(tokens);
            ("grant immunity", true)
        }
        BattleAction::Immunity { grant: None } => (
            "activate immunity",
            coordinator.engine_mut().activate_immunity(),
        ),
    };

    if !applied {
        return Err(session::rejected(what, &coordinator));
    }
    let events = session::close(&mut coordinator, now)?;
    session::print_report(&coordinator, &events, now)
}
