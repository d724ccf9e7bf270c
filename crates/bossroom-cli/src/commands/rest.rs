use chrono::{DateTime, Utc};
use clap::Subcommand;

use super::session;

#[derive(Subcommand)]
pub enum RestAction {
    /// Take the suggested break
    Start,
    /// Come back from a break
    End,
    /// Skip the suggested break and keep going
    Decline,
    /// Print the rest prompt as JSON
    Status,
}

pub fn run(action: RestAction, now: DateTime<Utc>) -> Result<(), Box<dyn std::error::Error>> {
    let mut coordinator = session::open(now)?;

    match action {
        RestAction::Start => {
            if !coordinator.take_rest(now) {
                return Err(session::rejected("start a rest", &coordinator));
            }
        }
        RestAction::End => {
            if !coordinator.engine_mut().end_rest(now) {
                return Err(session::rejected("end a rest", &coordinator));
            }
        }
        RestAction::Decline => coordinator.decline_rest(),
        RestAction::Status => {
            println!("{}", serde_json::to_string_pretty(coordinator.rest_prompt())?);
            return Ok(());
        }
    }

    let events = session::close(&mut coordinator, now)?;
    session::print_report(&coordinator, &events, now)
}
