use bossroom_core::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "bossroom-cli", version, about = "Bossroom CLI")]
struct Cli {
    /// Act as if the current time were this RFC 3339 timestamp
    #[arg(long, global = true)]
    at: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Battle control
    Battle {
        #[command(subcommand)]
        action: commands::battle::BattleAction,
    },
    /// Breaks between battles
    Rest {
        #[command(subcommand)]
        action: commands::rest::RestAction,
    },
    /// "It's time" reminders for scheduled tasks
    Remind {
        #[command(subcommand)]
        action: commands::remind::RemindAction,
    },
    /// Focus statistics
    Stats {
        #[command(subcommand)]
        action: commands::stats::StatsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("BOSSROOM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let now = cli.at.unwrap_or_else(|| SystemClock.now());

    let result = match cli.command {
        Commands::Battle { action } => commands::battle::run(action, now),
        Commands::Rest { action } => commands::rest::run(action, now),
        Commands::Remind { action } => commands::remind::run(action, now),
        Commands::Stats { action } => commands::stats::run(action, now),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
