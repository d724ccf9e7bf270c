mod config;
pub mod database;
mod snapshot_store;

pub use config::{CalendarConfig, Config, ReminderConfig, RestConfig};
pub use database::{Database, StoredResult};
pub use snapshot_store::{MemorySnapshotStore, SnapshotStore};

use std::path::PathBuf;

use crate::error::Result;

/// Returns `~/.config/bossroom[-dev]/` based on BOSSROOM_ENV.
///
/// Set BOSSROOM_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("BOSSROOM_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("bossroom-dev")
    } else {
        base_dir.join("bossroom")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
