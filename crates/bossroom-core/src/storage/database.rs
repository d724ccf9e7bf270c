//! SQLite-based storage.
//!
//! Provides persistent storage for:
//! - The engine snapshot and last-seen timestamp (key-value table)
//! - Every finalized session result (append-only)

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::data_dir;
use super::snapshot_store::SnapshotStore;
use crate::battle::{EngineSnapshot, SessionResult};
use crate::error::{DatabaseError, Result};

const SNAPSHOT_KEY: &str = "engine_snapshot";
const LAST_SEEN_KEY: &str = "last_seen_at";

/// A session result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: i64,
    pub result: SessionResult,
}

/// SQLite database for engine state and session history.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/bossroom/bossroom.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(&data_dir()?.join("bossroom.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session_results (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id       TEXT NOT NULL,
                task_name     TEXT NOT NULL,
                end_reason    TEXT NOT NULL,
                focused_secs  INTEGER NOT NULL,
                wasted_secs   INTEGER NOT NULL,
                ended_at      TEXT NOT NULL,
                payload       TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_session_results_ended_at ON session_results(ended_at);",
        )?;
        Ok(())
    }

    /// Append a finalized session result.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn record_result(&self, result: &SessionResult) -> Result<i64> {
        let reason = serde_json::to_value(result.end_reason)?;
        let payload = serde_json::to_string(result)?;
        self.conn.execute(
            "INSERT INTO session_results
                (task_id, task_name, end_reason, focused_secs, wasted_secs, ended_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.task_id,
                result.task_name,
                reason.as_str().unwrap_or_default(),
                result.focused_secs as i64,
                result.wasted_secs as i64,
                result.ended_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                payload,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent results first.
    pub fn recent_results(&self, limit: usize) -> Result<Vec<StoredResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload FROM session_results ORDER BY ended_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, payload) = row?;
            out.push(StoredResult {
                id,
                result: serde_json::from_str(&payload)?,
            });
        }
        Ok(out)
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// When the app last observed the engine running.
    pub fn last_seen_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .kv_get(LAST_SEEN_KEY)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    pub fn set_last_seen_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.kv_set(LAST_SEEN_KEY, &at.to_rfc3339())?;
        Ok(())
    }
}

impl SnapshotStore for Database {
    fn save(&mut self, snapshot: &EngineSnapshot) -> Result<()> {
        self.kv_set(SNAPSHOT_KEY, &snapshot.to_json()?)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<EngineSnapshot>> {
        match self.kv_get(SNAPSHOT_KEY)? {
            Some(json) => Ok(Some(EngineSnapshot::from_json(&json)?)),
            None => Ok(None),
        }
    }
}
