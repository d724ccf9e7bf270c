//! Persisted engine state.
//!
//! Snapshots are versioned. Loading runs the raw JSON through every
//! migration newer than its stored `version`, each of which fills defaults
//! for the fields it introduced, before typed decoding. A snapshot without a
//! `version` field is treated as version 1.
//!
//! | version | added |
//! |---|---|
//! | 1 | task, state, run marker, elapsed, wasted, immunity flag, distraction marker, today's focus, history |
//! | 2 | freeze tokens used, freeze log, freeze marker |
//! | 3 | immunity token count, tracked day, battle start marker |

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use super::engine::SessionState;
use super::result::FreezeRecord;
use super::task::Task;
use crate::error::{Result, SnapshotError};
use crate::stats::DailyHistoryEntry;

/// Current snapshot version.
///
/// Increment this when adding new fields, and add a migration for them.
pub const SNAPSHOT_VERSION: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub version: u32,
    /// [`Task::idle_marker`] when nothing is active.
    pub current_task: Task,
    pub state: SessionState,
    pub run_started_at: Option<DateTime<Utc>>,
    pub elapsed_before_ms: u64,
    pub wasted_ms: u64,
    pub immune: bool,
    pub immunity_tokens: u32,
    pub distraction_started_at: Option<DateTime<Utc>>,
    pub freeze_tokens_used: u32,
    pub freeze_log: Vec<FreezeRecord>,
    pub freeze_started_at: Option<DateTime<Utc>>,
    pub battle_started_at: Option<DateTime<Utc>>,
    pub today: Option<NaiveDate>,
    pub today_focused_secs: u64,
    pub history: Vec<DailyHistoryEntry>,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a snapshot written by this or any older version.
    ///
    /// # Errors
    /// Returns an error for a newer version or an undecodable payload.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(SnapshotError::Malformed("expected a JSON object".into()).into());
        };
        migrate(&mut obj)?;
        serde_json::from_value(Value::Object(obj))
            .map_err(|e| SnapshotError::Malformed(e.to_string()).into())
    }
}

/// Bring `obj` up to [`SNAPSHOT_VERSION`].
fn migrate(obj: &mut Map<String, Value>) -> Result<(), SnapshotError> {
    let version = stored_version(obj);
    if version > SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: version,
            supported: SNAPSHOT_VERSION,
        });
    }
    if version < SNAPSHOT_VERSION {
        warn!(from = version, to = SNAPSHOT_VERSION, "migrating engine snapshot");
    }

    migrate_v1(obj);
    if version < 2 {
        migrate_v2(obj);
    }
    if version < 3 {
        migrate_v3(obj);
    }
    obj.insert("version".into(), json!(SNAPSHOT_VERSION));
    Ok(())
}

fn stored_version(obj: &Map<String, Value>) -> u32 {
    obj.get("version")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(1)
}

fn fill(obj: &mut Map<String, Value>, key: &str, default: Value) {
    match obj.get(key) {
        Some(v) if !v.is_null() => {}
        _ => {
            obj.insert(key.into(), default);
        }
    }
}

/// Baseline fields. Nullable markers may be absent entirely.
fn migrate_v1(obj: &mut Map<String, Value>) {
    fill(obj, "currentTask", serde_json::to_value(Task::idle_marker()).unwrap_or(Value::Null));
    fill(obj, "state", json!("idle"));
    fill(obj, "runStartedAt", Value::Null);
    fill(obj, "elapsedBeforeMs", json!(0));
    fill(obj, "wastedMs", json!(0));
    fill(obj, "immune", json!(false));
    fill(obj, "distractionStartedAt", Value::Null);
    fill(obj, "todayFocusedSecs", json!(0));
    fill(obj, "history", json!([]));
}

/// v2: freeze tokens.
fn migrate_v2(obj: &mut Map<String, Value>) {
    fill(obj, "freezeTokensUsed", json!(0));
    fill(obj, "freezeLog", json!([]));
    fill(obj, "freezeStartedAt", Value::Null);
}

/// v3: immunity tokens and day tracking.
fn migrate_v3(obj: &mut Map<String, Value>) {
    fill(obj, "immunityTokens", json!(0));
    fill(obj, "today", Value::Null);
    fill(obj, "battleStartedAt", Value::Null);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::SessionEngine;
    use chrono::TimeZone;

    #[test]
    fn current_snapshot_round_trips() {
        let mut engine = SessionEngine::default();
        let t0 = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        engine.start_battle(Task::focus("Boss", 900), t0);
        let snap = engine.snapshot();
        let back = EngineSnapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn v1_snapshot_loads_with_defaults() {
        let json = r#"{
            "currentTask": {"id":"t1","name":"Boss","maxDurationMs":60000,"remainingMs":30000,"style":"focus"},
            "state": "paused",
            "elapsedBeforeMs": 30000,
            "wastedMs": 0,
            "immune": false,
            "todayFocusedSecs": 120,
            "history": []
        }"#;
        let snap = EngineSnapshot::from_json(json).unwrap();
        assert_eq!(snap.version, SNAPSHOT_VERSION);
        assert_eq!(snap.state, SessionState::Paused);
        assert_eq!(snap.freeze_tokens_used, 0);
        assert!(snap.freeze_log.is_empty());
        assert_eq!(snap.immunity_tokens, 0);
        assert!(snap.today.is_none());
        assert!(snap.run_started_at.is_none());
    }

    #[test]
    fn v2_snapshot_keeps_its_freeze_fields() {
        let json = r#"{
            "version": 2,
            "currentTask": {"id":"","name":"Idle","maxDurationMs":0,"remainingMs":0,"style":"passive"},
            "state": "idle",
            "elapsedBeforeMs": 0,
            "wastedMs": 0,
            "immune": false,
            "todayFocusedSecs": 0,
            "history": [],
            "freezeTokensUsed": 2,
            "freezeLog": []
        }"#;
        let snap = EngineSnapshot::from_json(json).unwrap();
        assert_eq!(snap.freeze_tokens_used, 2);
        assert_eq!(snap.immunity_tokens, 0);
    }

    #[test]
    fn empty_object_loads_as_idle() {
        let snap = EngineSnapshot::from_json("{}").unwrap();
        assert!(snap.current_task.is_idle_marker());
        assert_eq!(snap.state, SessionState::Idle);
    }

    #[test]
    fn newer_version_is_rejected() {
        let err = EngineSnapshot::from_json(r#"{"version": 99}"#).unwrap_err();
        assert!(matches!(
            err,
            crate::CoreError::Snapshot(SnapshotError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn non_object_is_malformed() {
        let err = EngineSnapshot::from_json("[1,2,3]").unwrap_err();
        assert!(matches!(err, crate::CoreError::Snapshot(SnapshotError::Malformed(_))));
    }
}
