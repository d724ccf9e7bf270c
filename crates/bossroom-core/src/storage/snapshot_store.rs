//! Persistence port for engine snapshots.
//!
//! The engine produces and consumes [`EngineSnapshot`]s but never does I/O.
//! The composition root owns a store and decides when to save; each save
//! is a single write of the whole snapshot.

use crate::battle::EngineSnapshot;
use crate::error::Result;

pub trait SnapshotStore {
    fn save(&mut self, snapshot: &EngineSnapshot) -> Result<()>;
    fn load(&self) -> Result<Option<EngineSnapshot>>;
}

/// Keeps the serialized snapshot in memory.
///
/// Stores JSON text rather than the value so loads go through the same
/// version migration as on-disk snapshots.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    json: Option<String>,
    saves: usize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with raw JSON, e.g. a snapshot from an older build.
    pub fn with_json(json: impl Into<String>) -> Self {
        Self {
            json: Some(json.into()),
            saves: 0,
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves
    }

    pub fn raw(&self) -> Option<&str> {
        self.json.as_deref()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&mut self, snapshot: &EngineSnapshot) -> Result<()> {
        self.json = Some(snapshot.to_json()?);
        self.saves += 1;
        Ok(())
    }

    fn load(&self) -> Result<Option<EngineSnapshot>> {
        self.json
            .as_deref()
            .map(EngineSnapshot::from_json)
            .transpose()
    }
}
