mod coordinator;
mod engine;
mod focus_group;
mod result;
mod snapshot;
mod task;

pub use coordinator::BattleCoordinator;
pub use engine::{EngineConfig, ReconcileOutcome, SessionEngine, SessionState};
pub use focus_group::{FocusGroupSession, FocusGroupSummary, Segment};
pub use result::{EndReason, FreezeRecord, SessionResult};
pub use snapshot::{EngineSnapshot, SNAPSHOT_VERSION};
pub use task::{
    display_name, BattleStyle, FocusGroupPayload, Task, TaskMode, TaskTemplate, TemplateLookup,
    IDLE_TASK_NAME, MAX_DURATION_MS,
};
