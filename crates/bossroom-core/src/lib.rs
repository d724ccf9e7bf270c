//! # Bossroom Core Library
//!
//! This library provides the core logic for Bossroom, a focus timer that
//! frames each task as a boss battle. Sustained attention drains the boss's
//! hit points; leaving the app wastes time and lets the boss survive.
//!
//! The CLI binary and any GUI are thin layers over the same core.
//!
//! ## Architecture
//!
//! - **Battle Engine**: A timestamp-driven state machine. It never reads the
//!   wall clock; the caller passes `at` to every operation and invokes
//!   `tick()` periodically
//! - **Focus Groups**: Time allocation across the members of a multi-task battle
//! - **Rest Prompt** and **Reminders**: Small services fed by the caller
//! - **Stats**: Daily history, streaks and weekly growth
//! - **Storage**: Snapshot persistence, SQLite result log, TOML configuration
//!
//! ## Key Components
//!
//! - [`SessionEngine`]: Core battle state machine
//! - [`BattleCoordinator`]: Task queue, rest prompt and persistence around the engine
//! - [`Database`]: Snapshot and result persistence
//! - [`Config`]: Application configuration management

pub mod battle;
pub mod calendar;
pub mod clock;
pub mod error;
pub mod events;
pub mod reminder;
pub mod rest_prompt;
pub mod stats;
pub mod storage;

pub use battle::{
    BattleCoordinator, BattleStyle, EndReason, EngineConfig, EngineSnapshot, FocusGroupSession,
    FocusGroupSummary, ReconcileOutcome, SessionEngine, SessionResult, SessionState, Task,
    TaskTemplate,
};
pub use calendar::DayCalendar;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, DatabaseError, SnapshotError};
pub use events::Event;
pub use reminder::{ReminderEvent, ReminderScheduler, ScheduledTask};
pub use rest_prompt::RestPromptService;
pub use stats::DailyHistoryEntry;
pub use storage::{Config, Database, MemorySnapshotStore, SnapshotStore};
