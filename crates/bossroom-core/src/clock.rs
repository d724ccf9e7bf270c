//! Clock source.
//!
//! Nothing in the battle engine reads the wall clock. Callers read a
//! [`Clock`] at the UI boundary and pass the timestamp into every operation,
//! which keeps the engine deterministic under test and replay.

use std::cell::Cell;

use chrono::{DateTime, Duration, Utc};

/// Provides the current time.
pub trait Clock {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Move the clock forward (or backward, for skew tests) by `secs`.
    pub fn advance_secs(&self, secs: i64) -> DateTime<Utc> {
        let next = self.now.get() + Duration::seconds(secs);
        self.now.set(next);
        next
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.now.set(at);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// Milliseconds from `from` to `to`, clamped at zero.
///
/// A clock that stepped backwards yields no elapsed time rather than a
/// negative credit.
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}
