//! Suggests a break once enough focus has piled up.
//!
//! The service latches after suggesting: it stays quiet until the user
//! either takes the break or declines it, and both restart the count.

use serde::{Deserialize, Serialize};

/// Default threshold: 50 minutes of focus.
pub const DEFAULT_REST_THRESHOLD_SECS: u64 = 50 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestPromptService {
    threshold_secs: u64,
    accumulated_secs: u64,
    has_suggested: bool,
    rests_taken: u32,
}

impl Default for RestPromptService {
    fn default() -> Self {
        Self::new(DEFAULT_REST_THRESHOLD_SECS)
    }
}

impl RestPromptService {
    pub fn new(threshold_secs: u64) -> Self {
        Self {
            threshold_secs,
            accumulated_secs: 0,
            has_suggested: false,
            rests_taken: 0,
        }
    }

    pub fn threshold_secs(&self) -> u64 {
        self.threshold_secs
    }

    pub fn accumulated_secs(&self) -> u64 {
        self.accumulated_secs
    }

    pub fn has_suggested(&self) -> bool {
        self.has_suggested
    }

    pub fn rests_taken(&self) -> u32 {
        self.rests_taken
    }

    /// Add focused time. Returns true exactly when the threshold is first
    /// crossed since the last reset.
    pub fn record_focus(&mut self, secs: u64) -> bool {
        self.accumulated_secs = self.accumulated_secs.saturating_add(secs);
        if self.has_suggested || self.accumulated_secs < self.threshold_secs {
            return false;
        }
        self.has_suggested = true;
        true
    }

    /// User declined the break and keeps going.
    pub fn reset_after_continue(&mut self) {
        self.accumulated_secs = 0;
        self.has_suggested = false;
    }

    /// User took the break.
    pub fn reset_after_rest(&mut self) {
        self.accumulated_secs = 0;
        self.has_suggested = false;
        self.rests_taken += 1;
    }
}
