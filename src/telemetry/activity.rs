//! # Activity State
//!
//! The single derived classification of what the robot is doing. Event
//! detection and anything presenting state to users go through
//! [`ActivityState::classify`] so they can never disagree.
//!
//! Priority order:
//!
//! | Condition | State |
//! |-----------|-------|
//! | error code present and non-zero | `Error` |
//! | charging status 1, 2 or 3 | `Charging` |
//! | working state 1, 7 or 8 | `Working` |
//! | working state 2 | `Returning` |
//! | working state 5 | `Paused` |
//! | working state 6 | `Error` |
//! | anything else | `Idle` |

use serde::{Deserialize, Serialize};

use super::snapshot::TelemetrySnapshot;

/// Working-state codes that mean the robot is executing a plan
pub const ACTIVE_STATES: [i64; 3] = [1, 7, 8];
/// Working-state code while driving back to the dock
pub const STATE_RETURNING: i64 = 2;
/// Working-state code while a plan is paused
pub const STATE_PAUSED: i64 = 5;
/// Working-state code for a fault
pub const STATE_FAULT: i64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Error,
    Charging,
    Working,
    Returning,
    Paused,
    Idle,
}

impl ActivityState {
    #[must_use]
    pub fn classify(snapshot: &TelemetrySnapshot) -> Self {
        if matches!(snapshot.error_code_value(), Some(code) if code != 0) {
            return ActivityState::Error;
        }
        if snapshot.is_charging() {
            return ActivityState::Charging;
        }
        match snapshot.state_code() {
            Some(state) if ACTIVE_STATES.contains(&state) => ActivityState::Working,
            Some(STATE_RETURNING) => ActivityState::Returning,
            Some(STATE_PAUSED) => ActivityState::Paused,
            Some(STATE_FAULT) => ActivityState::Error,
            _ => ActivityState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Error => "error",
            ActivityState::Charging => "charging",
            ActivityState::Working => "working",
            ActivityState::Returning => "returning",
            ActivityState::Paused => "paused",
            ActivityState::Idle => "idle",
        }
    }

    /// Robot is out on a job; some diagnostic requests only get answered then
    pub fn is_active_operation(&self) -> bool {
        matches!(self, ActivityState::Working | ActivityState::Returning)
    }

    /// Human readable label
    pub fn label(&self) -> &'static str {
        match self {
            ActivityState::Error => "Error",
            ActivityState::Charging => "Charging in the dock",
            ActivityState::Working => "Working on a plan",
            ActivityState::Returning => "Returning to dock",
            ActivityState::Paused => "Paused",
            ActivityState::Idle => "Idle",
        }
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
