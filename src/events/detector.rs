//! # Event Detector
//!
//! Turns a pair of consecutive snapshots into zero or more [`DeviceEvent`]s.
//!
//! ## Rules
//!
//! All rules are evaluated on every call; several may fire from one pair.
//!
//! | Event | Condition |
//! |-------|-----------|
//! | `job_started` | activity idle/paused -> working |
//! | `job_completed` | activity working/returning -> charging/idle |
//! | `job_paused` | activity working -> paused |
//! | `error` | error code 0 -> non-zero |
//! | `head_changed` | head type differs (including to/from none) |
//! | `low_battery` | battery >= 20% -> < 20% while not charging |
//! | `controller_lost` | controller-acquired flag true -> false |
//! | `docked` | charging status 0 -> 1/2/3 |
//!
//! A rule whose operands are missing simply does not fire.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{DeviceEvent, EventKind, LOW_BATTERY_THRESHOLD, UNKNOWN_ERROR_DESCRIPTION};
use crate::telemetry::{ActivityState, TelemetrySnapshot};

/// Evaluate every transition rule for one pair of snapshots.
///
/// `controller` is the controller-acquired flag as observed at the previous
/// and current tick. The function is pure: it performs no I/O and keeps no
/// state.
pub fn detect_transitions(
    device_id: &str,
    previous: &TelemetrySnapshot,
    current: &TelemetrySnapshot,
    controller: (Option<bool>, bool),
    now: DateTime<Utc>,
) -> Vec<DeviceEvent> {
    let mut kinds = Vec::new();

    let before = previous.activity();
    let after = current.activity();

    if matches!(before, ActivityState::Idle | ActivityState::Paused) && after == ActivityState::Working {
        kinds.push(EventKind::JobStarted {
            plan_id: current.plan(),
            head_type: current.head_type_code(),
        });
    }

    if matches!(before, ActivityState::Working | ActivityState::Returning)
        && matches!(after, ActivityState::Charging | ActivityState::Idle)
    {
        kinds.push(EventKind::JobCompleted {
            plan_id: current.plan(),
            duration_seconds: current.duration,
        });
    }

    if before == ActivityState::Working && after == ActivityState::Paused {
        kinds.push(EventKind::JobPaused {
            reason: "command".to_string(),
        });
    }

    if let (Some(0), Some(code)) = (previous.error_code_value(), current.error_code_value()) {
        if code != 0 {
            kinds.push(EventKind::Error {
                error_code: code,
                error_description: UNKNOWN_ERROR_DESCRIPTION.to_string(),
            });
        }
    }

    let (previous_head, new_head) = (previous.head_type_code(), current.head_type_code());
    if previous_head != new_head {
        kinds.push(EventKind::HeadChanged { previous_head, new_head });
    }

    if let (Some(was), Some(level)) = (previous.battery_level(), current.battery_level()) {
        if was >= LOW_BATTERY_THRESHOLD && level < LOW_BATTERY_THRESHOLD && !current.is_charging() {
            kinds.push(EventKind::LowBattery { battery_level: level });
        }
    }

    if controller.0 == Some(true) && !controller.1 {
        kinds.push(EventKind::ControllerLost);
    }

    if previous.charging_status_code() == Some(0) && current.is_charging() {
        kinds.push(EventKind::Docked);
    }

    let robot_sn = current.serial_number.clone();
    kinds
        .into_iter()
        .map(|kind| DeviceEvent {
            device_id: device_id.to_string(),
            robot_sn: robot_sn.clone(),
            timestamp: now,
            kind,
        })
        .collect()
}

/// Keeps the last-seen snapshot and controller flag between calls.
#[derive(Debug)]
pub struct EventDetector {
    device_id: String,
    previous: Option<Arc<TelemetrySnapshot>>,
    last_controller: Option<bool>,
}

impl EventDetector {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            previous: None,
            last_controller: None,
        }
    }

    /// Compare `current` against the stored baseline and advance it.
    ///
    /// The first call only records the baseline and returns no events.
    pub fn process(&mut self, current: Arc<TelemetrySnapshot>, controller_acquired: bool) -> Vec<DeviceEvent> {
        let events = match self.previous.as_deref() {
            Some(previous) => detect_transitions(
                &self.device_id,
                previous,
                &current,
                (self.last_controller, controller_acquired),
                Utc::now(),
            ),
            None => Vec::new(),
        };

        self.previous = Some(current);
        self.last_controller = Some(controller_acquired);
        events
    }

    pub fn baseline(&self) -> Option<&Arc<TelemetrySnapshot>> {
        self.previous.as_ref()
    }
}
