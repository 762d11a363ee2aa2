//! # Events Module
//!
//! Discrete lifecycle events derived from consecutive telemetry snapshots.
//!
//! This module handles:
//! - Comparing a previous and current snapshot into transition events
//! - Tracking the controller-acquired flag across ticks
//! - Handing events to an external sink

pub mod detector;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

pub use detector::{detect_transitions, EventDetector};

/// Low battery threshold in percent
pub const LOW_BATTERY_THRESHOLD: i64 = 20;

/// Description attached to `error` events; firmware codes are not decoded
pub const UNKNOWN_ERROR_DESCRIPTION: &str = "Unknown error";

/// Event-specific payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    JobStarted {
        plan_id: Option<String>,
        head_type: Option<i64>,
    },
    JobCompleted {
        plan_id: Option<String>,
        duration_seconds: Option<i64>,
    },
    JobPaused {
        reason: String,
    },
    Error {
        error_code: i64,
        error_description: String,
    },
    HeadChanged {
        previous_head: Option<i64>,
        new_head: Option<i64>,
    },
    LowBattery {
        battery_level: i64,
    },
    ControllerLost,
    Docked,
}

impl EventKind {
    /// Event type name as fired on the host event bus
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::JobStarted { .. } => "job_started",
            EventKind::JobCompleted { .. } => "job_completed",
            EventKind::JobPaused { .. } => "job_paused",
            EventKind::Error { .. } => "error",
            EventKind::HeadChanged { .. } => "head_changed",
            EventKind::LowBattery { .. } => "low_battery",
            EventKind::ControllerLost => "controller_lost",
            EventKind::Docked => "docked",
        }
    }
}

/// One emitted event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEvent {
    pub device_id: String,
    pub robot_sn: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl DeviceEvent {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Receiver of detected events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DeviceEvent);
}

impl EventSink for UnboundedSender<DeviceEvent> {
    fn emit(&self, event: &DeviceEvent) {
        if self.send(event.clone()).is_err() {
            debug!("Event receiver dropped, discarding {}", event.name());
        }
    }
}

/// Sink that writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &DeviceEvent) {
        match serde_json::to_string(event) {
            Ok(json) => info!("Event {}: {}", event.name(), json),
            Err(_) => info!("Event {} for {}", event.name(), event.device_id),
        }
    }
}
