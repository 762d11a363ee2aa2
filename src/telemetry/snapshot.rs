//! # Telemetry Snapshot
//!
//! One decoded `DeviceMSG` report. Snapshots are built once at the decode
//! boundary, wrapped in an [`Arc`](std::sync::Arc) and never mutated again.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::activity::ActivityState;
use super::fields;
use super::gngga::{parse_gngga, GnggaFix};

/// Decoded telemetry report.
///
/// Every typed field is optional: firmware versions differ in what they
/// report. The untyped `raw` payload is kept alongside so that accessors can
/// fall back to nested raw paths when a typed field is missing (see
/// [`fields`](super::fields)).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySnapshot {
    // Core status
    pub battery_capacity: Option<i64>,
    pub battery: Option<i64>,
    pub charging_status: Option<i64>,
    pub state: Option<i64>,
    pub error_code: Option<i64>,
    pub serial_number: Option<String>,
    pub plan_id: Option<String>,
    pub duration: Option<i64>,
    pub head_type: Option<i64>,

    // Positioning
    pub rtk_status: Option<i64>,
    pub heading: Option<f64>,
    pub satellite_count: Option<i64>,
    pub odom_confidence: Option<f64>,
    pub rtcm_age: Option<f64>,
    pub mqtt_age: Option<f64>,

    // Head / body
    pub chute_angle: Option<i64>,
    pub rain_sensor: Option<i64>,
    /// Charge voltage in millivolts
    pub charge_voltage_mv: Option<i64>,
    /// Charge current in milliamps
    pub charge_current_ma: Option<i64>,

    // Diagnostics
    pub head_serial: Option<String>,
    pub battery_temp_error: Option<i64>,
    pub base_station_status: Option<Value>,
    pub rtcm_source_type: Option<Value>,
    pub heading_dop: Option<f64>,
    pub heading_status: Option<i64>,
    pub antenna_distance: Option<f64>,
    pub wireless_charge_state: Option<Value>,
    pub wireless_charge_error: Option<Value>,
    pub chute_steering_info: Option<Value>,
    pub nav_sensor_front_right: Option<i64>,
    pub nav_sensor_rear_right: Option<i64>,
    pub head_gyro_pitch: Option<f64>,
    pub head_gyro_roll: Option<f64>,
    pub machine_controller: Option<Value>,
    pub odom_x: Option<f64>,
    pub odom_y: Option<f64>,
    pub odom_phi: Option<f64>,
    pub ultrasonic_left_front: Option<i64>,
    pub ultrasonic_middle: Option<i64>,
    pub ultrasonic_right_front: Option<i64>,

    /// Untyped nested payload as decoded from the wire
    pub raw: Map<String, Value>,
}

impl TelemetrySnapshot {
    /// Build a snapshot that only carries a raw payload.
    ///
    /// Typed fields stay empty; accessors resolve them from the raw paths.
    pub fn from_raw(raw: Map<String, Value>) -> Self {
        Self {
            raw,
            ..Self::default()
        }
    }

    /// Decode a JSON report object.
    ///
    /// Keys matching typed fields populate them; the whole object is kept as
    /// the raw payload. A report whose typed keys have unexpected types
    /// degrades to a raw-only snapshot.
    pub fn from_payload(payload: Map<String, Value>) -> Self {
        match serde_json::from_value::<Self>(Value::Object(payload.clone())) {
            Ok(snapshot) if !snapshot.raw.is_empty() => snapshot,
            Ok(snapshot) => Self {
                raw: payload,
                ..snapshot
            },
            Err(_) => Self::from_raw(payload),
        }
    }

    /// Look up a nested raw value by key path.
    ///
    /// Returns `None` as soon as a segment is missing or the value at a
    /// segment is not an object.
    pub fn raw_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut value = self.raw.get(*first)?;
        for key in rest {
            value = value.as_object()?.get(*key)?;
        }
        Some(value)
    }

    /// Battery percentage
    pub fn battery_level(&self) -> Option<i64> {
        fields::resolve_int(self, fields::BATTERY)
    }

    pub fn charging_status_code(&self) -> Option<i64> {
        fields::resolve_int(self, fields::CHARGING_STATUS)
    }

    pub fn state_code(&self) -> Option<i64> {
        fields::resolve_int(self, fields::WORKING_STATE)
    }

    pub fn error_code_value(&self) -> Option<i64> {
        fields::resolve_int(self, fields::ERROR_CODE)
    }

    pub fn head_type_code(&self) -> Option<i64> {
        fields::resolve_int(self, fields::HEAD_TYPE)
    }

    pub fn rtk_status_code(&self) -> Option<i64> {
        fields::resolve_int(self, fields::RTK_STATUS)
    }

    pub fn heading_degrees(&self) -> Option<f64> {
        fields::resolve_float(self, fields::HEADING)
    }

    pub fn chute_angle_degrees(&self) -> Option<i64> {
        fields::resolve_int(self, fields::CHUTE_ANGLE)
    }

    pub fn rain_sensor_value(&self) -> Option<i64> {
        fields::resolve_int(self, fields::RAIN_SENSOR)
    }

    pub fn plan(&self) -> Option<String> {
        fields::resolve_text(self, fields::PLAN_ID)
    }

    /// `true` when the charging status reports an active charge (1, 2 or 3).
    pub fn is_charging(&self) -> bool {
        matches!(self.charging_status_code(), Some(1..=3))
    }

    /// Derived activity classification, see [`ActivityState::classify`].
    pub fn activity(&self) -> ActivityState {
        ActivityState::classify(self)
    }

    /// RTK rover position parsed from the embedded GNGGA sentence.
    pub fn gngga(&self) -> Option<GnggaFix> {
        self.raw_path(&["rtk_base_data", "rover", "gngga"])
            .and_then(Value::as_str)
            .and_then(parse_gngga)
    }
}
