//! # Field Lookup Chains
//!
//! Each logical field has a fixed, ordered list of places it may live in:
//! first the typed snapshot attribute, then one or more nested raw paths.
//! [`resolve`] walks the list and returns the first value present.
//!
//! The tables are plain data so the precedence can be read (and tested)
//! without a snapshot in hand.

use serde_json::Value;

use super::snapshot::TelemetrySnapshot;

/// A single place a field value may be found
#[derive(Clone, Copy)]
pub enum Lookup {
    /// Typed attribute on the snapshot
    Typed(fn(&TelemetrySnapshot) -> Option<Value>),
    /// Nested key path inside the raw payload
    RawPath(&'static [&'static str]),
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookup::Typed(_) => f.write_str("Typed"),
            Lookup::RawPath(path) => write!(f, "RawPath({})", path.join(".")),
        }
    }
}

pub const BATTERY: &[Lookup] = &[
    Lookup::Typed(|t| t.battery_capacity.map(Value::from)),
    Lookup::Typed(|t| t.battery.map(Value::from)),
    Lookup::RawPath(&["BatteryMSG", "capacity"]),
];

pub const CHARGING_STATUS: &[Lookup] = &[
    Lookup::Typed(|t| t.charging_status.map(Value::from)),
    Lookup::RawPath(&["StateMSG", "charging_status"]),
];

pub const WORKING_STATE: &[Lookup] = &[
    Lookup::Typed(|t| t.state.map(Value::from)),
    Lookup::RawPath(&["StateMSG", "working_state"]),
];

pub const ERROR_CODE: &[Lookup] = &[
    Lookup::Typed(|t| t.error_code.map(Value::from)),
    Lookup::RawPath(&["StateMSG", "error_code"]),
];

pub const HEAD_TYPE: &[Lookup] = &[
    Lookup::Typed(|t| t.head_type.map(Value::from)),
    Lookup::RawPath(&["HeadMsg", "head_type"]),
];

pub const RTK_STATUS: &[Lookup] = &[
    Lookup::Typed(|t| t.rtk_status.map(Value::from)),
    Lookup::RawPath(&["RTKMSG", "status"]),
];

pub const HEADING: &[Lookup] = &[
    Lookup::Typed(|t| t.heading.map(Value::from)),
    Lookup::RawPath(&["RTKMSG", "heading"]),
];

pub const CHUTE_ANGLE: &[Lookup] = &[
    Lookup::Typed(|t| t.chute_angle.map(Value::from)),
    Lookup::RawPath(&["RunningStatusMSG", "chute_angle"]),
];

pub const RAIN_SENSOR: &[Lookup] = &[
    Lookup::Typed(|t| t.rain_sensor.map(Value::from)),
    Lookup::RawPath(&["RunningStatusMSG", "rain_sensor_data"]),
];

pub const PLAN_ID: &[Lookup] = &[
    Lookup::Typed(|t| t.plan_id.clone().map(Value::from)),
    Lookup::RawPath(&["StateMSG", "plan_id"]),
];

/// Return the first non-null value found along `chain`.
pub fn resolve(snapshot: &TelemetrySnapshot, chain: &[Lookup]) -> Option<Value> {
    chain.iter().find_map(|lookup| match lookup {
        Lookup::Typed(get) => get(snapshot),
        Lookup::RawPath(path) => snapshot.raw_path(path).filter(|v| !v.is_null()).cloned(),
    })
}

/// Resolve a field as an integer.
///
/// Floats are truncated; numeric strings are accepted. Booleans are not
/// numbers here.
pub fn resolve_int(snapshot: &TelemetrySnapshot, chain: &[Lookup]) -> Option<i64> {
    resolve(snapshot, chain).and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    })
}

pub fn resolve_float(snapshot: &TelemetrySnapshot, chain: &[Lookup]) -> Option<f64> {
    resolve(snapshot, chain).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub fn resolve_text(snapshot: &TelemetrySnapshot, chain: &[Lookup]) -> Option<String> {
    resolve(snapshot, chain).and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_raw(value: Value) -> TelemetrySnapshot {
        TelemetrySnapshot::from_raw(value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_typed_field_wins_over_raw() {
        let mut snapshot = with_raw(json!({"BatteryMSG": {"capacity": 40}}));
        snapshot.battery_capacity = Some(83);
        assert_eq!(resolve_int(&snapshot, BATTERY), Some(83));
    }

    #[test]
    fn test_second_typed_field_before_raw() {
        let mut snapshot = with_raw(json!({"BatteryMSG": {"capacity": 40}}));
        snapshot.battery = Some(55);
        assert_eq!(resolve_int(&snapshot, BATTERY), Some(55));
    }

    #[test]
    fn test_falls_back_to_raw_path() {
        let snapshot = with_raw(json!({
            "StateMSG": {"working_state": 1, "charging_status": 2, "error_code": 0},
            "HeadMsg": {"head_type": 3},
            "RTKMSG": {"status": 4, "heading": 180.0},
            "RunningStatusMSG": {"chute_angle": 90, "rain_sensor_data": 0},
        }));

        assert_eq!(snapshot.state_code(), Some(1));
        assert_eq!(snapshot.charging_status_code(), Some(2));
        assert_eq!(snapshot.error_code_value(), Some(0));
        assert_eq!(snapshot.head_type_code(), Some(3));
        assert_eq!(snapshot.rtk_status_code(), Some(4));
        assert_eq!(snapshot.heading_degrees(), Some(180.0));
        assert_eq!(snapshot.chute_angle_degrees(), Some(90));
        assert_eq!(snapshot.rain_sensor_value(), Some(0));
    }

    #[test]
    fn test_null_raw_value_is_skipped() {
        let snapshot = with_raw(json!({"StateMSG": {"error_code": null}}));
        assert_eq!(resolve(&snapshot, ERROR_CODE), None);
    }

    #[test]
    fn test_numeric_coercions() {
        let snapshot = with_raw(json!({
            "StateMSG": {"working_state": 7.9, "charging_status": "3", "plan_id": 12},
            "HeadMsg": {"head_type": true},
        }));

        assert_eq!(snapshot.state_code(), Some(7));
        assert_eq!(snapshot.charging_status_code(), Some(3));
        assert_eq!(snapshot.plan(), Some("12".to_string()));
        assert_eq!(snapshot.head_type_code(), None);
    }

    #[test]
    fn test_empty_snapshot_resolves_nothing() {
        let snapshot = TelemetrySnapshot::default();
        for chain in [BATTERY, CHARGING_STATUS, WORKING_STATE, ERROR_CODE, HEAD_TYPE] {
            assert_eq!(resolve(&snapshot, chain), None);
        }
    }

    #[test]
    fn test_chain_order_is_typed_first() {
        for chain in [BATTERY, CHARGING_STATUS, WORKING_STATE, ERROR_CODE, HEAD_TYPE, PLAN_ID] {
            assert!(matches!(chain[0], Lookup::Typed(_)), "{:?}", chain);
            assert!(matches!(chain.last(), Some(Lookup::RawPath(_))), "{:?}", chain);
        }
    }
}
