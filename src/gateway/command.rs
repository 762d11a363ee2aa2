//! Device command set (name plus JSON payload).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::plans::PlanId;

/// Sub-action of `in_plan_action`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Pause,
    Resume,
    Stop,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Pause => "pause",
            PlanAction::Resume => "resume",
            PlanAction::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Return to dock
    Recharge,
    Resume,
    Pause,
    Stop,
    EmergencyStop,
    SetTurnType(i64),
    PushSnowDirection(i64),
    /// Start a work plan at `percent` of its route
    StartPlan { plan_id: PlanId, percent: u8 },
    PlanAction(PlanAction),
    /// Any other topic understood by the firmware
    Raw { name: String, payload: Value },
}

impl Command {
    /// Wire command name
    pub fn name(&self) -> &str {
        match self {
            Command::Recharge => "cmd_recharge",
            Command::Resume => "resume",
            Command::Pause => "planning_paused",
            Command::Stop => "dstop",
            Command::EmergencyStop => "emergency_stop_active",
            Command::SetTurnType(_) => "set_turn_type",
            Command::PushSnowDirection(_) => "push_snow_dir",
            Command::StartPlan { .. } => "start_plan",
            Command::PlanAction(_) => "in_plan_action",
            Command::Raw { name, .. } => name,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Command::Recharge | Command::Resume | Command::Pause | Command::Stop | Command::EmergencyStop => {
                json!({})
            }
            Command::SetTurnType(turn_type) => json!({ "turn_type": turn_type }),
            Command::PushSnowDirection(direction) => json!({ "direction": direction }),
            Command::StartPlan { plan_id, percent } => json!({ "planId": plan_id, "percent": percent }),
            Command::PlanAction(action) => json!({ "action": action.as_str() }),
            Command::Raw { payload, .. } => payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(Command::Recharge.name(), "cmd_recharge");
        assert_eq!(Command::Pause.name(), "planning_paused");
        assert_eq!(Command::Stop.name(), "dstop");
        assert_eq!(Command::EmergencyStop.name(), "emergency_stop_active");
        assert_eq!(Command::PlanAction(PlanAction::Stop).name(), "in_plan_action");
    }

    #[test]
    fn test_payload_shapes() {
        assert_eq!(Command::Resume.payload(), json!({}));
        assert_eq!(Command::SetTurnType(2).payload(), json!({"turn_type": 2}));
        assert_eq!(Command::PushSnowDirection(-1).payload(), json!({"direction": -1}));
        let start = Command::StartPlan {
            plan_id: PlanId::Number(42),
            percent: 30,
        };
        assert_eq!(start.payload(), json!({"planId": 42, "percent": 30}));
        let start = Command::StartPlan {
            plan_id: PlanId::Text("p-7".to_string()),
            percent: 0,
        };
        assert_eq!(start.payload(), json!({"planId": "p-7", "percent": 0}));
        assert_eq!(
            Command::PlanAction(PlanAction::Pause).payload(),
            json!({"action": "pause"})
        );
    }

    #[test]
    fn test_raw_passthrough() {
        let command = Command::Raw {
            name: "set_sound_param".to_string(),
            payload: json!({"vol": 3}),
        };
        assert_eq!(command.name(), "set_sound_param");
        assert_eq!(command.payload(), json!({"vol": 3}));
    }
}
