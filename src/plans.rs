//! # Work Plans
//!
//! Plan catalog built from `read_all_plan` / `read_plan` feedback.
//!
//! This module handles:
//! - Decoding plan summaries and plan details from `data_feedback` replies
//! - Caching the catalog, the selected plan and its remaining time
//! - The start percentage sent with `start_plan`
//!
//! The requests themselves go through
//! [`Coordinator::read_all_plans`](crate::Coordinator::read_all_plans) and
//! friends, which hold the command lock.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Plan identifier; firmware reports both numeric and string ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanId {
    Number(i64),
    Text(String),
}

impl PlanId {
    /// Accept a JSON number or string, anything else is not an id
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(PlanId::Number),
            Value::String(s) => Some(PlanId::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanId::Number(n) => write!(f, "{}", n),
            PlanId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PlanId {
    fn from(value: i64) -> Self {
        PlanId::Number(value)
    }
}

impl From<&str> for PlanId {
    fn from(value: &str) -> Self {
        PlanId::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub id: PlanId,
    pub name: String,
    pub area_ids: Vec<String>,
}

/// Parse the `data` list of a `read_all_plan` reply.
///
/// Entries without an id or a name are skipped. A scalar `areaIds` becomes a
/// one-element list.
pub fn parse_plan_list(reply: &Map<String, Value>) -> Vec<PlanSummary> {
    let Some(plans) = reply.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };

    plans
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|plan| {
            let id = plan.get("id").and_then(PlanId::from_value)?;
            let name = match plan.get("name")? {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            let area_ids = match plan.get("areaIds") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(ids)) => ids.iter().map(value_text).collect(),
                Some(other) => vec![value_text(other)],
            };
            Some(PlanSummary { id, name, area_ids })
        })
        .collect()
}

/// The plan detail object of a `read_plan` reply: `data` when it is an
/// object, otherwise the reply itself.
pub fn parse_plan_detail(reply: &Map<String, Value>) -> Map<String, Value> {
    match reply.get("data") {
        Some(Value::Object(detail)) => detail.clone(),
        _ => reply.clone(),
    }
}

/// Remaining plan time in seconds (`leftTime`), if numeric
pub fn remaining_time(detail: &Map<String, Value>) -> Option<i64> {
    let left = detail.get("leftTime")?;
    left.as_i64().or_else(|| left.as_f64().map(|f| f as i64))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    summaries: Vec<PlanSummary>,
    by_id: HashMap<PlanId, PlanSummary>,
    selected: Option<PlanId>,
    remaining_time: Option<i64>,
    start_percent: u8,
}

/// Last known plan catalog of one device
#[derive(Debug, Default)]
pub struct PlanCatalog {
    state: Mutex<CatalogState>,
}

impl PlanCatalog {
    pub fn new(start_percent: u8) -> Self {
        let catalog = Self::default();
        catalog.set_start_percent(i64::from(start_percent));
        catalog
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the catalog with a fresh plan list
    pub fn replace(&self, summaries: Vec<PlanSummary>) {
        let mut state = self.lock();
        state.by_id = summaries.iter().map(|p| (p.id.clone(), p.clone())).collect();
        state.summaries = summaries;
    }

    pub fn summaries(&self) -> Vec<PlanSummary> {
        self.lock().summaries.clone()
    }

    pub fn get(&self, id: &PlanId) -> Option<PlanSummary> {
        self.lock().by_id.get(id).cloned()
    }

    /// Name of a plan, if it is in the catalog
    pub fn name_of(&self, id: &PlanId) -> Option<String> {
        self.get(id).map(|p| p.name)
    }

    pub fn selected(&self) -> Option<PlanId> {
        self.lock().selected.clone()
    }

    pub fn select(&self, id: PlanId) {
        self.lock().selected = Some(id);
    }

    pub fn remaining_time(&self) -> Option<i64> {
        self.lock().remaining_time
    }

    /// Record the outcome of a `read_plan`; a missing `leftTime` clears it.
    pub fn apply_detail(&self, detail: &Map<String, Value>) {
        self.lock().remaining_time = remaining_time(detail);
    }

    pub fn start_percent(&self) -> u8 {
        self.lock().start_percent
    }

    /// Set the start percentage, clamped to 0..=100
    pub fn set_start_percent(&self, percent: i64) -> u8 {
        let clamped = percent.clamp(0, 100) as u8;
        self.lock().start_percent = clamped;
        clamped
    }
}
