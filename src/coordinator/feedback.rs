//! Request/response exchanges on top of the command gateway.
//!
//! User-facing requests (plan catalog, ad hoc feedback) hold the command lock.
//! The periodic diagnostic poll skips it and gives each request a short
//! timeout, so it never delays a command for long.
//!
//! Some requests are only answered while the robot is out on a job; those
//! are skipped, returning an empty reply, unless the last accepted snapshot
//! is [`Working`](crate::telemetry::ActivityState::Working) or
//! [`Returning`](crate::telemetry::ActivityState::Returning).

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::Coordinator;
use crate::error::{Result, YarboError};
use crate::gateway::Command;
use crate::plans::{self, PlanCatalog, PlanId, PlanSummary};

/// Requests the firmware only answers during an active operation
pub const ACTIVE_ONLY_REQUESTS: &[&str] = &[
    "battery_cell_temp_msg",
    "motor_temp_samp",
    "body_current_msg",
    "head_current_msg",
    "speed_msg",
    "odometer_msg",
    "product_code_msg",
    "hub_info",
    "get_wifi_list",
    "read_recharge_point",
    "get_all_map_backup",
    "read_schedules",
    "read_all_plan",
    "read_plan",
];

/// Polled every diagnostic interval
pub const DIAGNOSTIC_REQUESTS: &[&str] = &[
    "get_connect_wifi_name",
    "battery_cell_temp_msg",
    "odometer_msg",
    "read_no_charge_period",
    "read_schedules",
    "body_current_msg",
    "head_current_msg",
    "speed_msg",
    "product_code_msg",
    "hub_info",
    "read_recharge_point",
    "get_wifi_list",
    "get_all_map_backup",
    "read_clean_area",
    "motor_temp_samp",
];

/// Per-request wait during a diagnostic poll
pub const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(1);

pub fn is_active_only(name: &str) -> bool {
    ACTIVE_ONLY_REQUESTS.contains(&name)
}

impl Coordinator {
    /// True when the last accepted snapshot shows a job in progress
    pub fn is_active_operation(&self) -> bool {
        self.latest()
            .is_some_and(|snapshot| snapshot.activity().is_active_operation())
    }

    /// Send `name` under the command lock and await its `data_feedback`.
    ///
    /// Active-only requests return an empty map without touching the
    /// transport while the robot is not working.
    ///
    /// # Errors
    ///
    /// * `FeedbackTimeout` - no reply within the configured feedback timeout
    /// * `GatewayClosed` - the coordinator was shut down
    pub async fn request_feedback(&self, name: &str, payload: Value) -> Result<Map<String, Value>> {
        if is_active_only(name) && !self.is_active_operation() {
            debug!("Skipping {} for {}: no active operation", name, self.device_id());
            return Ok(Map::new());
        }
        self.inner
            .gateway
            .request(name, payload, self.inner.feedback_timeout)
            .await
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.inner.plans
    }

    /// Refresh the plan catalog. A skipped or empty reply keeps the previous
    /// catalog.
    pub async fn read_all_plans(&self) -> Result<Vec<PlanSummary>> {
        let reply = self.request_feedback("read_all_plan", json!({})).await?;
        if reply.is_empty() {
            return Ok(self.inner.plans.summaries());
        }

        let summaries = plans::parse_plan_list(&reply);
        info!("Read {} plans from {}", summaries.len(), self.device_id());
        self.inner.plans.replace(summaries.clone());
        Ok(summaries)
    }

    /// Read one plan and update the remaining time.
    ///
    /// Returns the plan detail, empty when the request was skipped.
    pub async fn read_plan(&self, id: &PlanId) -> Result<Map<String, Value>> {
        let reply = self.request_feedback("read_plan", json!({ "id": id })).await?;
        if reply.is_empty() {
            return Ok(reply);
        }

        let detail = plans::parse_plan_detail(&reply);
        self.inner.plans.apply_detail(&detail);
        Ok(detail)
    }

    /// Start `id` at the configured start percentage and select it.
    ///
    /// The follow-up `read_plan` is best effort; its failure does not fail
    /// the start.
    pub async fn start_plan(&self, id: PlanId) -> Result<()> {
        let percent = self.inner.plans.start_percent();
        self.inner
            .gateway
            .send(Command::StartPlan {
                plan_id: id.clone(),
                percent,
            })
            .await?;

        match self.inner.plans.name_of(&id) {
            Some(name) => info!("Started plan '{}' ({}) at {}%", name, id, percent),
            None => info!("Started plan {} at {}%", id, percent),
        }
        self.inner.plans.select(id.clone());

        if let Err(e) = self.read_plan(&id).await {
            debug!("Could not read plan {} after start: {}", id, e);
        }
        Ok(())
    }

    /// Run one diagnostic poll without the command lock.
    ///
    /// Returns how many entries were updated. A poll already in progress
    /// makes this a no-op.
    pub async fn poll_diagnostics(&self) -> usize {
        let Ok(_polling) = self.inner.diagnostic_lock.try_lock() else {
            debug!("Diagnostic poll already running for {}", self.device_id());
            return 0;
        };

        let active = self.is_active_operation();
        let mut updated = 0;
        for &name in DIAGNOSTIC_REQUESTS {
            if is_active_only(name) && !active {
                continue;
            }

            match self
                .inner
                .gateway
                .request_unlocked(name, json!({}), DIAGNOSTIC_TIMEOUT)
                .await
            {
                Ok(reply) => {
                    let value = match reply.get("data").filter(|data| !data.is_null()).cloned() {
                        Some(data) => data,
                        None if reply.is_empty() => continue,
                        None => Value::Object(reply),
                    };
                    self.inner
                        .diagnostics
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(name.to_string(), value);
                    updated += 1;
                }
                Err(YarboError::GatewayClosed) => break,
                Err(e) => debug!("Diagnostic {} failed: {}", name, e),
            }
        }

        debug!("Diagnostic poll for {} updated {} entries", self.device_id(), updated);
        updated
    }

    /// Last diagnostic replies by request name
    pub fn diagnostics(&self) -> HashMap<String, Value> {
        self.inner
            .diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn diagnostic(&self, name: &str) -> Option<Value> {
        self.inner
            .diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

pub(super) async fn run_diagnostics(coordinator: Coordinator, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => return,
                    _ = coordinator.poll_diagnostics() => {}
                }
            }
        }
    }
}
