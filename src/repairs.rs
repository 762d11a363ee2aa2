//! # Repair Issues
//!
//! User-visible problem signals with create-once / resolve-once semantics.
//!
//! | Issue | Key | Raised by | Resolved by |
//! |-------|-----|-----------|-------------|
//! | Link silent | `mqtt_disconnect` | heartbeat watchdog | next accepted telemetry |
//! | Controller lost | `controller_lost` | failed acquisition, observed revocation | successful acquisition |
//! | Cloud token expired | `cloud_token_expired` | cloud client (401/403) | re-authentication |
//!
//! Every kind runs the same two-state machine (`Inactive -> Active ->
//! Inactive`). Only transitions produce side effects on the [`IssueSink`];
//! repeated reports or resolves are no-ops.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    LinkSilent,
    ControllerLost,
    CloudTokenExpired,
}

impl IssueKind {
    pub const ALL: [IssueKind; 3] = [
        IssueKind::LinkSilent,
        IssueKind::ControllerLost,
        IssueKind::CloudTokenExpired,
    ];

    /// Stable identifier, namespaced per device by [`IssueTracker::issue_id`]
    pub fn key(&self) -> &'static str {
        match self {
            IssueKind::LinkSilent => "mqtt_disconnect",
            IssueKind::ControllerLost => "controller_lost",
            IssueKind::CloudTokenExpired => "cloud_token_expired",
        }
    }

    pub fn severity(&self) -> IssueSeverity {
        match self {
            IssueKind::ControllerLost => IssueSeverity::Error,
            IssueKind::LinkSilent | IssueKind::CloudTokenExpired => IssueSeverity::Warning,
        }
    }

    /// Whether the user can act on the issue (re-acquire, re-authenticate)
    pub fn is_fixable(&self) -> bool {
        !matches!(self, IssueKind::LinkSilent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// Issue handed to the sink on creation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairIssue {
    pub id: String,
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub fixable: bool,
    pub device_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IssueState {
    #[default]
    Inactive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueAction {
    Report,
    Resolve,
}

/// Side effect produced by a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueEffect {
    Create,
    Delete,
}

impl IssueState {
    /// Transition table. Returns the next state and the side effect, if any.
    #[must_use]
    pub fn apply(self, action: IssueAction) -> (IssueState, Option<IssueEffect>) {
        match (self, action) {
            (IssueState::Inactive, IssueAction::Report) => (IssueState::Active, Some(IssueEffect::Create)),
            (IssueState::Active, IssueAction::Report) => (IssueState::Active, None),
            (IssueState::Active, IssueAction::Resolve) => (IssueState::Inactive, Some(IssueEffect::Delete)),
            (IssueState::Inactive, IssueAction::Resolve) => (IssueState::Inactive, None),
        }
    }
}

/// Receiver of issue side effects (the host's issue registry)
#[cfg_attr(test, mockall::automock)]
pub trait IssueSink: Send + Sync {
    fn create_issue(&self, issue: &RepairIssue);
    fn delete_issue(&self, issue_id: &str);
}

/// Sink that only logs; used when no issue registry is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingIssueSink;

impl IssueSink for LoggingIssueSink {
    fn create_issue(&self, issue: &RepairIssue) {
        info!(
            "Repair issue raised: {} ({:?}, fixable={}) for {}",
            issue.id, issue.severity, issue.fixable, issue.device_name
        );
    }

    fn delete_issue(&self, issue_id: &str) {
        info!("Repair issue cleared: {}", issue_id);
    }
}

/// Per-device issue bookkeeping
pub struct IssueTracker {
    device_id: String,
    device_name: String,
    sink: Arc<dyn IssueSink>,
    states: Mutex<HashMap<IssueKind, IssueState>>,
}

impl std::fmt::Debug for IssueTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueTracker")
            .field("device_id", &self.device_id)
            .field("active", &self.active_issues())
            .finish_non_exhaustive()
    }
}

impl IssueTracker {
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>, sink: Arc<dyn IssueSink>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            sink,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Device-namespaced identifier, e.g. `controller_lost_24400102L8HO5227`
    pub fn issue_id(&self, kind: IssueKind) -> String {
        format!("{}_{}", kind.key(), self.device_id)
    }

    pub fn state(&self, kind: IssueKind) -> IssueState {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(&kind).copied().unwrap_or_default()
    }

    pub fn is_active(&self, kind: IssueKind) -> bool {
        self.state(kind) == IssueState::Active
    }

    pub fn active_issues(&self) -> Vec<IssueKind> {
        IssueKind::ALL
            .into_iter()
            .filter(|kind| self.is_active(*kind))
            .collect()
    }

    /// Raise an issue. Returns `true` if this call created it.
    pub fn report(&self, kind: IssueKind) -> bool {
        self.transition(kind, IssueAction::Report)
    }

    /// Clear an issue. Returns `true` if this call deleted it.
    pub fn resolve(&self, kind: IssueKind) -> bool {
        self.transition(kind, IssueAction::Resolve)
    }

    pub fn report_controller_lost(&self) -> bool {
        self.report(IssueKind::ControllerLost)
    }

    pub fn resolve_controller_lost(&self) -> bool {
        self.resolve(IssueKind::ControllerLost)
    }

    pub fn report_link_silent(&self) -> bool {
        self.report(IssueKind::LinkSilent)
    }

    pub fn resolve_link_silent(&self) -> bool {
        self.resolve(IssueKind::LinkSilent)
    }

    pub fn report_cloud_token_expired(&self) -> bool {
        self.report(IssueKind::CloudTokenExpired)
    }

    pub fn resolve_cloud_token_expired(&self) -> bool {
        self.resolve(IssueKind::CloudTokenExpired)
    }

    /// Delete every issue for this device regardless of tracked state.
    ///
    /// Used on setup so issues left over from a previous run do not linger.
    pub fn reset_all(&self) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        for kind in IssueKind::ALL {
            self.sink.delete_issue(&self.issue_id(kind));
            states.insert(kind, IssueState::Inactive);
        }
    }

    fn transition(&self, kind: IssueKind, action: IssueAction) -> bool {
        // The sink is called under the lock so concurrent reports cannot both
        // observe Inactive.
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let current = states.get(&kind).copied().unwrap_or_default();
        let (next, effect) = current.apply(action);
        states.insert(kind, next);

        match effect {
            Some(IssueEffect::Create) => {
                let issue = RepairIssue {
                    id: self.issue_id(kind),
                    kind,
                    severity: kind.severity(),
                    fixable: kind.is_fixable(),
                    device_name: self.device_name.clone(),
                };
                self.sink.create_issue(&issue);
                true
            }
            Some(IssueEffect::Delete) => {
                self.sink.delete_issue(&self.issue_id(kind));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(sink: MockIssueSink) -> IssueTracker {
        IssueTracker::new("SN123", "Backyard", Arc::new(sink))
    }

    #[test]
    fn test_transition_table() {
        use IssueAction::*;
        use IssueState::*;

        assert_eq!(Inactive.apply(Report), (Active, Some(IssueEffect::Create)));
        assert_eq!(Active.apply(Report), (Active, None));
        assert_eq!(Active.apply(Resolve), (Inactive, Some(IssueEffect::Delete)));
        assert_eq!(Inactive.apply(Resolve), (Inactive, None));
    }

    #[test]
    fn test_issue_keys_are_stable() {
        assert_eq!(IssueKind::LinkSilent.key(), "mqtt_disconnect");
        assert_eq!(IssueKind::ControllerLost.key(), "controller_lost");
        assert_eq!(IssueKind::CloudTokenExpired.key(), "cloud_token_expired");
    }

    #[test]
    fn test_report_twice_creates_once() {
        let mut sink = MockIssueSink::new();
        sink.expect_create_issue()
            .withf(|issue| issue.id == "controller_lost_SN123" && issue.fixable)
            .times(1)
            .return_const(());
        sink.expect_delete_issue().times(0);

        let tracker = tracker(sink);
        assert!(tracker.report_controller_lost());
        assert!(!tracker.report_controller_lost());
        assert!(tracker.is_active(IssueKind::ControllerLost));
    }

    #[test]
    fn test_resolve_inactive_has_no_side_effect() {
        let mut sink = MockIssueSink::new();
        sink.expect_create_issue().times(0);
        sink.expect_delete_issue().times(0);

        let tracker = tracker(sink);
        assert!(!tracker.resolve_controller_lost());
        assert_eq!(tracker.state(IssueKind::ControllerLost), IssueState::Inactive);
    }

    #[test]
    fn test_full_cycle_deletes_namespaced_id() {
        let mut sink = MockIssueSink::new();
        sink.expect_create_issue().times(1).return_const(());
        sink.expect_delete_issue()
            .withf(|id| id == "mqtt_disconnect_SN123")
            .times(1)
            .return_const(());

        let tracker = tracker(sink);
        assert!(tracker.report_link_silent());
        assert!(tracker.resolve_link_silent());
        assert!(!tracker.resolve_link_silent());
        assert!(tracker.active_issues().is_empty());
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut sink = MockIssueSink::new();
        sink.expect_create_issue().times(2).return_const(());
        sink.expect_delete_issue().times(1).return_const(());

        let tracker = tracker(sink);
        tracker.report_cloud_token_expired();
        tracker.report_link_silent();
        tracker.resolve_link_silent();

        assert_eq!(tracker.active_issues(), vec![IssueKind::CloudTokenExpired]);
    }

    #[test]
    fn test_severity_and_fixable() {
        let mut sink = MockIssueSink::new();
        sink.expect_create_issue()
            .withf(|issue| {
                issue.kind == IssueKind::LinkSilent
                    && issue.severity == IssueSeverity::Warning
                    && !issue.fixable
                    && issue.device_name == "Backyard"
            })
            .times(1)
            .return_const(());

        tracker(sink).report_link_silent();
    }

    #[test]
    fn test_reset_all_deletes_every_kind() {
        let mut sink = MockIssueSink::new();
        sink.expect_create_issue().times(2).return_const(());
        sink.expect_delete_issue().times(3).return_const(());

        let tracker = tracker(sink);
        tracker.report_controller_lost();
        tracker.reset_all();

        assert!(tracker.active_issues().is_empty());
        // After a reset the next report creates again
        assert!(tracker.report_controller_lost());
    }
}
