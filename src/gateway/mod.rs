//! # Command Gateway
//!
//! Serializes command dispatch against the single controller session.
//!
//! This module handles:
//! - One in-flight command at a time (FIFO for waiters)
//! - Re-asserting the controller role before every command, with a timeout
//! - Raising and clearing the controller-lost repair issue
//! - Request/response exchanges awaiting a `data_feedback` reply
//! - Tapping successful commands into the trace recorder
//!
//! Each command holds the command lock for exactly this sequence:
//!
//! ```text
//! lock -> acquire_controller (bounded) -> send_command -> unlock
//! ```
//!
//! Requests publish without re-acquiring the controller and hold the lock
//! until the reply arrives or times out. Low-priority diagnostics may skip
//! the lock with [`CommandGateway::request_unlocked`].
//!
//! The lock guard is dropped on every exit path, including errors.

pub mod command;
pub mod session;
pub mod transport;

pub use command::{Command, PlanAction};
pub use session::CommandSession;
pub use transport::{DryRunTransport, Transport};

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, YarboError};
use crate::recorder::{TracePayload, TraceTap};
use crate::repairs::IssueTracker;

/// Default bound on a controller acquisition
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for a `data_feedback` reply
pub const DEFAULT_FEEDBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle; all clones share one lock and one session
#[derive(Clone)]
pub struct CommandGateway {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    lock: Mutex<()>,
    session: Arc<CommandSession>,
    issues: Arc<IssueTracker>,
    trace: Option<TraceTap>,
    acquire_timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for CommandGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGateway")
            .field("transport", &self.inner.transport.id())
            .field("acquired", &self.inner.session.is_acquired())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl CommandGateway {
    /// Create a gateway over `transport`.
    ///
    /// # Arguments
    ///
    /// * `transport` - Connection commands are sent through
    /// * `issues` - Tracker that receives controller-lost reports
    /// * `trace` - Optional trace tap for outbound traffic
    /// * `acquire_timeout` - Bound on each controller acquisition
    pub fn new(
        transport: Arc<dyn Transport>,
        issues: Arc<IssueTracker>,
        trace: Option<TraceTap>,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                lock: Mutex::new(()),
                session: Arc::new(CommandSession::new()),
                issues,
                trace,
                acquire_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn session(&self) -> &Arc<CommandSession> {
        &self.inner.session
    }

    pub fn transport_id(&self) -> &str {
        self.inner.transport.id()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Send a named command.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.execute(command.name(), command.payload()).await
    }

    /// Acquire the controller, then send `name` with `payload`.
    ///
    /// # Errors
    ///
    /// * `ControllerAcquisition` / `ControllerTimeout` - the command was not sent
    /// * `Command` / `Transport` - the transport rejected the command
    /// * `GatewayClosed` - the gateway was shut down
    pub async fn execute(&self, name: &str, payload: Value) -> Result<()> {
        {
            let _guard = self.inner.lock.lock().await;
            self.ensure_open()?;
            self.assert_controller().await?;
            self.inner.transport.send_command(name, &payload).await?;
            debug!("Command {} sent via {}", name, self.inner.transport.id());
        }

        // Recorded outside the command lock
        self.trace_outbound(name, payload);
        Ok(())
    }

    /// Publish `name` under the command lock and await its reply.
    ///
    /// A reply that is not a JSON object yields an empty map.
    ///
    /// # Errors
    ///
    /// * `FeedbackTimeout` - no reply within `timeout`
    /// * `Command` / `Transport` - the transport rejected the request
    /// * `GatewayClosed` - the gateway was shut down
    pub async fn request(&self, name: &str, payload: Value, timeout: Duration) -> Result<Map<String, Value>> {
        let _guard = self.inner.lock.lock().await;
        self.request_unlocked(name, payload, timeout).await
    }

    /// Like [`request`](Self::request) but without taking the command lock.
    ///
    /// For periodic diagnostics that must not queue behind user commands.
    pub async fn request_unlocked(&self, name: &str, payload: Value, timeout: Duration) -> Result<Map<String, Value>> {
        self.ensure_open()?;

        let transport = &self.inner.transport;
        let reply = match tokio::time::timeout(timeout, transport.request(name, &payload, timeout)).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(YarboError::FeedbackTimeout {
                    command: name.to_string(),
                    timeout,
                })
            }
        };
        debug!("Feedback for {} via {}", name, transport.id());

        self.trace_outbound(name, payload);
        Ok(match reply {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }

    fn trace_outbound(&self, name: &str, payload: Value) {
        if let Some(trace) = &self.inner.trace {
            trace.record_outbound(name, TracePayload::Json(payload), None);
        }
    }

    /// Re-acquire the controller without sending a command.
    ///
    /// Clears the controller-lost issue on success.
    pub async fn reacquire_controller(&self) -> Result<()> {
        let _guard = self.inner.lock.lock().await;
        self.ensure_open()?;
        self.assert_controller().await?;
        info!("Controller re-acquired via {}", self.inner.transport.id());
        Ok(())
    }

    /// Reject new commands and wait for the in-flight one to finish.
    pub async fn close_and_drain(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let _guard = self.inner.lock.lock().await;
        debug!("Command gateway drained");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(YarboError::GatewayClosed);
        }
        Ok(())
    }

    /// Must be called with the command lock held.
    async fn assert_controller(&self) -> Result<()> {
        let timeout = self.inner.acquire_timeout;
        let transport = &self.inner.transport;

        let outcome = match tokio::time::timeout(timeout, transport.acquire_controller(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(YarboError::ControllerTimeout(timeout)),
        };

        match outcome {
            Ok(()) => {
                self.inner.session.mark_acquired(transport.id());
                self.inner.issues.resolve_controller_lost();
                Ok(())
            }
            Err(e) => {
                warn!("Controller acquisition via {} failed: {}", transport.id(), e);
                self.inner.session.revoke();
                self.inner.issues.report_controller_lost();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::transport::mocks::MockTransport;
    use super::*;
    use crate::plans::PlanId;
    use crate::recorder::{Direction, TraceEntry, TraceRecorder};
    use crate::repairs::{IssueKind, LoggingIssueSink, MockIssueSink};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn gateway_with(transport: &MockTransport, issues: Arc<IssueTracker>) -> CommandGateway {
        CommandGateway::new(Arc::new(transport.clone()), issues, None, DEFAULT_ACQUIRE_TIMEOUT)
    }

    fn quiet_issues() -> Arc<IssueTracker> {
        Arc::new(IssueTracker::new("SN123", "Backyard", Arc::new(LoggingIssueSink)))
    }

    #[tokio::test]
    async fn test_execute_acquires_then_sends() {
        let transport = MockTransport::new();
        let gateway = gateway_with(&transport, quiet_issues());

        assert_ok!(gateway.send(Command::Recharge).await);

        assert_eq!(transport.get_calls(), vec!["acquire", "send:cmd_recharge"]);
        assert!(gateway.session().is_acquired());
        assert_eq!(gateway.session().transport_id().as_deref(), Some("mock"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_executes_never_interleave() {
        let transport = MockTransport::new();
        transport.set_acquire_delay(Duration::from_millis(20));
        transport.set_send_delay(Duration::from_millis(20));
        let gateway = gateway_with(&transport, quiet_issues());

        let a = gateway.clone();
        let b = gateway.clone();
        let (ra, rb) = tokio::join!(
            a.execute("first", json!({})),
            b.execute("second", json!({}))
        );
        ra.unwrap();
        rb.unwrap();

        let calls = transport.get_calls();
        assert_eq!(calls.len(), 4);
        for pair in calls.chunks(2) {
            assert_eq!(pair[0], "acquire");
            assert!(pair[1].starts_with("send:"), "unexpected call order {:?}", calls);
        }
        assert_ne!(calls[1], calls[3]);
    }

    #[tokio::test]
    async fn test_failed_acquire_prevents_send_and_raises_issue() {
        let transport = MockTransport::new();
        transport.set_acquire_error(Some("another client holds the controller"));

        let mut sink = MockIssueSink::new();
        sink.expect_create_issue()
            .withf(|issue| issue.kind == IssueKind::ControllerLost)
            .times(1)
            .return_const(());
        let issues = Arc::new(IssueTracker::new("SN123", "Backyard", Arc::new(sink)));
        let gateway = gateway_with(&transport, issues.clone());

        let result = gateway.send(Command::Resume).await;
        assert!(matches!(result, Err(YarboError::ControllerAcquisition(_))));
        // Second failure does not create a second issue
        assert!(gateway.send(Command::Resume).await.is_err());

        assert_eq!(transport.get_calls(), vec!["acquire", "acquire"]);
        assert!(!gateway.session().is_acquired());
        assert!(issues.is_active(IssueKind::ControllerLost));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout() {
        let transport = MockTransport::new();
        transport.set_acquire_delay(Duration::from_secs(30));
        let gateway = gateway_with(&transport, quiet_issues());

        let result = gateway.send(Command::Stop).await;
        assert!(matches!(result, Err(YarboError::ControllerTimeout(t)) if t == DEFAULT_ACQUIRE_TIMEOUT));
        assert_eq!(transport.get_calls(), vec!["acquire"]);
    }

    #[tokio::test]
    async fn test_lock_released_after_failure() {
        let transport = MockTransport::new();
        transport.set_acquire_error(Some("busy"));
        let gateway = gateway_with(&transport, quiet_issues());

        assert_err!(gateway.send(Command::Pause).await);

        transport.set_acquire_error(None);
        assert_ok!(gateway.send(Command::Pause).await);
    }

    #[tokio::test]
    async fn test_successful_acquire_resolves_issue() {
        let transport = MockTransport::new();

        let mut sink = MockIssueSink::new();
        sink.expect_create_issue().times(1).return_const(());
        sink.expect_delete_issue()
            .withf(|id| id == "controller_lost_SN123")
            .times(1)
            .return_const(());
        let issues = Arc::new(IssueTracker::new("SN123", "Backyard", Arc::new(sink)));
        let gateway = gateway_with(&transport, issues.clone());

        issues.report_controller_lost();
        gateway.reacquire_controller().await.unwrap();
        gateway.send(Command::Resume).await.unwrap();

        assert!(!issues.is_active(IssueKind::ControllerLost));
    }

    #[tokio::test]
    async fn test_send_failure_keeps_session() {
        let transport = MockTransport::new();
        transport.set_send_error(Some("rejected"));
        let gateway = gateway_with(&transport, quiet_issues());

        let result = gateway.send(Command::SetTurnType(1)).await;
        assert!(matches!(result, Err(YarboError::Command { ref command, .. }) if command == "set_turn_type"));
        assert!(gateway.session().is_acquired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_in_flight_command() {
        let transport = MockTransport::new();
        transport.set_send_delay(Duration::from_millis(100));
        let gateway = gateway_with(&transport, quiet_issues());

        let in_flight = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.send(Command::Recharge).await }
        });
        tokio::task::yield_now().await;

        gateway.close_and_drain().await;
        assert_eq!(transport.get_calls(), vec!["acquire", "send:cmd_recharge"]);
        in_flight.await.unwrap().unwrap();

        assert!(matches!(gateway.send(Command::Resume).await, Err(YarboError::GatewayClosed)));
        assert!(matches!(gateway.reacquire_controller().await, Err(YarboError::GatewayClosed)));
    }

    #[tokio::test]
    async fn test_successful_command_is_traced() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(TraceRecorder::new(dir.path(), "SN123", 1024 * 1024));
        let path = recorder.start().unwrap();
        let tap = TraceTap::new(recorder.clone(), 16);
        tap.spawn_writer();

        let transport = MockTransport::new();
        let gateway = CommandGateway::new(
            Arc::new(transport.clone()),
            quiet_issues(),
            Some(tap.clone()),
            DEFAULT_ACQUIRE_TIMEOUT,
        );

        let start = Command::StartPlan {
            plan_id: PlanId::from("9"),
            percent: 0,
        };
        gateway.send(start).await.unwrap();
        transport.set_send_error(Some("rejected"));
        assert!(gateway.send(Command::Resume).await.is_err());
        tap.stop().await;

        let content = std::fs::read_to_string(path).unwrap();
        let tx: Vec<TraceEntry> = content
            .lines()
            .map(|line| serde_json::from_str::<TraceEntry>(line).unwrap())
            .filter(|entry| entry.dir == Direction::Tx)
            .collect();
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].topic, "start_plan");
        assert_eq!(tx[0].payload, json!({"planId": "9", "percent": 0}));
    }

    #[tokio::test]
    async fn test_request_returns_feedback_without_acquiring() {
        let transport = MockTransport::new();
        transport.set_response("read_all_plan", json!({"state": 0, "data": []}));
        let gateway = gateway_with(&transport, quiet_issues());

        let reply = gateway
            .request("read_all_plan", json!({}), DEFAULT_FEEDBACK_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(reply.get("state"), Some(&json!(0)));
        assert_eq!(transport.get_calls(), vec!["request:read_all_plan"]);
        assert!(!gateway.session().is_acquired());
    }

    #[tokio::test]
    async fn test_non_object_feedback_is_empty() {
        let transport = MockTransport::new();
        transport.set_response("hub_info", json!("v1.2"));
        let gateway = gateway_with(&transport, quiet_issues());

        let reply = gateway.request("hub_info", json!({}), DEFAULT_FEEDBACK_TIMEOUT).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_releases_lock() {
        let transport = MockTransport::new();
        let gateway = gateway_with(&transport, quiet_issues());

        // No reply configured: the mock never answers
        let result = gateway.request("read_plan", json!({"id": 1}), Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(YarboError::FeedbackTimeout { ref command, timeout }) if command == "read_plan" && timeout == Duration::from_secs(2)
        ));

        assert_ok!(gateway.send(Command::Resume).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_waits_for_lock_but_unlocked_does_not() {
        let transport = MockTransport::new();
        transport.set_send_delay(Duration::from_secs(1));
        transport.set_response("speed_msg", json!({"data": 0.4}));
        let gateway = gateway_with(&transport, quiet_issues());

        let command = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.send(Command::Recharge).await }
        });
        tokio::task::yield_now().await;

        // Finishes while the command still holds the lock
        let unlocked = gateway
            .request_unlocked("speed_msg", json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(unlocked.get("data"), Some(&json!(0.4)));
        assert!(!command.is_finished());

        let locked = gateway.request("speed_msg", json!({}), Duration::from_secs(5)).await;
        assert_ok!(locked);
        command.await.unwrap().unwrap();

        let calls = transport.get_calls();
        let send = calls.iter().position(|c| c == "send:cmd_recharge").unwrap();
        assert_eq!(calls.iter().filter(|c| *c == "request:speed_msg").count(), 2);
        assert_eq!(calls.last().map(String::as_str), Some("request:speed_msg"));
        assert!(send < calls.len() - 1);
    }

    #[tokio::test]
    async fn test_request_after_close_is_rejected() {
        let transport = MockTransport::new();
        let gateway = gateway_with(&transport, quiet_issues());
        gateway.close_and_drain().await;

        let result = gateway.request_unlocked("hub_info", json!({}), DEFAULT_FEEDBACK_TIMEOUT).await;
        assert!(matches!(result, Err(YarboError::GatewayClosed)));
        assert!(transport.get_calls().is_empty());
    }
}
