//! # Telemetry Coordinator
//!
//! Owns the per-device ingestion loop.
//!
//! This module handles:
//! - Consuming snapshots from an injected channel
//! - Dropping samples that arrive faster than the throttle interval
//! - Heartbeat tracking and the link-silent watchdog
//! - Running the event detector on each accepted pair
//! - Publishing to the state sink and tapping inbound traffic to the recorder
//! - Request/response exchanges, the plan catalog and diagnostic polling
//!   (see [`feedback`])
//! - Orderly shutdown (no publishes afterwards, in-flight command drained)
//!
//! ## Accept path
//!
//! ```text
//! recv -> throttle ──drop──> (nothing)
//!            │
//!            └─accept─> heartbeat -> count -> detect/emit -> [gate] -> record RX -> publish
//! ```
//!
//! A link failure from the source marks the sink unavailable and ends the
//! loop with an error; the caller restarts it with a fresh source. Throttle
//! and detector state live in the coordinator, so a restart continues from
//! the last accepted snapshot.

pub mod feedback;
pub mod heartbeat;
pub mod sink;
pub mod throttle;

pub use heartbeat::Heartbeat;
pub use sink::{PublishedState, StateSink, WatchStateSink};
pub use throttle::ThrottleState;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{Config, CoordinatorConfig};
use crate::error::{Result, YarboError};
use crate::events::{EventDetector, EventKind, EventSink};
use crate::gateway::{CommandGateway, Transport, DEFAULT_FEEDBACK_TIMEOUT};
use crate::logging::LogLevelControl;
use crate::plans::PlanCatalog;
use crate::recorder::{tap, TracePayload, TraceRecorder, TraceTap};
use crate::repairs::{IssueSink, IssueTracker};
use crate::telemetry::TelemetrySnapshot;

/// One item from the telemetry source: a decoded snapshot or a link failure
pub type TelemetryItem = Result<TelemetrySnapshot>;

/// Recorder topic for accepted telemetry
pub const TELEMETRY_TOPIC: &str = "telemetry";

/// Runtime-adjustable options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorOptions {
    pub throttle_interval: Option<Duration>,
    /// `Some(true)` starts the recorder, `Some(false)` stops it
    pub recording: Option<bool>,
    /// Needs a [`LogLevelControl`] attached via `set_log_control`
    pub debug_logging: Option<bool>,
    /// Clamped to 0..=100
    pub plan_start_percent: Option<i64>,
}

/// Collaborators of a coordinator
pub struct CoordinatorParts {
    pub gateway: CommandGateway,
    pub issues: Arc<IssueTracker>,
    pub trace: Option<TraceTap>,
    pub state_sink: Arc<dyn StateSink>,
    pub event_sink: Arc<dyn EventSink>,
    pub feedback_timeout: Duration,
    pub plan_start_percent: u8,
}

impl CoordinatorParts {
    /// Parts with default request settings and no trace
    pub fn new(
        gateway: CommandGateway,
        issues: Arc<IssueTracker>,
        state_sink: Arc<dyn StateSink>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            gateway,
            issues,
            trace: None,
            state_sink,
            event_sink,
            feedback_timeout: DEFAULT_FEEDBACK_TIMEOUT,
            plan_start_percent: 0,
        }
    }
}

/// Cloneable handle to one device's ingestion pipeline
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

/// State carried across ingestion restarts; only the ingestion task writes it
struct IngestState {
    throttle: ThrottleState,
    detector: EventDetector,
}

struct Inner {
    device_id: String,
    throttle_nanos: AtomicU64,
    heartbeat: Heartbeat,
    watchdog_interval: Duration,
    diagnostic_interval: Option<Duration>,
    feedback_timeout: Duration,
    update_count: AtomicU64,
    record_on_start: AtomicBool,
    ingest_state: Mutex<IngestState>,
    gateway: CommandGateway,
    issues: Arc<IssueTracker>,
    trace: Option<TraceTap>,
    state_sink: Arc<dyn StateSink>,
    event_sink: Arc<dyn EventSink>,
    plans: PlanCatalog,
    diagnostics: Mutex<HashMap<String, Value>>,
    diagnostic_lock: tokio::sync::Mutex<()>,
    log_control: Mutex<Option<Arc<dyn LogLevelControl>>>,
    shutdown: watch::Sender<bool>,
    /// Cleared by shutdown; checked under the lock before each publish
    publishing: Mutex<bool>,
    ingest: Mutex<Option<JoinHandle<Result<()>>>>,
    /// Watchdog and diagnostic poller, spawned on the first start
    background: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("device_id", &self.inner.device_id)
            .field("update_count", &self.update_count())
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(device_id: impl Into<String>, config: &CoordinatorConfig, parts: CoordinatorParts) -> Self {
        let device_id = device_id.into();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                throttle_nanos: AtomicU64::new(duration_nanos(config.throttle_interval())),
                heartbeat: Heartbeat::new(config.heartbeat_timeout()),
                watchdog_interval: config.watchdog_interval(),
                diagnostic_interval: config.diagnostic_interval(),
                feedback_timeout: parts.feedback_timeout,
                update_count: AtomicU64::new(0),
                record_on_start: AtomicBool::new(false),
                ingest_state: Mutex::new(IngestState {
                    throttle: ThrottleState::new(),
                    detector: EventDetector::new(device_id.clone()),
                }),
                gateway: parts.gateway,
                issues: parts.issues,
                trace: parts.trace,
                state_sink: parts.state_sink,
                event_sink: parts.event_sink,
                plans: PlanCatalog::new(parts.plan_start_percent),
                diagnostics: Mutex::new(HashMap::new()),
                diagnostic_lock: tokio::sync::Mutex::new(()),
                log_control: Mutex::new(None),
                shutdown,
                publishing: Mutex::new(true),
                ingest: Mutex::new(None),
                background: Mutex::new(None),
                device_id,
            }),
        }
    }

    /// Wire a coordinator and its gateway, tracker and recorder from config.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        issue_sink: Arc<dyn IssueSink>,
        state_sink: Arc<dyn StateSink>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let device_id = config.device.id.clone();
        let issues = Arc::new(IssueTracker::new(&device_id, &config.device.name, issue_sink));
        let recorder = Arc::new(TraceRecorder::new(
            config.recorder.dir_path(),
            &device_id,
            config.recorder.max_size_bytes,
        ));
        let trace = TraceTap::new(recorder, tap::DEFAULT_QUEUE_DEPTH);
        let gateway = CommandGateway::new(
            transport,
            issues.clone(),
            Some(trace.clone()),
            config.gateway.acquire_timeout(),
        );

        let coordinator = Self::new(
            device_id,
            &config.coordinator,
            CoordinatorParts {
                gateway,
                issues,
                trace: Some(trace),
                state_sink,
                event_sink,
                feedback_timeout: config.gateway.feedback_timeout(),
                plan_start_percent: config.gateway.plan_start_percent,
            },
        );
        coordinator
            .inner
            .record_on_start
            .store(config.recorder.enabled, Ordering::Release);
        coordinator
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn gateway(&self) -> &CommandGateway {
        &self.inner.gateway
    }

    pub fn issues(&self) -> &Arc<IssueTracker> {
        &self.inner.issues
    }

    pub fn recorder(&self) -> Option<&Arc<TraceRecorder>> {
        self.inner.trace.as_ref().map(TraceTap::recorder)
    }

    pub fn trace(&self) -> Option<&TraceTap> {
        self.inner.trace.as_ref()
    }

    /// Number of accepted (published) updates
    pub fn update_count(&self) -> u64 {
        self.inner.update_count.load(Ordering::Acquire)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_nanos(self.inner.throttle_nanos.load(Ordering::Acquire))
    }

    /// Last accepted snapshot
    pub fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.inner.latest()
    }

    /// Online iff an update was accepted less than the heartbeat timeout ago.
    pub fn is_online(&self) -> bool {
        self.inner.heartbeat.is_online(Instant::now())
    }

    /// Raise the link-silent issue if data was seen and has since stopped.
    ///
    /// Returns the current online state. Never raises before the first
    /// accepted update.
    pub fn check_liveness(&self) -> bool {
        self.inner.check_liveness()
    }

    /// Attach the handle that `debug_logging` options are applied through
    pub fn set_log_control(&self, control: Arc<dyn LogLevelControl>) {
        *self.inner.log_control.lock().unwrap_or_else(|e| e.into_inner()) = Some(control);
    }

    /// Begin consuming `source`.
    ///
    /// The first call also clears stale repair issues, starts the trace
    /// writer (and the recorder if configured), and spawns the heartbeat
    /// watchdog and diagnostic poller. After the loop ends (source closed or
    /// link failure) `start` may be called again with a fresh source.
    ///
    /// # Errors
    ///
    /// * `AlreadyRunning` - an ingestion loop is still active
    /// * `ShutDown` - `shutdown()` was called
    pub fn start(&self, source: mpsc::Receiver<TelemetryItem>) -> Result<()> {
        if *self.inner.shutdown.borrow() {
            return Err(YarboError::ShutDown);
        }

        let mut ingest = self.inner.ingest.lock().unwrap_or_else(|e| e.into_inner());
        if ingest.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(YarboError::AlreadyRunning);
        }

        let mut background = self.inner.background.lock().unwrap_or_else(|e| e.into_inner());
        if background.is_none() {
            self.inner.issues.reset_all();
            if let Some(trace) = &self.inner.trace {
                trace.spawn_writer();
                if self.inner.record_on_start.load(Ordering::Acquire) {
                    if let Err(e) = trace.recorder().start() {
                        warn!("Failed to start trace recording: {}", e);
                    }
                }
            }

            let mut tasks = vec![tokio::spawn(run_watchdog(
                self.inner.clone(),
                self.inner.shutdown.subscribe(),
            ))];
            if let Some(interval) = self.inner.diagnostic_interval {
                tasks.push(tokio::spawn(feedback::run_diagnostics(
                    self.clone(),
                    interval,
                    self.inner.shutdown.subscribe(),
                )));
            }
            *background = Some(tasks);
        }

        info!("Starting telemetry ingestion for {}", self.inner.device_id);
        *ingest = Some(tokio::spawn(run_ingest(
            self.inner.clone(),
            source,
            self.inner.shutdown.subscribe(),
        )));
        Ok(())
    }

    /// Wait for the current ingestion loop to end and return its outcome.
    pub async fn wait(&self) -> Result<()> {
        let handle = self.inner.ingest.lock().unwrap_or_else(|e| e.into_inner()).take();
        match handle {
            Some(handle) => handle.await?,
            None => Ok(()),
        }
    }

    /// Apply new options without restarting ingestion.
    ///
    /// # Errors
    ///
    /// * `Io` - recording was requested and the trace file cannot be opened
    /// * `Logging` - the log filter could not be swapped
    pub fn update_options(&self, options: CoordinatorOptions) -> Result<()> {
        if let Some(interval) = options.throttle_interval {
            self.inner
                .throttle_nanos
                .store(duration_nanos(interval), Ordering::Release);
            info!("Throttle interval set to {:?}", interval);
        }

        if let Some(percent) = options.plan_start_percent {
            let applied = self.inner.plans.set_start_percent(percent);
            info!("Plan start percentage set to {}", applied);
        }

        if let Some(enabled) = options.debug_logging {
            let control = self.inner.log_control.lock().unwrap_or_else(|e| e.into_inner()).clone();
            match control {
                Some(control) => control.set_debug(enabled)?,
                None => debug!("No log control attached, ignoring debug_logging={}", enabled),
            }
        }

        if let Some(enabled) = options.recording {
            self.inner.record_on_start.store(enabled, Ordering::Release);
            if let Some(trace) = &self.inner.trace {
                let recorder = trace.recorder();
                match (enabled, recorder.is_enabled()) {
                    (true, false) => {
                        recorder.start()?;
                    }
                    (false, true) => recorder.stop(),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Stop ingestion and background tasks, drain the command gateway, and
    /// close the recorder. No snapshot is published after this returns.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        *self.inner.publishing.lock().unwrap_or_else(|e| e.into_inner()) = false;

        let ingest = self.inner.ingest.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = ingest {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Ingestion ended with error before shutdown: {}", e),
                Err(e) => warn!("Ingestion task failed: {}", e),
            }
        }

        let background = self.inner.background.lock().unwrap_or_else(|e| e.into_inner()).take();
        for handle in background.into_iter().flatten() {
            if let Err(e) = handle.await {
                warn!("Background task failed: {}", e);
            }
        }

        self.inner.gateway.close_and_drain().await;
        if let Some(trace) = &self.inner.trace {
            trace.stop().await;
        }

        info!(
            "Coordinator for {} shut down after {} updates",
            self.inner.device_id,
            self.update_count()
        );
    }
}

impl Inner {
    fn throttle_interval(&self) -> Duration {
        Duration::from_nanos(self.throttle_nanos.load(Ordering::Acquire))
    }

    fn ingest_state(&self) -> std::sync::MutexGuard<'_, IngestState> {
        self.ingest_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.ingest_state().detector.baseline().cloned()
    }

    fn check_liveness(&self) -> bool {
        let online = self.heartbeat.is_online(Instant::now());
        if !online && self.heartbeat.has_seen() && self.issues.report_link_silent() {
            warn!(
                "No telemetry from {} for {:?}",
                self.device_id,
                self.heartbeat.timeout()
            );
        }
        online
    }

    fn accept(&self, snapshot: TelemetrySnapshot) {
        let now = Instant::now();
        let mut state = self.ingest_state();
        if !state.throttle.admit(now, self.throttle_interval()) {
            debug!("Throttled update ({} dropped so far)", state.throttle.dropped());
            return;
        }

        self.heartbeat.beat(now);
        let count = self.update_count.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = Arc::new(snapshot);

        let controller_acquired = self.gateway.session().is_acquired();
        let events = state.detector.process(snapshot.clone(), controller_acquired);
        drop(state);

        for event in events {
            if event.kind == EventKind::ControllerLost {
                self.issues.report_controller_lost();
            }
            self.event_sink.emit(&event);
        }

        {
            let publishing = self.publishing.lock().unwrap_or_else(|e| e.into_inner());
            if !*publishing {
                return;
            }
            if let Some(trace) = &self.trace {
                trace.record_inbound(TELEMETRY_TOPIC, TracePayload::Json(trace_value(&snapshot)), None);
            }
            self.state_sink.publish(snapshot);
        }

        if self.issues.resolve_link_silent() {
            info!("Telemetry from {} resumed", self.device_id);
        }
        debug!("Accepted update #{}", count);
    }
}

async fn run_ingest(
    inner: Arc<Inner>,
    mut source: mpsc::Receiver<TelemetryItem>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("Ingestion for {} cancelled", inner.device_id);
                return Ok(());
            }

            item = source.recv() => match item {
                Some(Ok(snapshot)) => inner.accept(snapshot),
                Some(Err(e)) => {
                    warn!("Telemetry link failure for {}: {}", inner.device_id, e);
                    inner.state_sink.mark_unavailable(&e.to_string());
                    return Err(e);
                }
                None => {
                    let (accepted, dropped) = {
                        let state = inner.ingest_state();
                        (state.throttle.accepted(), state.throttle.dropped())
                    };
                    info!(
                        "Telemetry source for {} closed ({} accepted, {} dropped in total)",
                        inner.device_id, accepted, dropped
                    );
                    return Ok(());
                }
            },
        }
    }
}

async fn run_watchdog(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + inner.watchdog_interval, inner.watchdog_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                inner.check_liveness();
            }
        }
    }
}

/// Raw payload when present, otherwise the typed fields
fn trace_value(snapshot: &TelemetrySnapshot) -> Value {
    if !snapshot.raw.is_empty() {
        return Value::Object(snapshot.raw.clone());
    }
    serde_json::to_value(snapshot).unwrap_or(Value::Null)
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
