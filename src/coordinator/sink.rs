//! Where accepted snapshots go.

use std::sync::Arc;
use tokio::sync::watch;

use crate::telemetry::TelemetrySnapshot;

/// Receiver of published state (the presentation layer)
#[cfg_attr(test, mockall::automock)]
pub trait StateSink: Send + Sync {
    fn publish(&self, snapshot: Arc<TelemetrySnapshot>);

    /// Mark the published data as stale after a link failure
    fn mark_unavailable(&self, reason: &str);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedState {
    pub snapshot: Option<Arc<TelemetrySnapshot>>,
    pub available: bool,
    pub last_error: Option<String>,
}

/// In-process sink backed by a `watch` channel
#[derive(Debug)]
pub struct WatchStateSink {
    tx: watch::Sender<PublishedState>,
}

impl WatchStateSink {
    pub fn new() -> (Self, watch::Receiver<PublishedState>) {
        let (tx, rx) = watch::channel(PublishedState::default());
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<PublishedState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> PublishedState {
        self.tx.borrow().clone()
    }
}

impl StateSink for WatchStateSink {
    fn publish(&self, snapshot: Arc<TelemetrySnapshot>) {
        self.tx.send_modify(|state| {
            state.snapshot = Some(snapshot);
            state.available = true;
            state.last_error = None;
        });
    }

    fn mark_unavailable(&self, reason: &str) {
        self.tx.send_modify(|state| {
            state.available = false;
            state.last_error = Some(reason.to_string());
        });
    }
}
