//! Liveness by elapsed time since the last accepted update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Written by the ingestion loop, read from anywhere.
///
/// The last-seen time is stored as nanoseconds after `epoch`, offset by one
/// so that zero means "never".
#[derive(Debug)]
pub struct Heartbeat {
    epoch: Instant,
    last_seen: AtomicU64,
    timeout: Duration,
}

impl Heartbeat {
    pub fn new(timeout: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_seen: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn beat(&self, now: Instant) {
        let nanos = now.saturating_duration_since(self.epoch).as_nanos() as u64;
        self.last_seen.store(nanos.saturating_add(1), Ordering::Release);
    }

    pub fn last_seen(&self) -> Option<Instant> {
        match self.last_seen.load(Ordering::Acquire) {
            0 => None,
            n => Some(self.epoch + Duration::from_nanos(n - 1)),
        }
    }

    pub fn has_seen(&self) -> bool {
        self.last_seen().is_some()
    }

    /// `true` iff data was seen and `now - last_seen < timeout`
    pub fn is_online(&self, now: Instant) -> bool {
        self.last_seen()
            .map(|seen| now.saturating_duration_since(seen) < self.timeout)
            .unwrap_or(false)
    }
}
