//! Drop-based update throttle.
//!
//! Samples arriving sooner than the interval after the last accepted one are
//! discarded, never queued.

use std::time::Duration;
use tokio::time::Instant;

/// Owned by the ingestion loop; not shared
#[derive(Debug, Default, Clone)]
pub struct ThrottleState {
    last_accepted: Option<Instant>,
    accepted: u64,
    dropped: u64,
}

impl ThrottleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a sample arriving at `now` is accepted.
    ///
    /// A zero interval accepts everything.
    pub fn admit(&mut self, now: Instant, interval: Duration) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < interval {
                self.dropped += 1;
                return false;
            }
        }
        self.last_accepted = Some(now);
        self.accepted += 1;
        true
    }

    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
