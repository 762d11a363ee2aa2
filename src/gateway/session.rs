//! Shared controller session state.
//!
//! The flag is the last known outcome of an acquisition. It is re-asserted
//! before every command and may be revoked remotely between commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct CommandSession {
    acquired: AtomicBool,
    transport_id: Mutex<Option<String>>,
}

impl CommandSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }

    /// Transport that performed the last successful acquisition
    pub fn transport_id(&self) -> Option<String> {
        self.transport_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn mark_acquired(&self, transport_id: &str) {
        *self.transport_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(transport_id.to_string());
        self.acquired.store(true, Ordering::Release);
    }

    pub fn revoke(&self) {
        self.acquired.store(false, Ordering::Release);
    }
}
