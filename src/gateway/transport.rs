//! Trait abstraction for the device transport to enable testing

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use crate::error::Result;

/// Command-side operations of the device connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the connection, recorded in the session on acquisition
    fn id(&self) -> &str;

    /// Claim the controller role on the device
    async fn acquire_controller(&self, timeout: Duration) -> Result<()>;

    /// Publish one command to the device
    async fn send_command(&self, name: &str, payload: &Value) -> Result<()>;

    /// Publish `name` and wait up to `timeout` for its `data_feedback` reply
    async fn request(&self, name: &str, payload: &Value, timeout: Duration) -> Result<Value>;
}

/// Transport that only logs; used for replay and offline runs
#[derive(Debug, Clone)]
pub struct DryRunTransport {
    id: String,
}

impl DryRunTransport {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn acquire_controller(&self, _timeout: Duration) -> Result<()> {
        info!("[dry-run] {} acquire controller", self.id);
        Ok(())
    }

    async fn send_command(&self, name: &str, payload: &Value) -> Result<()> {
        info!("[dry-run] {} command {} {}", self.id, name, payload);
        Ok(())
    }

    async fn request(&self, name: &str, payload: &Value, _timeout: Duration) -> Result<Value> {
        info!("[dry-run] {} request {} {}", self.id, name, payload);
        Ok(json!({}))
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::YarboError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Mock transport recording every call in order
    #[derive(Clone)]
    pub struct MockTransport {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub acquire_error: Arc<Mutex<Option<String>>>,
        pub send_error: Arc<Mutex<Option<String>>>,
        pub acquire_delay: Arc<Mutex<Duration>>,
        pub send_delay: Arc<Mutex<Duration>>,
        /// Replies by request name; unknown names never answer
        pub responses: Arc<Mutex<HashMap<String, Value>>>,
        /// Payload of every request, in order
        pub request_payloads: Arc<Mutex<Vec<Value>>>,
        /// Payload of every sent command, in order
        pub sent_payloads: Arc<Mutex<Vec<Value>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                acquire_error: Arc::new(Mutex::new(None)),
                send_error: Arc::new(Mutex::new(None)),
                acquire_delay: Arc::new(Mutex::new(Duration::ZERO)),
                send_delay: Arc::new(Mutex::new(Duration::ZERO)),
                responses: Arc::new(Mutex::new(HashMap::new())),
                request_payloads: Arc::new(Mutex::new(Vec::new())),
                sent_payloads: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn get_calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn set_acquire_error(&self, reason: Option<&str>) {
            *self.acquire_error.lock().unwrap() = reason.map(str::to_string);
        }

        pub fn set_send_error(&self, reason: Option<&str>) {
            *self.send_error.lock().unwrap() = reason.map(str::to_string);
        }

        pub fn set_acquire_delay(&self, delay: Duration) {
            *self.acquire_delay.lock().unwrap() = delay;
        }

        pub fn set_send_delay(&self, delay: Duration) {
            *self.send_delay.lock().unwrap() = delay;
        }

        pub fn set_response(&self, name: &str, reply: Value) {
            self.responses.lock().unwrap().insert(name.to_string(), reply);
        }

        pub fn get_request_payloads(&self) -> Vec<Value> {
            self.request_payloads.lock().unwrap().clone()
        }

        pub fn get_sent_payloads(&self) -> Vec<Value> {
            self.sent_payloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn id(&self) -> &str {
            "mock"
        }

        async fn acquire_controller(&self, _timeout: Duration) -> Result<()> {
            self.calls.lock().unwrap().push("acquire".to_string());
            let delay = *self.acquire_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let error = self.acquire_error.lock().unwrap().clone();
            match error {
                Some(reason) => Err(YarboError::ControllerAcquisition(reason)),
                None => Ok(()),
            }
        }

        async fn send_command(&self, name: &str, payload: &Value) -> Result<()> {
            self.calls.lock().unwrap().push(format!("send:{}", name));
            self.sent_payloads.lock().unwrap().push(payload.clone());
            let delay = *self.send_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let error = self.send_error.lock().unwrap().clone();
            match error {
                Some(reason) => Err(YarboError::Command {
                    command: name.to_string(),
                    reason,
                }),
                None => Ok(()),
            }
        }

        async fn request(&self, name: &str, payload: &Value, _timeout: Duration) -> Result<Value> {
            self.calls.lock().unwrap().push(format!("request:{}", name));
            self.request_payloads.lock().unwrap().push(payload.clone());
            if let Some(reason) = self.send_error.lock().unwrap().clone() {
                return Err(YarboError::Command {
                    command: name.to_string(),
                    reason,
                });
            }
            let reply = self.responses.lock().unwrap().get(name).cloned();
            match reply {
                Some(reply) => Ok(reply),
                None => std::future::pending().await,
            }
        }
    }
}
