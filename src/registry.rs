//! Explicit per-device registry.
//!
//! Entries are added when a device is set up and removed (and shut down) on
//! teardown. Collaborators that need a device's coordinator or gateway are
//! handed the registry instead of reaching for global state.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::coordinator::Coordinator;
use crate::gateway::CommandGateway;

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Coordinator>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a coordinator under its device id.
    ///
    /// Returns the coordinator it replaced, which the caller must shut down.
    pub fn register(&self, coordinator: Coordinator) -> Option<Coordinator> {
        let id = coordinator.device_id().to_string();
        info!("Registering device {}", id);
        self.devices
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, coordinator)
    }

    pub fn get(&self, device_id: &str) -> Option<Coordinator> {
        self.devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .cloned()
    }

    pub fn gateway(&self, device_id: &str) -> Option<CommandGateway> {
        self.get(device_id).map(|c| c.gateway().clone())
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove without shutting down
    pub fn remove(&self, device_id: &str) -> Option<Coordinator> {
        self.devices
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(device_id)
    }

    /// Remove a device and shut its coordinator down.
    ///
    /// Returns `false` if the device was not registered.
    pub async fn teardown(&self, device_id: &str) -> bool {
        match self.remove(device_id) {
            Some(coordinator) => {
                coordinator.shutdown().await;
                info!("Device {} torn down", device_id);
                true
            }
            None => false,
        }
    }

    /// Tear down every registered device
    pub async fn teardown_all(&self) {
        for id in self.device_ids() {
            self.teardown(&id).await;
        }
    }
}
