use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use naos_transport::Device;
use tracing::debug;

use crate::config::DeviceConfig;
use crate::managed::ManagedDevice;

/// Registry of managed devices keyed by device ID.
///
/// Construct one and pass it to whatever needs to look devices up.
#[derive(Debug, Default)]
pub struct Manager {
    config: DeviceConfig,
    devices: Mutex<BTreeMap<String, ManagedDevice>>,
}

impl Manager {
    /// Create a registry whose devices use `config`.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    fn devices(&self) -> MutexGuard<'_, BTreeMap<String, ManagedDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Manage a device. Returns the existing entry if the ID is known.
    pub fn add(&self, device: Arc<dyn Device>) -> ManagedDevice {
        let id = device.id();
        self.devices()
            .entry(id)
            .or_insert_with_key(|id| {
                debug!(device = %id, "device added");
                ManagedDevice::new(device, self.config.clone())
            })
            .clone()
    }

    /// Look up a device by ID.
    pub fn get(&self, id: &str) -> Option<ManagedDevice> {
        self.devices().get(id).cloned()
    }

    /// Stop managing a device, deactivating it.
    pub async fn remove(&self, id: &str) -> Option<ManagedDevice> {
        let device = self.devices().remove(id)?;
        device.deactivate().await;
        debug!(device = %id, "device removed");
        Some(device)
    }

    /// All managed devices ordered by ID.
    pub fn list(&self) -> Vec<ManagedDevice> {
        self.devices().values().cloned().collect()
    }

    /// Deactivate every managed device.
    pub async fn deactivate_all(&self) {
        for device in self.list() {
            device.deactivate().await;
        }
    }
}
