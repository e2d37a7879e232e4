use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::DeviceConfig;
use crate::device::{DeviceId, DeviceInfo};
use crate::error::{DeviceNotFoundSnafu, Result};
use crate::queue::CommandQueue;
use crate::runtime::AcceleratorRuntime;

/// Resolves configured devices and caches one command queue per device.
///
/// The registry is an ordinary value: create one per session (or share it
/// through an `Arc`) rather than relying on a process-wide instance.
///
/// # Thread Safety
///
/// Uses `parking_lot::RwLock` with double-checked locking, so concurrent
/// callers never create two queues for the same device.
#[derive(Debug)]
pub struct DeviceRegistry {
    runtime: Arc<dyn AcceleratorRuntime>,
    queues: RwLock<HashMap<DeviceId, Arc<dyn CommandQueue>>>,
}

impl DeviceRegistry {
    pub fn new(runtime: Arc<dyn AcceleratorRuntime>) -> Self {
        Self { runtime, queues: RwLock::new(HashMap::new()) }
    }

    pub fn runtime(&self) -> &Arc<dyn AcceleratorRuntime> {
        &self.runtime
    }

    /// All devices the runtime exposes, in enumeration order.
    pub fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.runtime.enumerate_devices(None)
    }

    /// Resolve a configuration to a device.
    ///
    /// Deterministic for a fixed configuration and runtime: the first device
    /// whose name contains `config.name`, else the device with id
    /// `config.id`, else the first device of `config.kind`.
    pub fn resolve(&self, config: &DeviceConfig) -> Result<DeviceInfo> {
        let found = match (&config.name, config.id) {
            (Some(name), _) => self.devices()?.into_iter().find(|d| d.matches_name(name)),
            (None, Some(id)) => self.devices()?.into_iter().find(|d| d.id == DeviceId(id)),
            (None, None) => self.runtime.enumerate_devices(Some(config.kind))?.into_iter().next(),
        };

        let device = found.ok_or_else(|| DeviceNotFoundSnafu { selector: config.to_string() }.build())?;
        tracing::debug!(runtime = self.runtime.name(), %device, "resolved device");
        Ok(device)
    }

    /// Get or create the command queue for `device`.
    pub fn queue(&self, device: &DeviceInfo) -> Result<Arc<dyn CommandQueue>> {
        // Fast path: read lock
        if let Some(queue) = self.queues.read().get(&device.id) {
            return Ok(Arc::clone(queue));
        }

        // Slow path: write lock to create
        let mut queues = self.queues.write();

        // Double-check after acquiring write lock
        if let Some(queue) = queues.get(&device.id) {
            return Ok(Arc::clone(queue));
        }

        let context = self.runtime.create_context(std::slice::from_ref(device))?;
        let queue = context.create_queue(device)?;
        tracing::debug!(runtime = self.runtime.name(), %device, "created command queue");

        queues.insert(device.id, Arc::clone(&queue));
        Ok(queue)
    }

    /// Number of devices with a cached queue.
    pub fn cached_queues(&self) -> usize {
        self.queues.read().len()
    }

    /// Block until all work issued on `device`'s queue has completed.
    ///
    /// A device without a cached queue has no work to wait for.
    pub fn synchronize(&self, device: DeviceId) -> Result<()> {
        let queue = self.queues.read().get(&device).map(Arc::clone);
        match queue {
            Some(queue) => queue.finish(),
            None => Ok(()),
        }
    }
}
