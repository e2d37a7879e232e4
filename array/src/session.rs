use std::sync::Arc;

use mirror_device::{AcceleratorRuntime, DeviceConfig, DeviceId, DeviceInfo, DeviceRegistry, Error as DeviceError};
use snafu::ResultExt;

use crate::error::{DeviceSnafu, Result};
use crate::identity::IdentityCache;
use crate::transfer::TransferEngine;

/// Scope of a set of mirrored arrays.
///
/// Owns the identity cache and the default device, and shares the device
/// registry (and therefore the per-device queues) with any other session
/// built on the same registry. Arrays keep their session alive through an
/// `Rc`, so a session and its arrays are confined to one thread.
#[derive(Debug)]
pub struct Session {
    registry: Arc<DeviceRegistry>,
    identity: IdentityCache,
    config: DeviceConfig,
    default_device: Option<DeviceInfo>,
}

impl Session {
    /// Create a session with its own registry over `runtime`.
    pub fn new(runtime: Arc<dyn AcceleratorRuntime>, config: DeviceConfig) -> Result<Self> {
        Self::with_registry(Arc::new(DeviceRegistry::new(runtime)), config)
    }

    /// Create a session configured from `MIRROR_DEVICE` / `MIRROR_DEVICE_KIND`.
    pub fn from_env(runtime: Arc<dyn AcceleratorRuntime>) -> Result<Self> {
        Self::new(runtime, DeviceConfig::from_env())
    }

    /// Create a session sharing an existing registry.
    ///
    /// If `config` matches no device the session runs in no-device mode:
    /// transfers to the default device report
    /// [`TransferOutcome::NoDevice`](crate::TransferOutcome::NoDevice).
    /// Any other runtime failure is returned.
    pub fn with_registry(registry: Arc<DeviceRegistry>, config: DeviceConfig) -> Result<Self> {
        let default_device = match registry.resolve(&config) {
            Ok(device) => Some(device),
            Err(err @ DeviceError::DeviceNotFound { .. }) => {
                tracing::warn!(error = %err, "no matching device, mirroring disabled");
                None
            }
            Err(source) => return Err(source).context(DeviceSnafu),
        };
        Ok(Self { registry, identity: IdentityCache::new(), config, default_device })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn identity(&self) -> &IdentityCache {
        &self.identity
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Device used when a transfer names none.
    pub fn default_device(&self) -> Option<&DeviceInfo> {
        self.default_device.as_ref()
    }

    /// Whether a default device was resolved.
    pub fn has_device(&self) -> bool {
        self.default_device.is_some()
    }

    /// Look up an enumerated device by id.
    pub fn device(&self, id: DeviceId) -> Result<DeviceInfo> {
        let devices = self.registry.devices().context(DeviceSnafu)?;
        devices
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| DeviceError::DeviceNotFound { selector: format!("id {}", id.0) })
            .context(DeviceSnafu)
    }

    /// `device`, or the default device.
    pub(crate) fn target(&self, device: Option<&DeviceInfo>) -> Option<DeviceInfo> {
        device.or(self.default_device.as_ref()).cloned()
    }

    pub(crate) fn engine(&self) -> TransferEngine<'_> {
        TransferEngine::new(&self.registry)
    }
}
