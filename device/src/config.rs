//! Device selection configuration.
//!
//! Supports both explicit configuration with a bon builder and environment
//! variable fallbacks.

use std::fmt;

use bon::bon;

use crate::device::DeviceKind;

/// Which device a session should mirror to by default.
///
/// A name takes precedence over an id; with neither, the first device of
/// `kind` is picked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Case-insensitive substring of the device name.
    pub name: Option<String>,
    /// Position of the device in the runtime's enumeration order.
    pub id: Option<usize>,
    /// Device class used when neither name nor id is set.
    pub kind: DeviceKind,
}

#[bon]
impl DeviceConfig {
    /// Create a device configuration with builder pattern.
    #[builder]
    pub fn builder(name: Option<String>, id: Option<usize>, #[builder(default)] kind: DeviceKind) -> Self {
        Self { name, id, kind }
    }

    /// Read the configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `MIRROR_DEVICE` - numeric device id, or a device name substring
    /// * `MIRROR_DEVICE_KIND` - `cpu`, `gpu` (default) or `accelerator`
    pub fn from_env() -> Self {
        let device = std::env::var("MIRROR_DEVICE").ok();
        let kind = std::env::var("MIRROR_DEVICE_KIND").ok();
        Self::from_values(device.as_deref(), kind.as_deref())
    }

    /// Build a configuration from raw key values, as read from any
    /// key-value source.
    pub fn from_values(device: Option<&str>, kind: Option<&str>) -> Self {
        let mut config = Self::default();

        if let Some(device) = device.map(str::trim).filter(|d| !d.is_empty()) {
            match device.parse::<usize>() {
                Ok(id) => config.id = Some(id),
                Err(_) => config.name = Some(device.to_string()),
            }
        }

        if let Some(kind) = kind {
            match DeviceKind::parse(kind) {
                Ok(kind) => config.kind = kind,
                Err(err) => tracing::warn!(%err, "ignoring MIRROR_DEVICE_KIND"),
            }
        }

        config
    }

    /// Whether a specific device was requested.
    pub fn is_explicit(&self) -> bool {
        self.name.is_some() || self.id.is_some()
    }
}

impl fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.id) {
            (Some(name), _) => write!(f, "name '{name}'"),
            (None, Some(id)) => write!(f, "id {id}"),
            (None, None) => write!(f, "first {} device", self.kind),
        }
    }
}
