//! Device identity as seen by the coherence layer.
//!
//! A runtime enumerates its devices once; each gets a [`DeviceId`] equal to its
//! position in the enumeration order. The id is what coherence state, buffer
//! stores and the queue cache are keyed by.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, InvalidDeviceSnafu, Result};

/// Class of device, used when no explicit device is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    #[default]
    Gpu,
    Accelerator,
}

impl DeviceKind {
    /// Parse a kind name ("cpu", "gpu", "accelerator"), case-insensitive.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "accelerator" | "acc" => Ok(Self::Accelerator),
            _ => InvalidDeviceSnafu { device: s }.fail(),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Stable identity of an enumerated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

/// An enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
}

impl DeviceInfo {
    pub fn new(id: usize, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self { id: DeviceId(id), name: name.into(), kind }
    }

    /// Case-insensitive substring match against the device name.
    pub fn matches_name(&self, pattern: &str) -> bool {
        self.name.to_lowercase().contains(&pattern.to_lowercase())
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.id, self.name, self.kind)
    }
}
