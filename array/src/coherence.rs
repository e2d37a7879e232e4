//! Per-storage coherence bookkeeping.
//!
//! Every location (the host, or one device) carries two bits:
//!
//! - **dirty**: the location's copy may be stale. Defaults to `true`.
//! - **copied**: a copy was materialized there at least once. Defaults to
//!   `false`.
//!
//! Per location the state moves Dirty-Uncopied → Copied-Clean →
//! Dirty-Copied → Copied-Clean. A write on one side always invalidates the
//! other: a host mutation marks every device dirty (as well as the host
//! entry), and a device-side write marks the host and every other device
//! dirty.
//!
//! The host entry is slightly different from device entries: `dirty[Host]`
//! means the host has diverged from the device mirrors since the last pull.
//! It starts `true`, is set by every host mutation, and is only cleared by a
//! pull. A pull rewrites the host, so it marks every device except the
//! source dirty.
//!
//! The state is plain data. It is shared between array views through
//! `Rc<RefCell<_>>` and must not be touched from more than one thread.

use std::collections::HashMap;
use std::fmt;

use mirror_device::{DeviceBuffer, DeviceId, TransferEvent};
use snafu::{OptionExt, ResultExt};

use crate::error::{MissingBufferSnafu, Result, TransferSnafu};
use crate::store::BufferStore;

/// Where a copy of the data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Host,
    Device(DeviceId),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Host => write!(f, "host"),
            Location::Device(id) => write!(f, "{id}"),
        }
    }
}

/// A transfer issued with `wait = false`.
///
/// `location` is the destination whose bits were cleared at issue time; it
/// is re-marked dirty if the transfer turns out to have failed.
#[derive(Debug)]
pub struct PendingTransfer {
    pub event: TransferEvent,
    pub location: Location,
}

#[derive(Debug)]
pub struct CoherenceState {
    dirty: HashMap<Location, bool>,
    copied: HashMap<Location, bool>,
    buffers: BufferStore,
    pending: Vec<PendingTransfer>,
}

impl Default for CoherenceState {
    fn default() -> Self {
        Self::new()
    }
}

impl CoherenceState {
    /// Fresh state: the host holds the data, no device holds anything.
    pub fn new() -> Self {
        Self {
            dirty: HashMap::from([(Location::Host, true)]),
            copied: HashMap::from([(Location::Host, true)]),
            buffers: BufferStore::default(),
            pending: Vec::new(),
        }
    }

    pub fn is_dirty(&self, location: Location) -> bool {
        self.dirty.get(&location).copied().unwrap_or(true)
    }

    pub fn is_copied(&self, location: Location) -> bool {
        self.copied.get(&location).copied().unwrap_or(false)
    }

    /// Whether `device` lacks a current copy. `force` always says yes.
    pub fn needs_push(&self, device: DeviceId, force: bool) -> bool {
        let location = Location::Device(device);
        force || !self.is_copied(location) || self.is_dirty(location)
    }

    /// Whether the host must be refreshed from a device. `force` always says yes.
    pub fn needs_pull(&self, force: bool) -> bool {
        force || self.is_dirty(Location::Host)
    }

    /// Record a host write.
    ///
    /// Every mutating entry point of an array funnels into this call.
    pub fn mark_host_mutated(&mut self) {
        for (location, dirty) in self.dirty.iter_mut() {
            if matches!(location, Location::Device(_)) {
                *dirty = true;
            }
        }
        self.dirty.insert(Location::Host, true);
    }

    /// Record a write made directly to `device`'s buffer, outside of this
    /// protocol (for example by a kernel).
    pub fn mark_device_mutated(&mut self, device: DeviceId) -> Result<()> {
        snafu::ensure!(self.buffers.contains(device), MissingBufferSnafu { device });
        for dirty in self.dirty.values_mut() {
            *dirty = true;
        }
        self.dirty.insert(Location::Device(device), false);
        self.copied.insert(Location::Device(device), true);
        Ok(())
    }

    /// Record a completed (or issued, when deferred) host→device copy.
    pub fn mark_pushed(&mut self, device: DeviceId) {
        self.dirty.insert(Location::Device(device), false);
        self.copied.insert(Location::Device(device), true);
    }

    /// Record a completed (or issued, when deferred) device→host copy from
    /// `source`.
    ///
    /// The host now matches `source`, so `source` is current as well. Every
    /// other device holds content from before the pull and goes stale.
    pub fn mark_pulled(&mut self, source: DeviceId) {
        for (location, dirty) in self.dirty.iter_mut() {
            if matches!(location, Location::Device(d) if *d != source) {
                *dirty = true;
            }
        }
        self.dirty.insert(Location::Host, false);
        self.dirty.insert(Location::Device(source), false);
    }

    /// Forget that `location` is current.
    ///
    /// A device whose copy failed holds unknown content, so it also stops
    /// counting as copied until the next successful push.
    pub fn invalidate(&mut self, location: Location) {
        self.dirty.insert(location, true);
        if let Location::Device(_) = location {
            self.copied.insert(location, false);
        }
    }

    /// Drop the buffer of `device`, returning it to the device allocator once
    /// in-flight copies release it. Returns whether a buffer existed.
    pub fn release_device(&mut self, device: DeviceId) -> bool {
        let location = Location::Device(device);
        self.copied.insert(location, false);
        self.dirty.insert(location, true);
        self.buffers.remove(device).is_some()
    }

    pub fn buffers(&self) -> &BufferStore {
        &self.buffers
    }

    pub fn buffer(&self, device: DeviceId) -> Option<&DeviceBuffer> {
        self.buffers.get(device)
    }

    /// Buffer of `device` holding a materialized copy, or
    /// [`crate::Error::MissingBuffer`].
    ///
    /// A buffer that was allocated but never successfully written does not
    /// count.
    pub fn require_copy(&self, device: DeviceId) -> Result<&DeviceBuffer> {
        snafu::ensure!(self.is_copied(Location::Device(device)), MissingBufferSnafu { device });
        self.buffers.get(device).context(MissingBufferSnafu { device })
    }

    pub(crate) fn set_buffer(&mut self, device: DeviceId, buffer: DeviceBuffer) {
        self.buffers.insert(device, buffer);
    }

    pub(crate) fn defer(&mut self, transfer: PendingTransfer) {
        self.pending.push(transfer);
    }

    /// Number of transfers issued without waiting and not yet waited on.
    pub fn pending_transfers(&self) -> usize {
        self.pending.len()
    }

    /// Block until every deferred transfer completes, then clear the list.
    ///
    /// Every handle is waited on even if an earlier one failed; each failed
    /// transfer re-marks its destination dirty. Returns the first failure.
    pub fn wait_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for transfer in std::mem::take(&mut self.pending) {
            let location = transfer.location;
            if let Err(err) = transfer.event.wait().context(TransferSnafu { location }) {
                tracing::warn!(%location, error = %err, "deferred transfer failed, location marked dirty");
                self.invalidate(location);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
