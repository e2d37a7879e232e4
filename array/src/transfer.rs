//! Coherence-checked host/device copies.
//!
//! The engine decides whether a copy is needed, issues it on the device's
//! cached queue, and updates the coherence bits. Blocking transfers only
//! clear bits after the copy is known to have succeeded; deferred transfers
//! clear them at issue time and are rolled back by
//! [`CoherenceState::wait_all`] if they fail.

use mirror_device::{CommandQueue, DeviceBuffer, DeviceInfo, DeviceRegistry, TransferEvent};
use snafu::ResultExt;

use crate::coherence::{CoherenceState, Location, PendingTransfer};
use crate::error::{DeviceSnafu, Result, TransferSnafu};

/// How a transfer is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Block until the copy completes. Otherwise the handle is kept until
    /// `wait_all`.
    pub wait: bool,
    /// Copy even if the destination is already current.
    pub force: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self { wait: true, force: false }
    }
}

impl TransferOptions {
    /// Non-blocking transfer.
    pub const fn deferred() -> Self {
        Self { wait: false, force: false }
    }

    /// Blocking transfer that bypasses the coherence check.
    pub const fn forced() -> Self {
        Self { wait: true, force: true }
    }

    pub const fn with_wait(self, wait: bool) -> Self {
        Self { wait, ..self }
    }

    pub const fn with_force(self, force: bool) -> Self {
        Self { force, ..self }
    }
}

/// What a transfer request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The destination was already current; nothing was copied.
    Skipped,
    /// The copy was issued and has completed.
    Completed,
    /// The copy was issued; completion is tracked as a pending transfer.
    Deferred,
    /// No device is available; nothing was copied.
    NoDevice,
}

impl TransferOutcome {
    /// Whether a copy was issued.
    pub fn transferred(&self) -> bool {
        matches!(self, Self::Completed | Self::Deferred)
    }
}

/// Issues copies for one storage's coherence state.
#[derive(Debug, Clone, Copy)]
pub struct TransferEngine<'a> {
    registry: &'a DeviceRegistry,
}

impl<'a> TransferEngine<'a> {
    pub fn new(registry: &'a DeviceRegistry) -> Self {
        Self { registry }
    }

    /// Make `device` hold the contents of `host`.
    pub fn push(
        &self,
        state: &mut CoherenceState,
        device: &DeviceInfo,
        host: &[u8],
        options: TransferOptions,
    ) -> Result<TransferOutcome> {
        let location = Location::Device(device.id);
        if !state.needs_push(device.id, options.force) {
            tracing::trace!(%location, "device copy is current, push skipped");
            return Ok(TransferOutcome::Skipped);
        }

        let queue = self.registry.queue(device).context(DeviceSnafu)?;
        let (buffer, event) = upload(&*queue, host, state.buffer(device.id)).context(TransferSnafu { location })?;
        state.set_buffer(device.id, buffer);
        tracing::debug!(%location, bytes = host.len(), wait = options.wait, force = options.force, "host->device");

        self.settle(state, event, location, options.wait, |state| state.mark_pushed(device.id))
    }

    /// Overwrite `host` in place with the contents of `device`.
    pub fn pull(
        &self,
        state: &mut CoherenceState,
        device: &DeviceInfo,
        host: &mut [u8],
        options: TransferOptions,
    ) -> Result<TransferOutcome> {
        if !state.needs_pull(options.force) {
            tracing::trace!(device = %device.id, "host copy is current, pull skipped");
            return Ok(TransferOutcome::Skipped);
        }

        let buffer = state.require_copy(device.id)?.clone();
        let queue = self.registry.queue(device).context(DeviceSnafu)?;
        let event = download(&*queue, &buffer, host).context(TransferSnafu { location: Location::Host })?;
        tracing::debug!(device = %device.id, bytes = host.len(), wait = options.wait, force = options.force, "device->host");

        self.settle(state, event, Location::Host, options.wait, |state| state.mark_pulled(device.id))
    }

    /// Apply `mark` once the copy is known to be issued (deferred) or done (blocking).
    fn settle(
        &self,
        state: &mut CoherenceState,
        event: TransferEvent,
        location: Location,
        wait: bool,
        mark: impl FnOnce(&mut CoherenceState),
    ) -> Result<TransferOutcome> {
        if !wait {
            mark(state);
            state.defer(PendingTransfer { event, location });
            return Ok(TransferOutcome::Deferred);
        }

        match event.wait().context(TransferSnafu { location }) {
            Ok(()) => {
                mark(state);
                Ok(TransferOutcome::Completed)
            }
            Err(err) => {
                // The destination content is now unknown.
                state.invalidate(location);
                Err(err)
            }
        }
    }
}

/// Copy `host` to the device, reusing `existing` when its size still fits.
pub fn upload(
    queue: &dyn CommandQueue,
    host: &[u8],
    existing: Option<&DeviceBuffer>,
) -> mirror_device::Result<(DeviceBuffer, TransferEvent)> {
    let buffer = match existing {
        Some(buffer) if buffer.size() == host.len() => buffer.clone(),
        _ => queue.allocate(host.len())?,
    };
    let event = queue.copy_in(host, &buffer)?;
    Ok((buffer, event))
}

/// Copy `buffer` into the existing host memory `host`.
pub fn download(
    queue: &dyn CommandQueue,
    buffer: &DeviceBuffer,
    host: &mut [u8],
) -> mirror_device::Result<TransferEvent> {
    queue.copy_out(buffer, host)
}
