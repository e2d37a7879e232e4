//! Command queue abstraction for host/device copies.
//!
//! A queue belongs to exactly one device and executes the operations
//! submitted to it in issue order. Copies return a [`TransferEvent`]; the
//! caller decides whether to wait on it immediately or later.
//!
//! # Host memory contract
//!
//! `copy_in` must be finished reading `src` when it returns (implementations
//! stage the bytes if the device copy runs later), and `copy_out` must have
//! written `dst` when it returns. Only the device side of a copy may still be
//! in flight after the call, which keeps host storage free of outstanding
//! borrows.

use std::sync::Arc;

use crate::buffer::DeviceBuffer;
use crate::device::DeviceInfo;
use crate::error::{ForeignBufferSnafu, Result, SizeMismatchSnafu};
use crate::sync::TransferEvent;

/// Hardware command queue for submitting copies to a device.
pub trait CommandQueue: Send + Sync + std::fmt::Debug {
    /// Get the device this queue belongs to.
    fn device(&self) -> &DeviceInfo;

    /// Allocate `size` bytes of device memory.
    fn allocate(&self, size: usize) -> Result<DeviceBuffer>;

    /// Enqueue a host→device copy of `src` into `dst`.
    fn copy_in(&self, src: &[u8], dst: &DeviceBuffer) -> Result<TransferEvent>;

    /// Enqueue a device→host copy of `src` into `dst`.
    fn copy_out(&self, src: &DeviceBuffer, dst: &mut [u8]) -> Result<TransferEvent>;

    /// Block until every operation issued so far has completed.
    fn finish(&self) -> Result<()>;
}

/// Execution context spanning one or more devices.
pub trait DeviceContext: Send + Sync + std::fmt::Debug {
    /// Devices this context was created for.
    fn devices(&self) -> &[DeviceInfo];

    /// Create a command queue on `device`, which must belong to this context.
    fn create_queue(&self, device: &DeviceInfo) -> Result<Arc<dyn CommandQueue>>;
}

/// Validate that `buffer` can take part in a copy of `len` bytes on `queue`.
pub fn check_copy(queue: &dyn CommandQueue, buffer: &DeviceBuffer, len: usize) -> Result<()> {
    let device = queue.device();
    snafu::ensure!(
        buffer.device() == device.id,
        ForeignBufferSnafu { buffer_device: buffer.device().to_string(), queue_device: device.id.to_string() }
    );
    snafu::ensure!(buffer.size() == len, SizeMismatchSnafu { expected: buffer.size(), actual: len });
    Ok(())
}
