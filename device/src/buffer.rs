use std::sync::Arc;

use crate::allocator::{Allocator, RawBuffer};
use crate::device::DeviceId;
use crate::error::Result;

/// Allocation shared by every clone of a [`DeviceBuffer`].
#[derive(Debug)]
struct BufferData {
    /// Taken on drop to hand the memory back to the allocator.
    raw: Option<RawBuffer>,
    allocator: Arc<dyn Allocator>,
    device: DeviceId,
    size: usize,
}

impl Drop for BufferData {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.allocator.free(raw);
        }
    }
}

/// Handle to memory allocated on one device.
///
/// Cloning is cheap and yields another handle to the same allocation; the
/// memory returns to its allocator when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    data: Arc<BufferData>,
}

impl DeviceBuffer {
    /// Allocate `size` bytes on `device`.
    pub fn allocate(allocator: Arc<dyn Allocator>, device: DeviceId, size: usize) -> Result<Self> {
        let raw = allocator.alloc(size)?;
        Ok(Self { data: Arc::new(BufferData { raw: Some(raw), allocator, device, size }) })
    }

    /// Size of the allocation in bytes.
    pub fn size(&self) -> usize {
        self.data.size
    }

    /// Device the memory lives on.
    pub fn device(&self) -> DeviceId {
        self.data.device
    }

    pub fn raw(&self) -> &RawBuffer {
        self.data.raw.as_ref().expect("raw buffer is only taken on drop")
    }

    /// Whether two handles refer to the same allocation.
    pub fn ptr_eq(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Number of live handles to this allocation.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}
