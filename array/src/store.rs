use std::collections::HashMap;

use mirror_device::{DeviceBuffer, DeviceId};

/// Device-side buffers of one storage, keyed by device.
///
/// A missing entry means nothing was ever allocated on that device (or the
/// buffer was released).
#[derive(Debug, Default)]
pub struct BufferStore {
    buffers: HashMap<DeviceId, DeviceBuffer>,
}

impl BufferStore {
    pub fn get(&self, device: DeviceId) -> Option<&DeviceBuffer> {
        self.buffers.get(&device)
    }

    /// Store `buffer` for `device`, returning the handle it replaces.
    pub fn insert(&mut self, device: DeviceId, buffer: DeviceBuffer) -> Option<DeviceBuffer> {
        self.buffers.insert(device, buffer)
    }

    pub fn remove(&mut self, device: DeviceId) -> Option<DeviceBuffer> {
        self.buffers.remove(&device)
    }

    pub fn contains(&self, device: DeviceId) -> bool {
        self.buffers.contains_key(&device)
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.buffers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
