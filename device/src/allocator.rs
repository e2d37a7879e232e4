use std::collections::HashMap;
#[cfg(feature = "cuda")]
use std::sync::Arc;

#[cfg(feature = "cuda")]
use cudarc::driver::{CudaContext, CudaSlice};
use parking_lot::Mutex;
#[cfg(feature = "cuda")]
use snafu::ResultExt;

use crate::error::Result;
#[cfg(feature = "cuda")]
use crate::error::CudaSnafu;

/// Opaque handle to device memory.
///
/// Device memory is written from queue worker threads, so the payload sits
/// behind a mutex rather than a `RefCell`.
#[derive(Debug)]
pub enum RawBuffer {
    /// Device memory simulated by a host allocation.
    Host { data: Mutex<Box<[u8]>> },
    #[cfg(feature = "cuda")]
    Cuda { data: Mutex<CudaSlice<u8>> },
}

impl RawBuffer {
    /// Get the size of the buffer in bytes.
    pub fn size(&self) -> usize {
        match self {
            RawBuffer::Host { data } => data.lock().len(),
            #[cfg(feature = "cuda")]
            RawBuffer::Cuda { data, .. } => data.lock().len(),
        }
    }

    /// Host-addressable memory, if this buffer lives in host memory.
    pub fn as_host(&self) -> Option<&Mutex<Box<[u8]>>> {
        match self {
            RawBuffer::Host { data } => Some(data),
            #[cfg(feature = "cuda")]
            RawBuffer::Cuda { .. } => None,
        }
    }
}

/// Source of device memory.
///
/// Fresh buffers are zeroed; recycled ones keep their old content. Nothing
/// reads a buffer before a copy has written it.
pub trait Allocator: Send + Sync + std::fmt::Debug {
    fn alloc(&self, size: usize) -> Result<RawBuffer>;
    fn free(&self, _buffer: RawBuffer) {}
    fn name(&self) -> &str;
}

/// Allocator handing out host memory that stands in for device memory.
#[derive(Debug, Clone)]
pub struct HostAllocator;

impl Allocator for HostAllocator {
    fn alloc(&self, size: usize) -> Result<RawBuffer> {
        let data = vec![0u8; size].into_boxed_slice();
        Ok(RawBuffer::Host { data: Mutex::new(data) })
    }

    fn name(&self) -> &str {
        "HOST"
    }
}

/// CUDA allocator using GPU memory.
#[cfg(feature = "cuda")]
#[derive(Debug, Clone)]
pub struct CudaAllocator {
    context: Arc<CudaContext>,
}

#[cfg(feature = "cuda")]
impl CudaAllocator {
    pub fn new(context: Arc<CudaContext>) -> Self {
        Self { context }
    }
}

#[cfg(feature = "cuda")]
impl Allocator for CudaAllocator {
    fn alloc(&self, size: usize) -> Result<RawBuffer> {
        let data = self.context.default_stream().alloc_zeros::<u8>(size).context(CudaSnafu)?;
        Ok(RawBuffer::Cuda { data: Mutex::new(data) })
    }

    fn name(&self) -> &str {
        "CUDA"
    }
}

/// LRU allocator that caches freed buffers for reuse.
///
/// Device buffers are released when the last array view of a storage goes
/// away; recycling them keeps repeated mirror/drop cycles from hitting the
/// device allocator every time.
#[derive(Debug)]
pub struct LruAllocator {
    inner: Box<dyn Allocator>,
    cache: Mutex<HashMap<usize, Vec<RawBuffer>>>,
    max_buffers_per_size: usize,
    name: String,
}

impl LruAllocator {
    pub fn new(inner: Box<dyn Allocator>) -> Self {
        Self::with_capacity(inner, 32)
    }

    pub fn with_capacity(inner: Box<dyn Allocator>, max_buffers_per_size: usize) -> Self {
        let name = inner.name().to_string();
        Self { inner, cache: Mutex::new(HashMap::new()), max_buffers_per_size, name }
    }

    /// Number of cached buffers of exactly `size` bytes.
    pub fn cache_count(&self, size: usize) -> usize {
        self.cache.lock().get(&size).map_or(0, Vec::len)
    }
}

impl Allocator for LruAllocator {
    fn alloc(&self, size: usize) -> Result<RawBuffer> {
        // Try cache first
        let cached = {
            let mut cache = self.cache.lock();
            let buffer = cache.get_mut(&size).and_then(Vec::pop);
            if cache.get(&size).is_some_and(Vec::is_empty) {
                cache.remove(&size);
            }
            buffer
        };

        if let Some(buffer) = cached {
            return Ok(buffer);
        }

        // Cache miss - allocate from inner
        match self.inner.alloc(size) {
            Ok(buffer) => Ok(buffer),
            Err(e) => {
                // On allocation failure, clear cache and retry
                self.cache.lock().clear();
                self.inner.alloc(size).map_err(|_| e)
            }
        }
    }

    fn free(&self, buffer: RawBuffer) {
        let mut cache = self.cache.lock();
        let buffers = cache.entry(buffer.size()).or_default();
        if buffers.len() < self.max_buffers_per_size {
            buffers.push(buffer);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
