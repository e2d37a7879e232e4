//! Accelerator plumbing for host/device mirroring.
//!
//! This crate owns everything that touches a device:
//! - [`AcceleratorRuntime`]: the binding to a concrete runtime (device
//!   enumeration, contexts, command queues)
//! - [`DeviceBuffer`]: handles to device memory, recycled through an
//!   [`Allocator`]
//! - [`TransferEvent`]: completion handles of asynchronous copies
//! - [`DeviceRegistry`]: device resolution and the per-device queue cache
//!
//! [`CpuRuntime`] simulates devices in host memory and is always available;
//! the `cuda` feature adds [`CudaRuntime`].

pub mod allocator;
pub mod buffer;
pub mod config;
pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod device;
pub mod error;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod sync;

pub use allocator::{Allocator, HostAllocator, LruAllocator, RawBuffer};
pub use buffer::DeviceBuffer;
pub use config::DeviceConfig;
pub use cpu::{CpuRuntime, RuntimeStats};
#[cfg(feature = "cuda")]
pub use cuda::CudaRuntime;
pub use device::{DeviceId, DeviceInfo, DeviceKind};
pub use error::{Error, Result};
pub use queue::{CommandQueue, DeviceContext};
pub use registry::DeviceRegistry;
pub use runtime::AcceleratorRuntime;
pub use sync::{TimelineSignal, TransferDirection, TransferEvent};
