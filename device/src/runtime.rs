use std::sync::Arc;

use crate::device::{DeviceInfo, DeviceKind};
use crate::error::Result;
use crate::queue::DeviceContext;

/// Binding to an accelerator runtime (CUDA, OpenCL, a simulator, ...).
///
/// This is the only seam between the coherence layer and real hardware:
/// device discovery, context creation, and through the context the command
/// queues that move bytes.
pub trait AcceleratorRuntime: Send + Sync + std::fmt::Debug {
    /// Runtime name (for logging).
    fn name(&self) -> &str;

    /// Enumerate devices, optionally restricted to one kind.
    ///
    /// The order must be stable for the lifetime of the runtime; device ids
    /// are positions in the unfiltered enumeration.
    fn enumerate_devices(&self, kind: Option<DeviceKind>) -> Result<Vec<DeviceInfo>>;

    /// Create an execution context for `devices`.
    fn create_context(&self, devices: &[DeviceInfo]) -> Result<Arc<dyn DeviceContext>>;
}
