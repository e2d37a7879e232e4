//! CUDA runtime binding.
//!
//! One context per GPU ordinal; the device queue is the context's default
//! stream, which is also the stream allocations are ordered on. Each copy
//! records a CUDA event that backs its timeline value.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cudarc::driver::{CudaContext, CudaEvent, CudaStream};
use parking_lot::Mutex;
use snafu::ResultExt;

use crate::allocator::{Allocator, CudaAllocator, LruAllocator, RawBuffer};
use crate::buffer::DeviceBuffer;
use crate::device::{DeviceId, DeviceInfo, DeviceKind};
use crate::error::{CudaSnafu, InvalidDeviceSnafu, Result, RuntimeSnafu, TransferFailedSnafu};
use crate::queue::{CommandQueue, DeviceContext, check_copy};
use crate::runtime::AcceleratorRuntime;
use crate::sync::{FailureLog, TimelineSignal, TransferDirection, TransferEvent};

/// Accelerator runtime over the CUDA driver API.
#[derive(Debug, Clone)]
pub struct CudaRuntime {
    devices: Vec<DeviceInfo>,
    contexts: Vec<Arc<CudaContext>>,
}

impl CudaRuntime {
    /// Open a context on every visible GPU.
    pub fn new() -> Result<Self> {
        let count = CudaContext::device_count().context(CudaSnafu)?;
        let mut devices = Vec::new();
        let mut contexts = Vec::new();
        for ordinal in 0..count.max(0) as usize {
            let context = CudaContext::new(ordinal).context(CudaSnafu)?;
            let name = context.name().context(CudaSnafu)?;
            devices.push(DeviceInfo::new(ordinal, name, DeviceKind::Gpu));
            contexts.push(context);
        }
        Ok(Self { devices, contexts })
    }
}

impl AcceleratorRuntime for CudaRuntime {
    fn name(&self) -> &str {
        "cuda"
    }

    fn enumerate_devices(&self, kind: Option<DeviceKind>) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.iter().filter(|d| kind.is_none_or(|k| d.kind == k)).cloned().collect())
    }

    fn create_context(&self, devices: &[DeviceInfo]) -> Result<Arc<dyn DeviceContext>> {
        let mut contexts = HashMap::new();
        for device in devices {
            let context = self
                .contexts
                .get(device.id.0)
                .ok_or_else(|| InvalidDeviceSnafu { device: device.to_string() }.build())?;
            contexts.insert(device.id, Arc::clone(context));
        }
        Ok(Arc::new(CudaDeviceContext { devices: devices.to_vec(), contexts }))
    }
}

#[derive(Debug)]
struct CudaDeviceContext {
    devices: Vec<DeviceInfo>,
    contexts: HashMap<DeviceId, Arc<CudaContext>>,
}

impl DeviceContext for CudaDeviceContext {
    fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    fn create_queue(&self, device: &DeviceInfo) -> Result<Arc<dyn CommandQueue>> {
        let context =
            self.contexts.get(&device.id).ok_or_else(|| InvalidDeviceSnafu { device: device.to_string() }.build())?;
        let stream = context.default_stream();
        let allocator: Arc<dyn Allocator> =
            Arc::new(LruAllocator::new(Box::new(CudaAllocator::new(Arc::clone(context)))));
        Ok(Arc::new(CudaQueue {
            device: device.clone(),
            signal: Arc::new(CudaSignal::new(device.id)),
            stream,
            allocator,
            issued: Mutex::new(0),
        }))
    }
}

/// Timeline signal whose values are backed by recorded CUDA events.
///
/// Waiting synchronizes on the event; timeouts are not supported.
struct CudaSignal {
    device: DeviceId,
    value: AtomicU64,
    events: Mutex<BTreeMap<u64, CudaEvent>>,
    failures: Mutex<FailureLog>,
}

impl CudaSignal {
    fn new(device: DeviceId) -> Self {
        Self {
            device,
            value: AtomicU64::new(0),
            events: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(FailureLog::default()),
        }
    }

    fn record(&self, value: u64, stream: &CudaStream) -> Result<()> {
        let event = stream.record_event(None).context(CudaSnafu)?;
        self.events.lock().insert(value, event);
        Ok(())
    }
}

impl fmt::Debug for CudaSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaSignal").field("device", &self.device).field("value", &self.value()).finish()
    }
}

impl TimelineSignal for CudaSignal {
    fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn set(&self, value: u64) {
        self.value.fetch_max(value, Ordering::Release);
        let mut events = self.events.lock();
        *events = events.split_off(&(value + 1));
    }

    fn fail(&self, value: u64, reason: String) {
        self.failures.lock().record(value, reason);
        self.set(value);
    }

    fn wait(&self, target: u64, _timeout_ms: u64) -> Result<()> {
        if self.value() < target {
            let synced = self.events.lock().get(&target).map(CudaEvent::synchronize);
            match synced {
                Some(Err(err)) => self.fail(target, err.to_string()),
                _ => self.set(target),
            }
        }
        match self.failures.lock().get(target) {
            Some(reason) => {
                TransferFailedSnafu { device: self.device.to_string(), value: target, reason }.fail()
            }
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct CudaQueue {
    device: DeviceInfo,
    signal: Arc<CudaSignal>,
    stream: Arc<CudaStream>,
    allocator: Arc<dyn Allocator>,
    issued: Mutex<u64>,
}

impl CudaQueue {
    fn event(&self, value: u64, direction: TransferDirection) -> TransferEvent {
        let signal: Arc<dyn TimelineSignal> = self.signal.clone();
        TransferEvent::new(signal, value, self.device.id, direction)
    }
}

impl CommandQueue for CudaQueue {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn allocate(&self, size: usize) -> Result<DeviceBuffer> {
        DeviceBuffer::allocate(Arc::clone(&self.allocator), self.device.id, size)
    }

    fn copy_in(&self, src: &[u8], dst: &DeviceBuffer) -> Result<TransferEvent> {
        check_copy(self, dst, src.len())?;
        let RawBuffer::Cuda { data } = dst.raw() else {
            return RuntimeSnafu { message: "destination is not CUDA memory" }.fail();
        };

        let mut issued = self.issued.lock();
        self.stream.memcpy_htod(src, &mut *data.lock()).context(CudaSnafu)?;
        let value = *issued + 1;
        self.signal.record(value, &self.stream)?;
        *issued = value;
        Ok(self.event(value, TransferDirection::HostToDevice))
    }

    fn copy_out(&self, src: &DeviceBuffer, dst: &mut [u8]) -> Result<TransferEvent> {
        check_copy(self, src, dst.len())?;
        let RawBuffer::Cuda { data } = src.raw() else {
            return RuntimeSnafu { message: "source is not CUDA memory" }.fail();
        };

        let mut issued = self.issued.lock();
        let value = *issued + 1;
        *issued = value;

        // The host slice must be fully written before returning.
        let copied = self.stream.memcpy_dtoh(&*data.lock(), dst).and_then(|_| self.stream.synchronize());
        match copied {
            Ok(()) => self.signal.set(value),
            Err(err) => self.signal.fail(value, err.to_string()),
        }
        Ok(self.event(value, TransferDirection::DeviceToHost))
    }

    fn finish(&self) -> Result<()> {
        self.stream.synchronize().context(CudaSnafu)?;
        let issued = *self.issued.lock();
        self.signal.set(issued);
        Ok(())
    }
}
