//! Host-simulated accelerator runtime.
//!
//! "Device" memory is ordinary host memory handed out by an [`LruAllocator`],
//! and each device queue runs its host→device copies on a dedicated worker
//! thread in issue order, so deferred transfers really are deferred. The
//! runtime counts every allocation and copy it performs, and can be told to
//! fail upcoming transfers, which makes it the reference backend for testing
//! the coherence protocol.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::allocator::{Allocator, HostAllocator, LruAllocator};
use crate::buffer::DeviceBuffer;
use crate::device::{DeviceInfo, DeviceKind};
use crate::error::{InvalidDeviceSnafu, Result, RuntimeSnafu};
use crate::queue::{CommandQueue, DeviceContext, check_copy};
use crate::runtime::AcceleratorRuntime;
use crate::sync::{CpuTimelineSignal, TimelineSignal, TransferDirection, TransferEvent};

/// Counters of the work a [`CpuRuntime`] performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub contexts: usize,
    pub queues: usize,
    pub allocations: usize,
    pub copies_in: usize,
    pub copies_out: usize,
}

#[derive(Debug, Default)]
struct Counters {
    contexts: AtomicUsize,
    queues: AtomicUsize,
    allocations: AtomicUsize,
    copies_in: AtomicUsize,
    copies_out: AtomicUsize,
}

/// State shared by the runtime and every context and queue it created.
#[derive(Debug)]
struct Shared {
    counters: Counters,
    /// Number of upcoming transfers that will fail.
    pending_failures: AtomicUsize,
    allocator: Arc<LruAllocator>,
}

impl Shared {
    fn take_failure(&self) -> bool {
        self.pending_failures.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)).is_ok()
    }
}

/// Accelerator runtime whose devices are simulated in host memory.
#[derive(Debug, Clone)]
pub struct CpuRuntime {
    devices: Vec<DeviceInfo>,
    shared: Arc<Shared>,
}

impl Default for CpuRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuRuntime {
    /// Runtime with two simulated GPUs followed by one CPU device.
    pub fn new() -> Self {
        Self::with_devices([
            ("Simulated GPU 0", DeviceKind::Gpu),
            ("Simulated GPU 1", DeviceKind::Gpu),
            ("Host CPU", DeviceKind::Cpu),
        ])
    }

    /// Runtime with the given `(name, kind)` devices, in enumeration order.
    pub fn with_devices<N: Into<String>>(devices: impl IntoIterator<Item = (N, DeviceKind)>) -> Self {
        let devices =
            devices.into_iter().enumerate().map(|(id, (name, kind))| DeviceInfo::new(id, name, kind)).collect();
        let shared = Shared {
            counters: Counters::default(),
            pending_failures: AtomicUsize::new(0),
            allocator: Arc::new(LruAllocator::new(Box::new(HostAllocator))),
        };
        Self { devices, shared: Arc::new(shared) }
    }

    /// Snapshot of the work performed so far.
    pub fn stats(&self) -> RuntimeStats {
        let c = &self.shared.counters;
        RuntimeStats {
            contexts: c.contexts.load(Ordering::Acquire),
            queues: c.queues.load(Ordering::Acquire),
            allocations: c.allocations.load(Ordering::Acquire),
            copies_in: c.copies_in.load(Ordering::Acquire),
            copies_out: c.copies_out.load(Ordering::Acquire),
        }
    }

    /// Make the next `count` transfers (in either direction) fail.
    pub fn fail_next_transfers(&self, count: usize) {
        self.shared.pending_failures.store(count, Ordering::Release);
    }

    /// Allocator backing every simulated device.
    pub fn allocator(&self) -> &Arc<LruAllocator> {
        &self.shared.allocator
    }
}

impl AcceleratorRuntime for CpuRuntime {
    fn name(&self) -> &str {
        "host-simulated"
    }

    fn enumerate_devices(&self, kind: Option<DeviceKind>) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.iter().filter(|d| kind.is_none_or(|k| d.kind == k)).cloned().collect())
    }

    fn create_context(&self, devices: &[DeviceInfo]) -> Result<Arc<dyn DeviceContext>> {
        for device in devices {
            snafu::ensure!(self.devices.contains(device), InvalidDeviceSnafu { device: device.to_string() });
        }
        self.shared.counters.contexts.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(CpuContext { devices: devices.to_vec(), shared: Arc::clone(&self.shared) }))
    }
}

#[derive(Debug)]
struct CpuContext {
    devices: Vec<DeviceInfo>,
    shared: Arc<Shared>,
}

impl DeviceContext for CpuContext {
    fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    fn create_queue(&self, device: &DeviceInfo) -> Result<Arc<dyn CommandQueue>> {
        snafu::ensure!(self.devices.contains(device), InvalidDeviceSnafu { device: device.to_string() });
        let queue = CpuQueue::new(device.clone(), Arc::clone(&self.shared))?;
        self.shared.counters.queues.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(queue))
    }
}

/// A staged host→device copy waiting for the worker.
struct CopyJob {
    value: u64,
    staging: Vec<u8>,
    dst: DeviceBuffer,
    fail: bool,
}

#[derive(Debug)]
struct Submitter {
    /// Last timeline value handed out.
    issued: u64,
    sender: Option<Sender<CopyJob>>,
}

/// FIFO queue executing copies on a worker thread.
#[derive(Debug)]
pub struct CpuQueue {
    device: DeviceInfo,
    shared: Arc<Shared>,
    signal: Arc<CpuTimelineSignal>,
    /// Serializes value assignment with submission so the timeline stays ordered.
    submit: Mutex<Submitter>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CpuQueue {
    fn new(device: DeviceInfo, shared: Arc<Shared>) -> Result<Self> {
        let signal = Arc::new(CpuTimelineSignal::new(device.id));
        let (sender, receiver) = mpsc::channel();

        let worker_signal = Arc::clone(&signal);
        let worker = std::thread::Builder::new()
            .name(format!("mirror-copy-{}", device.id.0))
            .spawn(move || run_worker(receiver, worker_signal))
            .map_err(|err| RuntimeSnafu { message: format!("failed to spawn copy worker: {err}") }.build())?;

        Ok(Self {
            device,
            shared,
            signal,
            submit: Mutex::new(Submitter { issued: 0, sender: Some(sender) }),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn event(&self, value: u64, direction: TransferDirection) -> TransferEvent {
        let signal: Arc<dyn TimelineSignal> = self.signal.clone();
        TransferEvent::new(signal, value, self.device.id, direction)
    }
}

fn run_worker(receiver: Receiver<CopyJob>, signal: Arc<CpuTimelineSignal>) {
    for CopyJob { value, staging, dst, fail } in receiver {
        let result = if fail {
            Err("injected transfer failure")
        } else {
            match dst.raw().as_host() {
                Some(data) => {
                    data.lock().copy_from_slice(&staging);
                    Ok(())
                }
                None => Err("destination is not host-simulated memory"),
            }
        };

        // Waiters must not observe the job still holding the buffer.
        drop(dst);
        match result {
            Ok(()) => signal.set(value),
            Err(reason) => signal.fail(value, reason.to_string()),
        }
    }
}

impl CommandQueue for CpuQueue {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn allocate(&self, size: usize) -> Result<DeviceBuffer> {
        let allocator: Arc<dyn Allocator> = self.shared.allocator.clone();
        let buffer = DeviceBuffer::allocate(allocator, self.device.id, size)?;
        self.shared.counters.allocations.fetch_add(1, Ordering::AcqRel);
        Ok(buffer)
    }

    fn copy_in(&self, src: &[u8], dst: &DeviceBuffer) -> Result<TransferEvent> {
        check_copy(self, dst, src.len())?;

        let mut submit = self.submit.lock();
        let sender = submit.sender.as_ref().ok_or_else(|| RuntimeSnafu { message: "queue is shut down" }.build())?;
        let value = submit.issued + 1;
        let job = CopyJob { value, staging: src.to_vec(), dst: dst.clone(), fail: self.shared.take_failure() };
        sender.send(job).map_err(|_| RuntimeSnafu { message: "copy worker exited" }.build())?;
        submit.issued = value;

        self.shared.counters.copies_in.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(device = %self.device.id, value, bytes = src.len(), "copy_in enqueued");
        Ok(self.event(value, TransferDirection::HostToDevice))
    }

    fn copy_out(&self, src: &DeviceBuffer, dst: &mut [u8]) -> Result<TransferEvent> {
        check_copy(self, src, dst.len())?;

        let mut submit = self.submit.lock();
        let value = submit.issued + 1;
        submit.issued = value;

        // Reads must observe every earlier copy_in on this queue.
        self.signal.wait_reached(value - 1);

        if self.shared.take_failure() {
            self.signal.fail(value, "injected transfer failure".to_string());
        } else {
            match src.raw().as_host() {
                Some(data) => {
                    dst.copy_from_slice(&data.lock());
                    self.signal.set(value);
                }
                None => self.signal.fail(value, "source is not host-simulated memory".to_string()),
            }
        }

        self.shared.counters.copies_out.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(device = %self.device.id, value, bytes = dst.len(), "copy_out executed");
        Ok(self.event(value, TransferDirection::DeviceToHost))
    }

    fn finish(&self) -> Result<()> {
        let issued = self.submit.lock().issued;
        self.signal.wait_reached(issued);
        Ok(())
    }
}

impl Drop for CpuQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.submit.lock().sender.take();
        if let Some(worker) = self.worker.lock().take()
            && worker.join().is_err()
        {
            tracing::error!(device = %self.device.id, "copy worker panicked");
        }
    }
}
