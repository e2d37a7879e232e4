//! Timeline signals and transfer events.
//!
//! Every command queue owns one timeline signal. Each operation enqueued on
//! the queue is assigned the next timeline value, and the queue advances the
//! signal to that value once the operation completes. A [`TransferEvent`] is
//! the pair `(signal, value)`: waiting on it blocks until the signal reaches
//! the value, then reports whether that particular operation failed.
//!
//! Queues execute in issue order, so the signal only ever moves forward.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use snafu::ensure;

use crate::device::DeviceId;
use crate::error::{Result, RuntimeSnafu, TransferFailedSnafu};

/// Monotonic timeline signal for synchronization.
///
/// All implementations must be `Send + Sync`: operations complete on queue
/// worker threads while the control thread waits.
pub trait TimelineSignal: Send + Sync + fmt::Debug {
    /// Get the current signal value.
    fn value(&self) -> u64;

    /// Mark the operation at `value` (and everything before it) as complete.
    fn set(&self, value: u64);

    /// Mark the operation at `value` as complete but failed.
    ///
    /// The timeline still advances so later operations are not blocked.
    fn fail(&self, value: u64, reason: String);

    /// Wait for the signal to reach `value`, then report the outcome of the
    /// operation at `value`.
    ///
    /// `timeout_ms == 0` waits forever.
    fn wait(&self, value: u64, timeout_ms: u64) -> Result<()>;

    /// Check if the signal has reached `value` without blocking.
    fn is_reached(&self, value: u64) -> bool {
        self.value() >= value
    }
}

/// Failure reasons by timeline value.
///
/// Only the most recent [`FailureLog::CAPACITY`] failures are kept, so a
/// long-lived queue does not accumulate one entry per failed transfer
/// forever. Waiters observe a failure as long as they wait within that
/// window.
#[derive(Debug, Default)]
pub struct FailureLog {
    reasons: BTreeMap<u64, String>,
}

impl FailureLog {
    pub const CAPACITY: usize = 1024;

    pub fn record(&mut self, value: u64, reason: String) {
        self.reasons.insert(value, reason);
        while self.reasons.len() > Self::CAPACITY {
            self.reasons.pop_first();
        }
    }

    pub fn get(&self, value: u64) -> Option<&str> {
        self.reasons.get(&value).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }
}

/// CPU-based timeline signal using atomics and condvar.
#[derive(Debug)]
pub struct CpuTimelineSignal {
    /// Device whose queue drives this signal, for error reporting.
    device: DeviceId,
    /// Current timeline value (monotonically increasing).
    value: AtomicU64,
    /// Failure reasons by timeline value. Also the condvar mutex.
    failures: Mutex<FailureLog>,
    condvar: Condvar,
}

impl CpuTimelineSignal {
    /// Create a new CPU timeline signal starting at 0.
    pub fn new(device: DeviceId) -> Self {
        Self { device, value: AtomicU64::new(0), failures: Mutex::new(FailureLog::default()), condvar: Condvar::new() }
    }

    /// Block until the signal reaches `target`, ignoring failures.
    ///
    /// Used by queues to drain earlier work before a synchronous operation.
    pub fn wait_reached(&self, target: u64) {
        if self.value.load(Ordering::Acquire) >= target {
            return;
        }
        let mut guard = self.failures.lock();
        while self.value.load(Ordering::Acquire) < target {
            self.condvar.wait(&mut guard);
        }
    }

    fn outcome(&self, target: u64) -> Result<()> {
        match self.failures.lock().get(target) {
            Some(reason) => {
                TransferFailedSnafu { device: self.device.to_string(), value: target, reason }.fail()
            }
            None => Ok(()),
        }
    }

    fn advance(&self, value: u64) {
        // Hold the mutex so a waiter between its check and `wait` cannot miss the wakeup.
        let _guard = self.failures.lock();
        self.value.fetch_max(value, Ordering::Release);
        self.condvar.notify_all();
    }
}

impl TimelineSignal for CpuTimelineSignal {
    fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn set(&self, value: u64) {
        self.advance(value);
    }

    fn fail(&self, value: u64, reason: String) {
        self.failures.lock().record(value, reason);
        self.advance(value);
    }

    fn wait(&self, target: u64, timeout_ms: u64) -> Result<()> {
        // Fast path: already reached
        if self.value.load(Ordering::Acquire) >= target {
            return self.outcome(target);
        }

        if timeout_ms == 0 {
            self.wait_reached(target);
            return self.outcome(target);
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        {
            let mut guard = self.failures.lock();
            while self.value.load(Ordering::Acquire) < target {
                let result = self.condvar.wait_until(&mut guard, deadline);
                ensure!(
                    !result.timed_out() || self.value.load(Ordering::Acquire) >= target,
                    RuntimeSnafu {
                        message: format!(
                            "timeline signal timeout: waited {}ms for value {}, current {}",
                            timeout_ms,
                            target,
                            self.value.load(Ordering::Acquire)
                        )
                    }
                );
            }
        }
        self.outcome(target)
    }
}

/// Direction of a host/device copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TransferDirection {
    #[strum(to_string = "host->device")]
    HostToDevice,
    #[strum(to_string = "device->host")]
    DeviceToHost,
}

/// Handle to one enqueued copy.
#[derive(Clone)]
pub struct TransferEvent {
    signal: Arc<dyn TimelineSignal>,
    value: u64,
    device: DeviceId,
    direction: TransferDirection,
}

impl TransferEvent {
    pub fn new(signal: Arc<dyn TimelineSignal>, value: u64, device: DeviceId, direction: TransferDirection) -> Self {
        Self { signal, value, device, direction }
    }

    /// Block until the copy completes. Returns the copy's failure, if any.
    pub fn wait(&self) -> Result<()> {
        self.signal.wait(self.value, 0)
    }

    /// Like [`TransferEvent::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        // 0 means "forever" to the signal.
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self.signal.wait(self.value, ms)
    }

    /// Whether the copy has finished (successfully or not).
    pub fn is_complete(&self) -> bool {
        self.signal.is_reached(self.value)
    }

    /// Timeline value assigned by the queue.
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }
}

impl fmt::Debug for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEvent")
            .field("device", &self.device)
            .field("direction", &self.direction)
            .field("value", &self.value)
            .field("complete", &self.is_complete())
            .finish()
    }
}
