use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// No enumerated device matches the configured selector.
    #[snafu(display("no device matches {selector}"))]
    DeviceNotFound { selector: String },

    /// Invalid device specification.
    #[snafu(display("invalid device: {device}"))]
    InvalidDevice { device: String },

    #[snafu(display("size mismatch: expected {expected}, got {actual}"))]
    SizeMismatch { expected: usize, actual: usize },

    /// The buffer belongs to another device than the queue it was given to.
    #[snafu(display("buffer lives on device {buffer_device}, queue targets {queue_device}"))]
    ForeignBuffer { buffer_device: String, queue_device: String },

    /// An asynchronous copy failed. Surfaced when the transfer is waited on.
    #[snafu(display("transfer {value} on {device} failed: {reason}"))]
    TransferFailed { device: String, value: u64, reason: String },

    /// Failed to allocate device memory.
    #[snafu(display("allocation of {size} bytes failed: {reason}"))]
    AllocationFailed { size: usize, reason: String },

    #[snafu(display("runtime error: {message}"))]
    Runtime { message: String },

    #[cfg(feature = "cuda")]
    /// CUDA-specific errors.
    #[snafu(display("CUDA error: {source}"))]
    Cuda { source: cudarc::driver::DriverError },
}
