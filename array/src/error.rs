use mirror_device::DeviceId;
use snafu::Snafu;

use crate::coherence::Location;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("device error"))]
    Device { source: mirror_device::Error },

    /// A pull (or device-side write) was requested before any push to that device.
    #[snafu(display("no buffer on {device}: push to the device before pulling from it"))]
    MissingBuffer { device: DeviceId },

    /// The copy was issued but did not complete successfully.
    #[snafu(display("transfer to {location} failed"))]
    Transfer { location: Location, source: mirror_device::Error },

    #[snafu(display("index {index} is out of bounds for length {len}"))]
    IndexOutOfBounds { index: usize, len: usize },

    #[snafu(display("range {start}..{end} is out of bounds for length {len}"))]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    #[snafu(display("cannot index into a 0-dimensional array"))]
    ZeroDimensional,

    #[snafu(display("cannot reshape {from:?} into {to:?}"))]
    ReshapeSizeMismatch { from: Vec<usize>, to: Vec<usize> },

    #[snafu(display("length mismatch: expected {expected}, got {actual}"))]
    LengthMismatch { expected: usize, actual: usize },
}
