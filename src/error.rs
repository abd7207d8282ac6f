use std::io;
use std::result;

use thiserror::Error;

/// Custom result type for tile storage operations
pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by the tile storage engine.
///
/// Out-of-range reads are not errors (they yield the default pixel) and
/// rollback/rollforward past the history bounds are safe no-ops, so the
/// taxonomy here is small: malformed buffer shapes handed in by the
/// caller, and I/O trouble in the swap layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied buffer does not match the requested rectangle
    #[error("buffer holds {actual} bytes but the rectangle needs {expected}")]
    BadBufferSize { expected: usize, actual: usize },
    /// Default pixel or clear pixel length differs from the pixel size
    #[error("pixel value is {actual} bytes but the device pixel size is {expected}")]
    BadPixelSize { expected: usize, actual: usize },
    /// Planar channel sizes do not add up to the pixel size
    #[error("channel sizes sum to {sum} bytes but the device pixel size is {pixel_size}")]
    BadChannelSizes { sum: usize, pixel_size: usize },
    /// Number of planes differs from the number of channel sizes
    #[error("{planes} planes supplied for {channels} channels")]
    BadPlaneCount { planes: usize, channels: usize },
    /// Swap file could not be created, grown or mapped
    #[error("swap file I/O failed: {0}")]
    Swap(#[from] io::Error),
}
