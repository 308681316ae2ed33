//! Error taxonomy for the capture path.
//!
//! Every shot either succeeds or fails with exactly one `CaptureError`.
//! `kind()` gives the stable name used in console lines and HTTP error bodies.

use std::collections::TryReserveError;
use thiserror::Error;

use crate::sensor::FrameFormat;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera capture failed: no frame available")]
    SensorUnavailable,
    #[error("conversion failed: {0}")]
    ConversionFailed(#[from] ConversionError),
    #[error("storage failed: {0}")]
    StorageFailed(StorageError),
    #[error("identity space exhausted: all ids up to {max} are in use")]
    CapacityExhausted { max: u32 },
}

impl CaptureError {
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::SensorUnavailable => "sensor_unavailable",
            CaptureError::ConversionFailed(_) => "conversion_failed",
            CaptureError::StorageFailed(_) => "storage_failed",
            CaptureError::CapacityExhausted { .. } => "capacity_error",
        }
    }
}

impl From<StorageError> for CaptureError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Exhausted { max } => CaptureError::CapacityExhausted { max },
            other => CaptureError::StorageFailed(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(FrameFormat),
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("failed to allocate swap buffer: {0}")]
    Allocation(#[from] TryReserveError),
    #[error("encoder error: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage not available")]
    Absent,
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },
    #[error("identity space exhausted: all ids up to {max} are in use")]
    Exhausted { max: u32 },
    #[error("invalid object path '{0}'")]
    InvalidPath(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor init failed: {0}")]
    Init(String),
    #[error("sensor not initialized")]
    NotInitialized,
}

/// Caller-supplied parameter outside its contract range. Raised before any side effect.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid quality {0}: must be between 0 and 63")]
    QualityOutOfRange(i64),
    #[error("Invalid resolution {0}: must be between 0 and 7")]
    ResolutionOutOfRange(i64),
    #[error("Invalid pixel format {0}: must be between 0 and 2")]
    PixelLayoutOutOfRange(i64),
    #[error("Invalid endianness {0}: must be 0 or 1")]
    ByteOrderOutOfRange(i64),
    #[error("Count must be between 1 and 200")]
    BurstCount(i64),
    #[error("Interval must be between 0.1 and 5.0 seconds")]
    BurstInterval(f64),
    #[error("Invalid number '{0}'")]
    NotANumber(String),
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        "validation_error"
    }
}
