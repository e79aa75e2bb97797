//! Error types for the vision engine.
//!
//! Most of the engine degrades silently (neutral defaults, `None` results), so
//! this enum is deliberately small: it covers caller mistakes and the few
//! operations that touch encoded images, files or worker tasks.

use thiserror::Error;

/// Result type for vision operations.
pub type VisionResult<T> = Result<T, VisionError>;

/// Errors that can occur while building fingerprints or driving matchers.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("No input fingerprints were provided")]
    NoInput,

    #[error("Invalid pixel buffer: expected {expected} bytes, got {actual}")]
    InvalidBuffer { expected: usize, actual: usize },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Subject worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl VisionError {
    /// Create a buffer-size mismatch error.
    pub fn invalid_buffer(expected: usize, actual: usize) -> Self {
        Self::InvalidBuffer { expected, actual }
    }

    /// Create a worker failure error.
    pub fn worker_unavailable(message: impl Into<String>) -> Self {
        Self::WorkerUnavailable(message.into())
    }
}
