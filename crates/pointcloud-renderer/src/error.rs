//! Error taxonomy of the render core.

use crate::gpu::BufferHandle;
use pointcloud::{DecodeError, ViewId};

/// Failures reported by a [`GpuBackend`](crate::gpu::GpuBackend).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    #[error("GPU out of memory")]
    OutOfMemory,

    #[error("GPU context lost")]
    ContextLost,

    #[error("unknown GPU buffer {0:?}")]
    UnknownBuffer(BufferHandle),

    #[error("invalid draw: {0}")]
    InvalidDraw(String),
}

impl GpuError {
    /// Fatal errors end the frame and require a full cache flush.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfMemory | Self::ContextLost)
    }
}

/// Vertex buffer cache failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("view {view:?} needs {required} bytes but its backing buffer holds {available}")]
    ViewOutOfBounds {
        view: ViewId,
        required: usize,
        available: usize,
    },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Why a marker was left out of a frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("vertex buffer rejected: {0}")]
    Cache(#[from] CacheError),

    #[error("draw rejected: {0}")]
    Gpu(#[from] GpuError),

    #[error("color mode needs a color buffer but none was decoded")]
    MissingColorBuffer,

    #[error("hitmap colors hold {available} bytes but {required} are needed")]
    HitmapColorsTruncated { required: usize, available: usize },

    #[error("{points} points exceed the per-marker limit of {limit}")]
    TooManyPoints { points: usize, limit: usize },
}

impl SkipReason {
    /// The GPU error that must abort the frame, if any.
    pub fn fatal(&self) -> Option<&GpuError> {
        match self {
            Self::Gpu(err) | Self::Cache(CacheError::Gpu(err)) if err.is_fatal() => Some(err),
            _ => None,
        }
    }
}

/// A marker that did not render this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedMarker {
    pub name: String,
    pub reason: SkipReason,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
