//! Failure values reported by the capture coordinator.

use framecap_common::{EncodeFailure, FrameSize};

use crate::readback::ReadbackFailure;
use crate::workers::{EncodeError, WorkerPoolError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// A manual capture is still being read back or handed off
    CaptureInProgress,
    /// Another live request already targets this file
    PathInUse(String),
    /// Too many automatic captures waiting
    AutoQueueFull,
    /// No transfer buffer became free
    NoTransferBuffer,
    SurfaceResized { expected: FrameSize, actual: FrameSize },
    ContextLost,
    /// The GPU copy never completed
    ReadbackTimedOut,
    /// The pixel channel stayed leased for too long
    HandOffTimedOut,
    /// The worker could not produce the file
    Encode(String),
    /// No encode result within the configured time; nothing was written
    EncodeTimedOut,
    /// No encode worker could take the job
    WorkerUnavailable(String),
    /// The request itself is unusable (bad path, frame too large, ...)
    InvalidRequest(String),
    /// Capturing is switched off in the config
    Disabled,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::CaptureInProgress => write!(f, "Capture in progress"),
            CaptureError::PathInUse(path) => write!(f, "Capture already writing to {}", path),
            CaptureError::AutoQueueFull => write!(f, "Automatic capture queue is full"),
            CaptureError::NoTransferBuffer => write!(f, "No transfer buffer available"),
            CaptureError::SurfaceResized { expected, actual } => write!(
                f,
                "Surface resized during capture ({} -> {})",
                expected, actual
            ),
            CaptureError::ContextLost => write!(f, "Rendering context lost"),
            CaptureError::ReadbackTimedOut => write!(f, "GPU readback timed out"),
            CaptureError::HandOffTimedOut => write!(f, "Timed out handing pixels to encoder"),
            CaptureError::Encode(msg) => write!(f, "Encoding failed: {}", msg),
            CaptureError::EncodeTimedOut => write!(f, "Timed out waiting for the encoder"),
            CaptureError::WorkerUnavailable(msg) => write!(f, "Encoder unavailable: {}", msg),
            CaptureError::InvalidRequest(msg) => write!(f, "Invalid capture request: {}", msg),
            CaptureError::Disabled => write!(f, "Capturing is disabled"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<ReadbackFailure> for CaptureError {
    fn from(e: ReadbackFailure) -> Self {
        match e {
            ReadbackFailure::ContextLost => CaptureError::ContextLost,
            ReadbackFailure::SurfaceResized { expected, actual } => {
                CaptureError::SurfaceResized { expected, actual }
            }
            ReadbackFailure::NotReady { .. } => CaptureError::ReadbackTimedOut,
            ReadbackFailure::HandOffTimedOut => CaptureError::HandOffTimedOut,
            ReadbackFailure::FrameTooLarge { .. } => CaptureError::InvalidRequest(e.to_string()),
            ReadbackFailure::Backend(_) | ReadbackFailure::HandOff(_) => {
                CaptureError::Encode(e.to_string())
            }
        }
    }
}

impl From<EncodeError> for CaptureError {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::Worker(failure) => CaptureError::from(failure),
            EncodeError::Unavailable(msg) => CaptureError::WorkerUnavailable(msg),
            EncodeError::WorkerCrashed | EncodeError::PoolClosed => {
                CaptureError::WorkerUnavailable(e.to_string())
            }
            EncodeError::Cancelled => CaptureError::Encode(e.to_string()),
        }
    }
}

impl From<EncodeFailure> for CaptureError {
    fn from(e: EncodeFailure) -> Self {
        match e {
            EncodeFailure::InvalidPath(_) => CaptureError::InvalidRequest(e.to_string()),
            other => CaptureError::Encode(other.to_string()),
        }
    }
}

impl From<WorkerPoolError> for CaptureError {
    fn from(e: WorkerPoolError) -> Self {
        CaptureError::WorkerUnavailable(e.to_string())
    }
}
