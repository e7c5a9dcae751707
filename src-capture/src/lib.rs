//! Frame capture pipeline.
//!
//! Copies a rendered frame from the GPU to a PNG file without stalling the
//! render loop: reads are double-buffered and split across two frames, pixels
//! are handed to separate encoder processes through shared memory, and the
//! coordinator advances everything from per-frame hooks.

pub mod backend;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod naming;
pub mod pool;
pub mod readback;
pub mod triggers;
pub mod workers;

pub use backend::{ReadbackBackend, SoftwareBackend};
pub use config::{load_config, save_config, CaptureConfig, ReadbackMode};
pub use coordinator::{
    CaptureCoordinator, CaptureMode, CaptureOutcome, CapturedFile, RequestId, RequestStatus,
};
pub use error::CaptureError;
pub use metrics::CaptureMetrics;
pub use triggers::ScreenCaptures;
pub use workers::{EncodeService, EncodeWorkerPool, EncoderCommand};
