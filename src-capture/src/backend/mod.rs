//! Rendering backend contract consumed by the capture pipeline.
//!
//! The pipeline never talks to a graphics API directly. A backend exposes an
//! asynchronous framebuffer-to-buffer copy, a non-blocking map of the result,
//! a blocking whole-frame read, and enough state to detect context loss and
//! surface resizes.

pub mod software;

use framecap_common::{FrameSize, RowOrder, BYTES_PER_PIXEL};

pub use software::SoftwareBackend;

/// Opaque identifier of a GPU-visible transfer buffer (a PBO name, a wgpu
/// buffer index, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferBufferId(pub u64);

/// Host-visible view of a completed transfer.
#[derive(Debug)]
pub struct MappedFrame<'a> {
    /// `bytes_per_row * height` bytes in the backend's row order
    pub data: &'a [u8],
    pub bytes_per_row: u32,
}

/// Result of trying to map a transfer buffer.
#[derive(Debug)]
pub enum MapStatus<'a> {
    /// The GPU has not finished the copy yet
    Pending,
    Ready(MappedFrame<'a>),
}

/// Error type for backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The rendering context was lost; buffers are gone
    ContextLost,
    /// The buffer was never allocated or was freed
    UnknownBuffer(TransferBufferId),
    /// No read was issued into this buffer
    NothingIssued(TransferBufferId),
    /// The buffer is smaller than the frame being copied into it
    BufferTooSmall { needed: usize, capacity: usize },
    /// Allocation failed
    OutOfMemory(String),
    /// Anything else the backend reports
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::ContextLost => write!(f, "Rendering context lost"),
            BackendError::UnknownBuffer(id) => write!(f, "Unknown transfer buffer {}", id.0),
            BackendError::NothingIssued(id) => {
                write!(f, "No read issued into transfer buffer {}", id.0)
            }
            BackendError::BufferTooSmall { needed, capacity } => write!(
                f,
                "Transfer buffer too small: need {} bytes, have {}",
                needed, capacity
            ),
            BackendError::OutOfMemory(msg) => write!(f, "Out of memory: {}", msg),
            BackendError::Other(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// A renderer that can read back its framebuffer.
pub trait ReadbackBackend {
    /// Current size of the render surface.
    fn surface_size(&self) -> FrameSize;

    /// Order in which rows come back from reads.
    fn row_order(&self) -> RowOrder {
        RowOrder::TopDown
    }

    /// Row stride the backend uses for a frame of `width` pixels.
    fn bytes_per_row(&self, width: u32) -> u32 {
        width * BYTES_PER_PIXEL as u32
    }

    /// Bytes one transfer of a `size` frame occupies.
    fn transfer_len(&self, size: FrameSize) -> usize {
        self.bytes_per_row(size.width) as usize * size.height as usize
    }

    fn is_context_lost(&self) -> bool;

    fn allocate_transfer_buffer(&mut self, byte_len: usize)
        -> Result<TransferBufferId, BackendError>;

    fn free_transfer_buffer(&mut self, id: TransferBufferId);

    /// Start copying the current framebuffer into `id` and return at once.
    fn issue_async_read(&mut self, id: TransferBufferId) -> Result<(), BackendError>;

    /// Map the result of the last read into `id` without blocking.
    fn try_map(&mut self, id: TransferBufferId) -> Result<MapStatus<'_>, BackendError>;

    fn unmap(&mut self, id: TransferBufferId);

    /// Read the current framebuffer synchronously into `dst`, stalling until
    /// the GPU is done. Returns the row stride written.
    fn read_blocking_into(&mut self, dst: &mut [u8]) -> Result<u32, BackendError>;
}
