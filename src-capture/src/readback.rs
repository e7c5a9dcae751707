//! Asynchronous GPU readback split across two frames.
//!
//! A read is issued during the draw phase of frame N and returns immediately;
//! the GPU copies into a transfer buffer while the rest of the frame renders.
//! From the update phase of frame N+1 on, the buffer is mapped without
//! blocking, copied into the pixel channel and released. A buffer that never
//! becomes ready within `map_retry_limit` attempts fails the read instead of
//! stalling.
//!
//! ```text
//! Idle ──draw(N)──▶ ReadIssued ──update(≥N+1)──▶ Mapped ──▶ Extracted
//!                       │                          │
//!                       └──── lost / resized / not ready ──▶ Failed
//! ```

use std::time::{Duration, Instant};

use framecap_common::FrameSize;
use tracing::{debug, warn};

use crate::backend::{BackendError, MapStatus, ReadbackBackend};
use crate::channel::{ChannelError, HandOff, SharedPixelChannel};
use crate::pool::{BufferCounts, BufferHandle, PoolError, TransferBufferPool};

/// Map attempts allowed after the read becomes eligible.
pub const DEFAULT_MAP_RETRY_LIMIT: u32 = 3;

/// Why a readback ended without pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadbackFailure {
    ContextLost,
    SurfaceResized { expected: FrameSize, actual: FrameSize },
    /// The GPU copy did not complete within the retry budget
    NotReady { attempts: u32 },
    /// The hand-off stage never became free
    HandOffTimedOut,
    /// The frame cannot fit the transfer buffers or the channel
    FrameTooLarge { len: usize, capacity: usize },
    Backend(String),
    HandOff(String),
}

impl std::fmt::Display for ReadbackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadbackFailure::ContextLost => write!(f, "Rendering context lost during capture"),
            ReadbackFailure::SurfaceResized { expected, actual } => write!(
                f,
                "Surface resized during capture ({} -> {})",
                expected, actual
            ),
            ReadbackFailure::NotReady { attempts } => {
                write!(f, "Readback not ready after {} attempts", attempts)
            }
            ReadbackFailure::HandOffTimedOut => write!(f, "Timed out waiting for pixel channel"),
            ReadbackFailure::FrameTooLarge { len, capacity } => write!(
                f,
                "Frame of {} bytes exceeds capacity {}",
                len, capacity
            ),
            ReadbackFailure::Backend(msg) => write!(f, "Backend error: {}", msg),
            ReadbackFailure::HandOff(msg) => write!(f, "Hand-off failed: {}", msg),
        }
    }
}

impl std::error::Error for ReadbackFailure {}

impl From<BackendError> for ReadbackFailure {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::ContextLost => ReadbackFailure::ContextLost,
            other => ReadbackFailure::Backend(other.to_string()),
        }
    }
}

impl From<ChannelError> for ReadbackFailure {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::TooLarge { len, capacity } => {
                ReadbackFailure::FrameTooLarge { len, capacity }
            }
            other => ReadbackFailure::HandOff(other.to_string()),
        }
    }
}

/// Where a readback currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadbackStage {
    ReadIssued,
    Mapped,
    Extracted,
    Failed(ReadbackFailure),
}

/// One in-flight split-frame readback.
#[derive(Debug)]
pub struct Readback {
    buffer: BufferHandle,
    size: FrameSize,
    issued_frame: u64,
    mapped_frame: Option<u64>,
    map_attempts: u32,
    stage: ReadbackStage,
    /// Time spent in map calls on the caller's thread
    pub map_time: Duration,
    /// Time spent copying into the pixel channel
    pub copy_time: Duration,
}

impl Readback {
    pub fn stage(&self) -> &ReadbackStage {
        &self.stage
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn issued_frame(&self) -> u64 {
        self.issued_frame
    }

    pub fn mapped_frame(&self) -> Option<u64> {
        self.mapped_frame
    }

    pub fn map_attempts(&self) -> u32 {
        self.map_attempts
    }

    fn is_active(&self) -> bool {
        matches!(self.stage, ReadbackStage::ReadIssued | ReadbackStage::Mapped)
    }
}

/// Result of advancing a readback by one update phase.
#[derive(Debug)]
pub enum Step {
    /// Nothing to do this frame (same frame as issue, or GPU still busy)
    Waiting,
    /// Mapped, but the pixel channel is still leased
    AwaitingChannel,
    Extracted(HandOff),
    Failed(ReadbackFailure),
}

/// Outcome of trying to start a readback.
#[derive(Debug)]
pub enum Issue {
    Issued(Readback),
    /// Every transfer buffer is busy; try again on a later frame
    NoBufferFree,
}

pub struct FrameReadbackController {
    pool: TransferBufferPool,
    map_retry_limit: u32,
}

impl FrameReadbackController {
    pub fn new(pool: TransferBufferPool, map_retry_limit: u32) -> Self {
        Self {
            pool,
            map_retry_limit: map_retry_limit.max(1),
        }
    }

    pub fn pool(&self) -> &TransferBufferPool {
        &self.pool
    }

    pub fn buffer_counts(&self) -> BufferCounts {
        self.pool.counts()
    }

    /// Draw phase: start an asynchronous copy of the current framebuffer.
    pub fn issue<B: ReadbackBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        frame: u64,
    ) -> Result<Issue, ReadbackFailure> {
        if backend.is_context_lost() {
            return Err(ReadbackFailure::ContextLost);
        }
        let size = backend.surface_size();
        let len = backend.transfer_len(size);
        if len > self.pool.byte_len() {
            return Err(ReadbackFailure::FrameTooLarge {
                len,
                capacity: self.pool.byte_len(),
            });
        }

        let Some(handle) = self.pool.acquire_free() else {
            return Ok(Issue::NoBufferFree);
        };
        let id = self
            .pool
            .id(handle)
            .ok_or_else(|| ReadbackFailure::Backend("transfer buffer vanished".to_string()))?;

        backend.issue_async_read(id)?;
        self.pool
            .mark_read_issued(handle)
            .map_err(|e| ReadbackFailure::Backend(e.to_string()))?;
        debug!(
            "Issued async read into buffer {} at frame {} ({})",
            handle.index(),
            frame,
            size
        );

        Ok(Issue::Issued(Readback {
            buffer: handle,
            size,
            issued_frame: frame,
            mapped_frame: None,
            map_attempts: 0,
            stage: ReadbackStage::ReadIssued,
            map_time: Duration::ZERO,
            copy_time: Duration::ZERO,
        }))
    }

    /// Update phase: move a readback forward by at most one step.
    ///
    /// Never maps in the frame the read was issued in, and never waits on the
    /// GPU: a pending copy is retried on the next call.
    pub fn advance<B: ReadbackBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        readback: &mut Readback,
        frame: u64,
        channel: &mut SharedPixelChannel,
    ) -> Step {
        if !readback.is_active() {
            return match &readback.stage {
                ReadbackStage::Failed(failure) => Step::Failed(failure.clone()),
                _ => Step::Waiting,
            };
        }

        if backend.is_context_lost() {
            return self.fail(readback, ReadbackFailure::ContextLost);
        }
        let actual = backend.surface_size();
        if actual != readback.size {
            return self.fail(
                readback,
                ReadbackFailure::SurfaceResized {
                    expected: readback.size,
                    actual,
                },
            );
        }
        if frame <= readback.issued_frame {
            return Step::Waiting;
        }

        let Some(id) = self.pool.id(readback.buffer) else {
            return self.fail(
                readback,
                ReadbackFailure::Backend("transfer buffer vanished".to_string()),
            );
        };

        let row_order = backend.row_order();
        let started = Instant::now();
        let first_map = readback.stage == ReadbackStage::ReadIssued;
        if first_map {
            readback.map_attempts += 1;
        }

        // The mapped slice borrows the backend, so the outcome is computed in
        // this block and the buffer unmapped afterwards.
        let outcome = match backend.try_map(id) {
            Err(e) => Err(ReadbackFailure::from(e)),
            Ok(MapStatus::Pending) => Ok(None),
            Ok(MapStatus::Ready(mapped)) => {
                readback.map_time += started.elapsed();
                if first_map {
                    if let Err(e) = self.pool.mark_mapped(readback.buffer) {
                        warn!("Transfer buffer state out of sync: {}", e);
                    }
                    readback.stage = ReadbackStage::Mapped;
                    readback.mapped_frame = Some(frame);
                    debug!(
                        "Mapped buffer {} at frame {} (issued {})",
                        readback.buffer.index(),
                        frame,
                        readback.issued_frame
                    );
                }

                if channel.is_available() {
                    let copy_started = Instant::now();
                    let written = channel.write(mapped.data);
                    readback.copy_time += copy_started.elapsed();
                    match written {
                        Ok(handle) => Ok(Some(HandOff {
                            handle,
                            size: readback.size,
                            bytes_per_row: mapped.bytes_per_row,
                            row_order,
                        })),
                        Err(e) => Err(ReadbackFailure::from(e)),
                    }
                } else {
                    Ok(None)
                }
            }
        };

        match outcome {
            Err(failure) => {
                backend.unmap(id);
                self.fail(readback, failure)
            }
            Ok(Some(handoff)) => {
                backend.unmap(id);
                if let Err(e) = self.pool.release(readback.buffer) {
                    warn!("Transfer buffer state out of sync: {}", e);
                }
                readback.stage = ReadbackStage::Extracted;
                Step::Extracted(handoff)
            }
            Ok(None) if readback.stage == ReadbackStage::Mapped => {
                backend.unmap(id);
                Step::AwaitingChannel
            }
            Ok(None) => {
                readback.map_time += started.elapsed();
                if readback.map_attempts >= self.map_retry_limit {
                    warn!(
                        "Readback into buffer {} still pending after {} attempts",
                        readback.buffer.index(),
                        readback.map_attempts
                    );
                    self.fail(
                        readback,
                        ReadbackFailure::NotReady {
                            attempts: readback.map_attempts,
                        },
                    )
                } else {
                    Step::Waiting
                }
            }
        }
    }

    /// Give up on a readback and free its buffer.
    pub fn abandon(&mut self, readback: &mut Readback, failure: ReadbackFailure) {
        if readback.is_active() {
            self.fail(readback, failure);
        }
    }

    fn fail(&mut self, readback: &mut Readback, failure: ReadbackFailure) -> Step {
        if readback.is_active() {
            if let Err(e) = self.pool.release(readback.buffer) {
                warn!("Transfer buffer state out of sync: {}", e);
            }
        }
        debug!(
            "Readback in buffer {} failed: {}",
            readback.buffer.index(),
            failure
        );
        readback.stage = ReadbackStage::Failed(failure.clone());
        Step::Failed(failure)
    }

    /// Whole-frame synchronous read straight into the pixel channel.
    ///
    /// Stalls until the GPU finishes; reserved for captures that are not
    /// latency sensitive.
    pub fn read_blocking<B: ReadbackBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        channel: &mut SharedPixelChannel,
    ) -> Result<HandOff, ReadbackFailure> {
        if backend.is_context_lost() {
            return Err(ReadbackFailure::ContextLost);
        }
        let size = backend.surface_size();
        let len = backend.transfer_len(size);
        let dst = channel.reserve(len)?;
        let bytes_per_row = backend.read_blocking_into(dst)?;
        let handle = channel.commit(len)?;
        Ok(HandOff {
            handle,
            size,
            bytes_per_row,
            row_order: backend.row_order(),
        })
    }

    /// Resize the transfer buffers for a new surface size.
    ///
    /// Returns `false` when buffers are still busy; call again once they are
    /// released.
    pub fn resize<B: ReadbackBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        size: FrameSize,
    ) -> Result<bool, PoolError> {
        let len = backend.transfer_len(size);
        if len == self.pool.byte_len() {
            return Ok(true);
        }
        match self.pool.reallocate(backend, len) {
            Ok(()) => Ok(true),
            Err(PoolError::Busy) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Free the backend buffers.
    pub fn destroy<B: ReadbackBackend + ?Sized>(&mut self, backend: &mut B) {
        self.pool.destroy(backend);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::pool::DEFAULT_BUFFER_COUNT;
    use framecap_common::shm::SharedSegment;
    use framecap_common::RowOrder;

    fn setup(backend: &mut SoftwareBackend) -> (FrameReadbackController, SharedPixelChannel) {
        let len = backend.transfer_len(backend.surface_size());
        let pool = TransferBufferPool::new(backend, DEFAULT_BUFFER_COUNT, len).unwrap();
        let channel = SharedPixelChannel::create(len).unwrap();
        (
            FrameReadbackController::new(pool, DEFAULT_MAP_RETRY_LIMIT),
            channel,
        )
    }

    fn issued(controller: &mut FrameReadbackController, backend: &mut SoftwareBackend, frame: u64) -> Readback {
        match controller.issue(backend, frame).unwrap() {
            Issue::Issued(rb) => rb,
            Issue::NoBufferFree => panic!("expected a free buffer"),
        }
    }

    #[test]
    fn test_never_maps_in_issue_frame() {
        let mut backend = SoftwareBackend::new(4, 4);
        let (mut controller, mut channel) = setup(&mut backend);

        let mut rb = issued(&mut controller, &mut backend, 10);
        assert!(matches!(
            controller.advance(&mut backend, &mut rb, 10, &mut channel),
            Step::Waiting
        ));
        assert_eq!(backend.stats().maps_ready + backend.stats().maps_pending, 0);
        assert_eq!(rb.stage(), &ReadbackStage::ReadIssued);

        let step = controller.advance(&mut backend, &mut rb, 11, &mut channel);
        assert!(matches!(step, Step::Extracted(_)));
        assert_eq!(rb.mapped_frame(), Some(11));
        assert_eq!(rb.stage(), &ReadbackStage::Extracted);
        assert_eq!(controller.buffer_counts().free, DEFAULT_BUFFER_COUNT);
    }

    #[test]
    fn test_extracted_pixels_reach_channel() {
        let mut backend = SoftwareBackend::new(2, 2).with_row_order(RowOrder::BottomUp);
        backend.draw_with(|x, y| [x as u8, y as u8, 7, 255]);
        let (mut controller, mut channel) = setup(&mut backend);

        let mut rb = issued(&mut controller, &mut backend, 0);
        let handoff = match controller.advance(&mut backend, &mut rb, 1, &mut channel) {
            Step::Extracted(h) => h,
            other => panic!("unexpected step {:?}", other),
        };
        assert_eq!(handoff.row_order, RowOrder::BottomUp);
        assert_eq!(handoff.bytes_per_row, 8);
        assert_eq!(handoff.size, FrameSize::new(2, 2));

        let reader = SharedSegment::open(channel.segment_name()).unwrap();
        let bytes = reader.copy_out(&handoff.handle).unwrap();
        // Bottom row first
        assert_eq!(&bytes[..4], &[0, 1, 7, 255]);
    }

    #[test]
    fn test_pending_map_retries_then_fails() {
        let mut backend = SoftwareBackend::new(2, 2).with_latency(10);
        let (mut controller, mut channel) = setup(&mut backend);

        let mut rb = issued(&mut controller, &mut backend, 0);
        assert!(matches!(
            controller.advance(&mut backend, &mut rb, 1, &mut channel),
            Step::Waiting
        ));
        assert!(matches!(
            controller.advance(&mut backend, &mut rb, 2, &mut channel),
            Step::Waiting
        ));
        let step = controller.advance(&mut backend, &mut rb, 3, &mut channel);
        assert!(matches!(
            step,
            Step::Failed(ReadbackFailure::NotReady { attempts: 3 })
        ));
        assert_eq!(controller.buffer_counts().free, DEFAULT_BUFFER_COUNT);
    }

    #[test]
    fn test_busy_channel_defers_extraction() {
        let mut backend = SoftwareBackend::new(2, 2);
        let (mut controller, mut channel) = setup(&mut backend);
        let held = channel.write(&[0u8; 4]).unwrap();

        let mut rb = issued(&mut controller, &mut backend, 0);
        assert!(matches!(
            controller.advance(&mut backend, &mut rb, 1, &mut channel),
            Step::AwaitingChannel
        ));
        assert_eq!(rb.stage(), &ReadbackStage::Mapped);
        assert_eq!(controller.buffer_counts().mapped, 1);

        channel.release(&held).unwrap();
        assert!(matches!(
            controller.advance(&mut backend, &mut rb, 2, &mut channel),
            Step::Extracted(_)
        ));
        // The map frame is the first one, not the extraction frame
        assert_eq!(rb.mapped_frame(), Some(1));
        assert_eq!(controller.buffer_counts().free, DEFAULT_BUFFER_COUNT);
    }

    #[test]
    fn test_resize_fails_readback() {
        let mut backend = SoftwareBackend::new(4, 4);
        let (mut controller, mut channel) = setup(&mut backend);

        let mut rb = issued(&mut controller, &mut backend, 0);
        backend.resize(2, 2);
        let step = controller.advance(&mut backend, &mut rb, 1, &mut channel);
        assert!(matches!(
            step,
            Step::Failed(ReadbackFailure::SurfaceResized { .. })
        ));
        assert_eq!(controller.buffer_counts().free, DEFAULT_BUFFER_COUNT);
    }

    #[test]
    fn test_context_loss_fails_readback() {
        let mut backend = SoftwareBackend::new(4, 4);
        let (mut controller, mut channel) = setup(&mut backend);

        let mut rb = issued(&mut controller, &mut backend, 0);
        backend.lose_context();
        assert!(matches!(
            controller.advance(&mut backend, &mut rb, 1, &mut channel),
            Step::Failed(ReadbackFailure::ContextLost)
        ));
        assert!(matches!(
            controller.issue(&mut backend, 2),
            Err(ReadbackFailure::ContextLost)
        ));
        assert_eq!(controller.buffer_counts().free, DEFAULT_BUFFER_COUNT);
    }

    #[test]
    fn test_no_buffer_free() {
        let mut backend = SoftwareBackend::new(2, 2);
        let (mut controller, _channel) = setup(&mut backend);

        let _a = issued(&mut controller, &mut backend, 0);
        let _b = issued(&mut controller, &mut backend, 0);
        assert!(matches!(
            controller.issue(&mut backend, 0),
            Ok(Issue::NoBufferFree)
        ));
    }

    #[test]
    fn test_abandon_releases_buffer() {
        let mut backend = SoftwareBackend::new(2, 2);
        let (mut controller, _channel) = setup(&mut backend);

        let mut rb = issued(&mut controller, &mut backend, 0);
        controller.abandon(&mut rb, ReadbackFailure::HandOffTimedOut);
        assert_eq!(controller.buffer_counts().free, DEFAULT_BUFFER_COUNT);
        assert_eq!(
            rb.stage(),
            &ReadbackStage::Failed(ReadbackFailure::HandOffTimedOut)
        );
        // A second abandon is a no-op
        controller.abandon(&mut rb, ReadbackFailure::ContextLost);
        assert_eq!(controller.buffer_counts().free, DEFAULT_BUFFER_COUNT);
    }

    #[test]
    fn test_read_blocking_fills_channel() {
        let mut backend = SoftwareBackend::new(3, 2).with_row_alignment(16);
        backend.clear([1, 2, 3, 4]);
        let (mut controller, mut channel) = setup(&mut backend);

        let handoff = controller.read_blocking(&mut backend, &mut channel).unwrap();
        assert_eq!(handoff.bytes_per_row, 16);
        assert_eq!(handoff.handle.len, 32);
        assert!(!channel.is_available());
        assert_eq!(backend.stats().blocking_reads, 1);
    }

    #[test]
    fn test_resize_waits_for_busy_buffers() {
        let mut backend = SoftwareBackend::new(2, 2);
        let (mut controller, mut channel) = setup(&mut backend);

        let mut rb = issued(&mut controller, &mut backend, 0);
        backend.resize(4, 4);
        assert!(!controller.resize(&mut backend, FrameSize::new(4, 4)).unwrap());

        controller.advance(&mut backend, &mut rb, 1, &mut channel);
        assert!(controller.resize(&mut backend, FrameSize::new(4, 4)).unwrap());
        assert_eq!(controller.pool().byte_len(), 64);
    }
}
