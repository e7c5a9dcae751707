//! Fixed set of GPU transfer buffers used for ping-pong readback.
//!
//! Buffers are allocated once and cycle through `Free → ReadIssued → Mapped →
//! Free`. The pool never blocks: when nothing is free the caller defers.

use tracing::{debug, info};

use crate::backend::{BackendError, ReadbackBackend, TransferBufferId};

/// Number of transfer buffers the pipeline is designed around.
pub const DEFAULT_BUFFER_COUNT: usize = 2;

/// Lifecycle state of one transfer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free,
    /// The GPU is copying into the buffer
    ReadIssued,
    /// Host-visible, waiting to be extracted
    Mapped,
}

/// Index of a buffer inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

impl BufferHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Per-state buffer counts; always sums to the pool size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferCounts {
    pub free: usize,
    pub read_issued: usize,
    pub mapped: usize,
}

impl BufferCounts {
    pub fn total(&self) -> usize {
        self.free + self.read_issued + self.mapped
    }
}

#[derive(Debug)]
pub enum PoolError {
    /// The handle does not belong to this pool
    UnknownHandle(BufferHandle),
    /// The requested state change is not part of the buffer lifecycle
    InvalidTransition {
        handle: BufferHandle,
        from: BufferState,
        to: BufferState,
    },
    /// Reallocation requested while buffers are in use
    Busy,
    /// Pool size must be at least one
    Empty,
    Backend(BackendError),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::UnknownHandle(h) => write!(f, "Unknown transfer buffer handle {}", h.0),
            PoolError::InvalidTransition { handle, from, to } => write!(
                f,
                "Invalid transfer buffer transition for {}: {:?} -> {:?}",
                handle.0, from, to
            ),
            PoolError::Busy => write!(f, "Transfer buffers are in use"),
            PoolError::Empty => write!(f, "Transfer buffer pool needs at least one buffer"),
            PoolError::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<BackendError> for PoolError {
    fn from(e: BackendError) -> Self {
        PoolError::Backend(e)
    }
}

#[derive(Debug)]
struct TransferBuffer {
    id: TransferBufferId,
    state: BufferState,
}

#[derive(Debug)]
pub struct TransferBufferPool {
    buffers: Vec<TransferBuffer>,
    /// Next buffer to hand out; alternates so a freshly released buffer is
    /// not immediately reused while its sibling sits idle.
    cursor: usize,
    byte_len: usize,
}

impl TransferBufferPool {
    /// Allocate `count` buffers of `byte_len` bytes each.
    pub fn new<B: ReadbackBackend + ?Sized>(
        backend: &mut B,
        count: usize,
        byte_len: usize,
    ) -> Result<Self, PoolError> {
        if count == 0 {
            return Err(PoolError::Empty);
        }
        let buffers = allocate(backend, count, byte_len)?;
        info!(
            "Initialized {} transfer buffers ({} bytes each)",
            count, byte_len
        );
        Ok(Self {
            buffers,
            cursor: 0,
            byte_len,
        })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Size of each buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Pick a free buffer, or `None` if every buffer is busy.
    ///
    /// The buffer stays `Free` until [`mark_read_issued`](Self::mark_read_issued).
    pub fn acquire_free(&mut self) -> Option<BufferHandle> {
        let count = self.buffers.len();
        let index = (0..count)
            .map(|offset| (self.cursor + offset) % count)
            .find(|&i| self.buffers[i].state == BufferState::Free)?;
        self.cursor = (index + 1) % count;
        Some(BufferHandle(index))
    }

    pub fn mark_read_issued(&mut self, handle: BufferHandle) -> Result<(), PoolError> {
        self.transition(handle, BufferState::Free, BufferState::ReadIssued)
    }

    pub fn mark_mapped(&mut self, handle: BufferHandle) -> Result<(), PoolError> {
        self.transition(handle, BufferState::ReadIssued, BufferState::Mapped)
    }

    /// Return a buffer to `Free` from any busy state.
    pub fn release(&mut self, handle: BufferHandle) -> Result<(), PoolError> {
        let buffer = self
            .buffers
            .get_mut(handle.0)
            .ok_or(PoolError::UnknownHandle(handle))?;
        if buffer.state == BufferState::Free {
            return Err(PoolError::InvalidTransition {
                handle,
                from: BufferState::Free,
                to: BufferState::Free,
            });
        }
        debug!("Released transfer buffer {} ({:?})", handle.0, buffer.state);
        buffer.state = BufferState::Free;
        Ok(())
    }

    pub fn state(&self, handle: BufferHandle) -> Option<BufferState> {
        self.buffers.get(handle.0).map(|b| b.state)
    }

    /// Backend identifier of a buffer.
    pub fn id(&self, handle: BufferHandle) -> Option<TransferBufferId> {
        self.buffers.get(handle.0).map(|b| b.id)
    }

    pub fn counts(&self) -> BufferCounts {
        self.buffers
            .iter()
            .fold(BufferCounts::default(), |mut counts, b| {
                match b.state {
                    BufferState::Free => counts.free += 1,
                    BufferState::ReadIssued => counts.read_issued += 1,
                    BufferState::Mapped => counts.mapped += 1,
                }
                counts
            })
    }

    /// Replace every buffer with one of `byte_len` bytes.
    ///
    /// Only allowed while all buffers are free; the pool size is unchanged.
    pub fn reallocate<B: ReadbackBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        byte_len: usize,
    ) -> Result<(), PoolError> {
        if self.counts().free != self.buffers.len() {
            return Err(PoolError::Busy);
        }
        let fresh = allocate(backend, self.buffers.len(), byte_len)?;
        for old in std::mem::replace(&mut self.buffers, fresh) {
            backend.free_transfer_buffer(old.id);
        }
        self.byte_len = byte_len;
        self.cursor = 0;
        info!("Reallocated transfer buffers ({} bytes each)", byte_len);
        Ok(())
    }

    /// Free all backend buffers. The pool is unusable afterwards.
    pub fn destroy<B: ReadbackBackend + ?Sized>(&mut self, backend: &mut B) {
        for buffer in self.buffers.drain(..) {
            backend.free_transfer_buffer(buffer.id);
        }
    }

    fn transition(
        &mut self,
        handle: BufferHandle,
        from: BufferState,
        to: BufferState,
    ) -> Result<(), PoolError> {
        let buffer = self
            .buffers
            .get_mut(handle.0)
            .ok_or(PoolError::UnknownHandle(handle))?;
        if buffer.state != from {
            return Err(PoolError::InvalidTransition {
                handle,
                from: buffer.state,
                to,
            });
        }
        buffer.state = to;
        Ok(())
    }
}

fn allocate<B: ReadbackBackend + ?Sized>(
    backend: &mut B,
    count: usize,
    byte_len: usize,
) -> Result<Vec<TransferBuffer>, PoolError> {
    let mut buffers = Vec::with_capacity(count);
    for _ in 0..count {
        match backend.allocate_transfer_buffer(byte_len) {
            Ok(id) => buffers.push(TransferBuffer {
                id,
                state: BufferState::Free,
            }),
            Err(e) => {
                for buffer in buffers {
                    backend.free_transfer_buffer(buffer.id);
                }
                return Err(e.into());
            }
        }
    }
    Ok(buffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    fn pool(backend: &mut SoftwareBackend) -> TransferBufferPool {
        TransferBufferPool::new(backend, DEFAULT_BUFFER_COUNT, 64).unwrap()
    }

    #[test]
    fn test_ping_pong_acquire() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut pool = pool(&mut backend);

        let first = pool.acquire_free().unwrap();
        pool.mark_read_issued(first).unwrap();
        let second = pool.acquire_free().unwrap();
        assert_ne!(first, second);
        pool.mark_read_issued(second).unwrap();

        assert!(pool.acquire_free().is_none());

        pool.mark_mapped(first).unwrap();
        pool.release(first).unwrap();
        assert_eq!(pool.acquire_free(), Some(first));
    }

    #[test]
    fn test_alternates_when_both_free() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut pool = pool(&mut backend);

        let a = pool.acquire_free().unwrap();
        pool.mark_read_issued(a).unwrap();
        pool.release(a).unwrap();
        let b = pool.acquire_free().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_counts_always_total_pool_size() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut pool = pool(&mut backend);
        let h = pool.acquire_free().unwrap();

        assert_eq!(pool.counts().total(), 2);
        pool.mark_read_issued(h).unwrap();
        assert_eq!(
            pool.counts(),
            BufferCounts {
                free: 1,
                read_issued: 1,
                mapped: 0
            }
        );
        pool.mark_mapped(h).unwrap();
        assert_eq!(pool.counts().mapped, 1);
        assert_eq!(pool.counts().total(), 2);
        pool.release(h).unwrap();
        assert_eq!(pool.counts().free, 2);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut pool = pool(&mut backend);
        let h = pool.acquire_free().unwrap();

        assert!(matches!(
            pool.mark_mapped(h),
            Err(PoolError::InvalidTransition { .. })
        ));
        assert!(matches!(
            pool.release(h),
            Err(PoolError::InvalidTransition { .. })
        ));
        pool.mark_read_issued(h).unwrap();
        assert!(matches!(
            pool.mark_read_issued(h),
            Err(PoolError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_reallocate_requires_all_free() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut pool = pool(&mut backend);
        let h = pool.acquire_free().unwrap();
        pool.mark_read_issued(h).unwrap();

        assert!(matches!(
            pool.reallocate(&mut backend, 128),
            Err(PoolError::Busy)
        ));

        pool.release(h).unwrap();
        pool.reallocate(&mut backend, 128).unwrap();
        assert_eq!(pool.byte_len(), 128);
        assert_eq!(pool.len(), 2);
        assert_eq!(backend.buffer_count(), 2);
        assert_eq!(backend.stats().buffers_freed, 2);
    }

    #[test]
    fn test_zero_buffers_rejected() {
        let mut backend = SoftwareBackend::new(4, 4);
        assert!(matches!(
            TransferBufferPool::new(&mut backend, 0, 64),
            Err(PoolError::Empty)
        ));
    }
}
