//! Hand-off of raw frame pixels to the encode workers.
//!
//! One shared-memory segment, sized for the largest supported frame, is
//! created at start-up and reused for every capture. Access follows a lease:
//! a write takes the lease, and it stays taken until the worker confirms it
//! has copied the pixels out. No lock is involved; the coordinator is the only
//! writer and releases the lease from its own tick.

use std::time::Instant;

use framecap_common::shm::{unique_segment_name, SegmentError, SharedSegment};
use framecap_common::{FrameSize, RowOrder, SegmentHandle};
use tracing::{debug, info};

#[derive(Debug)]
pub enum ChannelError {
    /// A previous write has not been released yet
    Busy { sequence: u64 },
    /// Frame does not fit into the segment
    TooLarge { len: usize, capacity: usize },
    /// Release without an outstanding write
    NotLeased,
    /// Release of a write other than the outstanding one
    WrongLease { held: u64, released: u64 },
    Segment(SegmentError),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Busy { sequence } => {
                write!(f, "Pixel channel busy with write {}", sequence)
            }
            ChannelError::TooLarge { len, capacity } => write!(
                f,
                "Frame of {} bytes exceeds pixel channel capacity {}",
                len, capacity
            ),
            ChannelError::NotLeased => write!(f, "Pixel channel has no outstanding write"),
            ChannelError::WrongLease { held, released } => write!(
                f,
                "Pixel channel lease mismatch: holding {}, released {}",
                held, released
            ),
            ChannelError::Segment(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<SegmentError> for ChannelError {
    fn from(e: SegmentError) -> Self {
        match e {
            SegmentError::TooLarge { len, capacity } => ChannelError::TooLarge { len, capacity },
            other => ChannelError::Segment(other),
        }
    }
}

/// A frame published into the channel, plus how to interpret its bytes.
#[derive(Debug, Clone)]
pub struct HandOff {
    pub handle: SegmentHandle,
    pub size: FrameSize,
    pub bytes_per_row: u32,
    pub row_order: RowOrder,
}

#[derive(Debug, Clone, Copy)]
enum Lease {
    Free,
    Held { sequence: u64, since: Instant },
}

#[derive(Debug)]
pub struct SharedPixelChannel {
    segment: SharedSegment,
    lease: Lease,
    next_sequence: u64,
}

impl SharedPixelChannel {
    /// Create the channel with room for `capacity` bytes of pixels.
    pub fn create(capacity: usize) -> Result<Self, ChannelError> {
        let name = unique_segment_name();
        let segment = SharedSegment::create(&name, capacity)?;
        info!(
            "Created pixel hand-off segment {} ({} bytes)",
            segment.name(),
            capacity
        );
        Ok(Self {
            segment,
            lease: Lease::Free,
            next_sequence: 1,
        })
    }

    /// Channel sized for frames up to `max` with the given row stride.
    pub fn for_max_frame(max: FrameSize, bytes_per_row: u32) -> Result<Self, ChannelError> {
        Self::create(bytes_per_row as usize * max.height as usize)
    }

    pub fn capacity(&self) -> usize {
        self.segment.capacity()
    }

    pub fn segment_name(&self) -> &str {
        self.segment.name()
    }

    /// Whether a new write would be accepted.
    pub fn is_available(&self) -> bool {
        matches!(self.lease, Lease::Free)
    }

    /// Sequence of the outstanding write and when it was taken.
    pub fn lease(&self) -> Option<(u64, Instant)> {
        match self.lease {
            Lease::Free => None,
            Lease::Held { sequence, since } => Some((sequence, since)),
        }
    }

    fn check_free(&self) -> Result<(), ChannelError> {
        match self.lease {
            Lease::Free => Ok(()),
            Lease::Held { sequence, .. } => Err(ChannelError::Busy { sequence }),
        }
    }

    /// Writable payload area for a frame of `len` bytes.
    ///
    /// Lets a producer fill the segment in place; nothing is published until
    /// [`commit`](Self::commit).
    pub fn reserve(&mut self, len: usize) -> Result<&mut [u8], ChannelError> {
        self.check_free()?;
        Ok(self.segment.payload_mut(len)?)
    }

    /// Publish the first `len` reserved bytes and take the lease.
    pub fn commit(&mut self, len: usize) -> Result<SegmentHandle, ChannelError> {
        self.check_free()?;
        let sequence = self.next_sequence;
        let handle = self.segment.commit(sequence, len)?;
        self.next_sequence += 1;
        self.lease = Lease::Held {
            sequence,
            since: Instant::now(),
        };
        debug!("Pixel channel write {} ({} bytes)", sequence, len);
        Ok(handle)
    }

    /// Copy `bytes` into the segment in one pass and take the lease.
    ///
    /// The returned handle is only valid until the next write.
    pub fn write(&mut self, bytes: &[u8]) -> Result<SegmentHandle, ChannelError> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        self.commit(bytes.len())
    }

    /// Give the lease back once the reader is done with `handle`.
    pub fn release(&mut self, handle: &SegmentHandle) -> Result<(), ChannelError> {
        match self.lease {
            Lease::Free => Err(ChannelError::NotLeased),
            Lease::Held { sequence, since } if sequence == handle.sequence => {
                debug!(
                    "Pixel channel write {} released after {:?}",
                    sequence,
                    since.elapsed()
                );
                self.lease = Lease::Free;
                Ok(())
            }
            Lease::Held { sequence, .. } => Err(ChannelError::WrongLease {
                held: sequence,
                released: handle.sequence,
            }),
        }
    }
}
