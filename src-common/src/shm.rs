//! Named shared-memory segments for handing frames to worker processes.
//!
//! A segment is created once by the pipeline and reused for every capture.
//! Layout:
//! ```text
//! ┌─────────────────────┬────────────────────┬──────────────────────────┐
//! │ Sequence (8 bytes)  │ Length (8 bytes)   │ Payload (capacity bytes) │
//! │ Little-endian       │ Little-endian      │ Raw RGBA rows            │
//! └─────────────────────┴────────────────────┴──────────────────────────┘
//! ```
//! Workers open the segment read-only by name, check the header against the
//! handle they were given, and copy the payload out.

use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU64, Ordering};

use crate::types::SegmentHandle;

/// Size of the segment header in bytes.
pub const HEADER_LEN: usize = 16;

/// Header sequence while the payload holds no complete write.
///
/// Never handed out in a [`SegmentHandle`].
pub const SEQUENCE_WRITING: u64 = 0;

/// Error type for shared segment operations.
#[derive(Debug)]
pub enum SegmentError {
    /// Segment name is empty, too long or contains a nul byte
    InvalidName(String),
    /// shm_open/ftruncate failed
    Create(std::io::Error),
    /// Opening an existing segment failed
    Open(std::io::Error),
    /// mmap failed
    Map(std::io::Error),
    /// Payload does not fit into the segment
    TooLarge { len: usize, capacity: usize },
    /// The segment was overwritten since the handle was issued
    Stale { expected: u64, found: u64 },
    /// Header length disagrees with the handle
    LengthMismatch { expected: usize, found: usize },
    /// Write attempted through a read-only mapping
    ReadOnly,
    /// Commit under the reserved in-progress sequence
    InvalidSequence,
    /// Shared memory is not available on this platform
    Unsupported,
}

impl std::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentError::InvalidName(name) => write!(f, "Invalid segment name: {:?}", name),
            SegmentError::Create(e) => write!(f, "Failed to create segment: {}", e),
            SegmentError::Open(e) => write!(f, "Failed to open segment: {}", e),
            SegmentError::Map(e) => write!(f, "Failed to map segment: {}", e),
            SegmentError::TooLarge { len, capacity } => {
                write!(f, "Payload too large: {} bytes (capacity {})", len, capacity)
            }
            SegmentError::Stale { expected, found } => write!(
                f,
                "Segment overwritten: expected sequence {}, found {}",
                expected, found
            ),
            SegmentError::LengthMismatch { expected, found } => write!(
                f,
                "Segment length mismatch: expected {} bytes, found {}",
                expected, found
            ),
            SegmentError::ReadOnly => write!(f, "Segment is mapped read-only"),
            SegmentError::InvalidSequence => {
                write!(f, "Sequence {} is reserved for writes in progress", SEQUENCE_WRITING)
            }
            SegmentError::Unsupported => {
                write!(f, "Shared memory segments are not supported on this platform")
            }
        }
    }
}

impl std::error::Error for SegmentError {}

static SEGMENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a segment name unique to this process.
///
/// Kept short: macOS limits POSIX shm names to 31 characters.
pub fn unique_segment_name() -> String {
    let n = SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/framecap-{}-{}", std::process::id(), n)
}

/// A mapped shared-memory segment.
///
/// The creating side owns the name and unlinks it on drop; opened mappings
/// only unmap.
pub struct SharedSegment {
    name: String,
    ptr: NonNull<u8>,
    map_len: usize,
    owner: bool,
    writable: bool,
}

// The mapping is plain memory; access is sequenced by the lease held in the
// pipeline and the job/receipt messages exchanged with the worker.
unsafe impl Send for SharedSegment {}

impl SharedSegment {
    /// Create a new segment with room for `capacity` payload bytes.
    pub fn create(name: &str, capacity: usize) -> Result<Self, SegmentError> {
        if capacity == 0 {
            return Err(SegmentError::TooLarge { len: 0, capacity });
        }
        let map_len = HEADER_LEN + capacity;
        let ptr = sys::create(name, map_len)?;
        let mut segment = Self {
            name: name.to_string(),
            ptr,
            map_len,
            owner: true,
            writable: true,
        };
        segment.write_header(SEQUENCE_WRITING, 0);
        Ok(segment)
    }

    /// Open an existing segment read-only.
    pub fn open(name: &str) -> Result<Self, SegmentError> {
        let (ptr, map_len) = sys::open(name)?;
        if map_len < HEADER_LEN {
            sys::unmap(ptr, map_len);
            return Err(SegmentError::LengthMismatch {
                expected: HEADER_LEN,
                found: map_len,
            });
        }
        Ok(Self {
            name: name.to_string(),
            ptr,
            map_len,
            owner: false,
            writable: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.map_len - HEADER_LEN
    }

    /// Sequence number of the last committed write.
    pub fn sequence(&self) -> u64 {
        fence(Ordering::Acquire);
        u64::from_le_bytes(self.header_bytes(0))
    }

    fn committed_len(&self) -> usize {
        u64::from_le_bytes(self.header_bytes(8)) as usize
    }

    fn header_bytes(&self, offset: usize) -> [u8; 8] {
        let mut out = [0u8; 8];
        // SAFETY: offset + 8 <= HEADER_LEN <= map_len
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), 8);
        }
        out
    }

    fn write_header(&mut self, sequence: u64, len: usize) {
        let mut header = [0u8; HEADER_LEN];
        header[..8].copy_from_slice(&sequence.to_le_bytes());
        header[8..].copy_from_slice(&(len as u64).to_le_bytes());
        // SAFETY: the mapping is at least HEADER_LEN bytes and writable
        unsafe {
            std::ptr::copy_nonoverlapping(header.as_ptr(), self.ptr.as_ptr(), HEADER_LEN);
        }
        fence(Ordering::Release);
    }

    /// Mutable view of the first `len` payload bytes.
    ///
    /// The header is reset to [`SEQUENCE_WRITING`] first, so every handle
    /// issued earlier reads as stale until the next [`commit`](Self::commit).
    pub fn payload_mut(&mut self, len: usize) -> Result<&mut [u8], SegmentError> {
        if !self.writable {
            return Err(SegmentError::ReadOnly);
        }
        if len > self.capacity() {
            return Err(SegmentError::TooLarge {
                len,
                capacity: self.capacity(),
            });
        }
        self.write_header(SEQUENCE_WRITING, 0);
        // SAFETY: HEADER_LEN + len <= map_len, and &mut self guarantees no
        // other view exists in this process
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(HEADER_LEN), len) })
    }

    /// Publish `len` payload bytes under `sequence`.
    pub fn commit(&mut self, sequence: u64, len: usize) -> Result<SegmentHandle, SegmentError> {
        if !self.writable {
            return Err(SegmentError::ReadOnly);
        }
        if sequence == SEQUENCE_WRITING {
            return Err(SegmentError::InvalidSequence);
        }
        if len > self.capacity() {
            return Err(SegmentError::TooLarge {
                len,
                capacity: self.capacity(),
            });
        }
        self.write_header(sequence, len);
        Ok(SegmentHandle {
            name: self.name.clone(),
            sequence,
            len,
        })
    }

    /// Copy `payload` into the segment and publish it.
    pub fn publish(&mut self, sequence: u64, payload: &[u8]) -> Result<SegmentHandle, SegmentError> {
        self.payload_mut(payload.len())?.copy_from_slice(payload);
        self.commit(sequence, payload.len())
    }

    /// Check that the segment still holds the write `handle` refers to.
    pub fn verify(&self, handle: &SegmentHandle) -> Result<(), SegmentError> {
        let found = self.sequence();
        if found != handle.sequence || found == SEQUENCE_WRITING {
            return Err(SegmentError::Stale {
                expected: handle.sequence,
                found,
            });
        }
        let len = self.committed_len();
        if len != handle.len || len > self.capacity() {
            return Err(SegmentError::LengthMismatch {
                expected: handle.len,
                found: len,
            });
        }
        Ok(())
    }

    /// Copy the payload `handle` refers to out of the segment.
    ///
    /// The header is checked before and after the copy. A writer resets the
    /// sequence before touching the payload, so a write that overlapped the
    /// read is reported as stale instead of returning torn pixels.
    pub fn copy_out(&self, handle: &SegmentHandle) -> Result<Vec<u8>, SegmentError> {
        self.verify(handle)?;
        let mut data = vec![0u8; handle.len];
        // SAFETY: verify() checked handle.len <= capacity
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(HEADER_LEN),
                data.as_mut_ptr(),
                handle.len,
            );
        }
        self.verify(handle)?;
        Ok(data)
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        sys::unmap(self.ptr, self.map_len);
        if self.owner {
            sys::unlink(&self.name);
        }
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(unix)]
mod sys {
    use super::SegmentError;
    use std::ffi::CString;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::ptr::NonNull;

    fn c_name(name: &str) -> Result<CString, SegmentError> {
        if name.len() < 2 || name.len() > 31 || !name.starts_with('/') {
            return Err(SegmentError::InvalidName(name.to_string()));
        }
        CString::new(name).map_err(|_| SegmentError::InvalidName(name.to_string()))
    }

    fn shm_open(name: &CString, flags: libc::c_int) -> std::io::Result<OwnedFd> {
        // shm_open is variadic on macOS, which needs the promoted mode type
        #[cfg(target_os = "macos")]
        let fd = unsafe { libc::shm_open(name.as_ptr(), flags, 0o600 as libc::c_uint) };
        #[cfg(not(target_os = "macos"))]
        let fd = unsafe { libc::shm_open(name.as_ptr(), flags, 0o600 as libc::mode_t) };

        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn map(fd: &OwnedFd, len: usize, prot: libc::c_int) -> std::io::Result<NonNull<u8>> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "mmap returned null"))
    }

    pub fn create(name: &str, len: usize) -> Result<NonNull<u8>, SegmentError> {
        let c = c_name(name)?;
        let fd = shm_open(&c, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR)
            .map_err(SegmentError::Create)?;

        if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } < 0 {
            let err = std::io::Error::last_os_error();
            unlink(name);
            return Err(SegmentError::Create(err));
        }

        map(&fd, len, libc::PROT_READ | libc::PROT_WRITE).map_err(|e| {
            unlink(name);
            SegmentError::Map(e)
        })
    }

    pub fn open(name: &str) -> Result<(NonNull<u8>, usize), SegmentError> {
        let c = c_name(name)?;
        let fd = shm_open(&c, libc::O_RDONLY).map_err(SegmentError::Open)?;

        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } < 0 {
            return Err(SegmentError::Open(std::io::Error::last_os_error()));
        }
        let len = stat.st_size as usize;
        if len == 0 {
            return Err(SegmentError::LengthMismatch {
                expected: super::HEADER_LEN,
                found: 0,
            });
        }

        let ptr = map(&fd, len, libc::PROT_READ).map_err(SegmentError::Map)?;
        Ok((ptr, len))
    }

    pub fn unmap(ptr: NonNull<u8>, len: usize) {
        unsafe {
            libc::munmap(ptr.as_ptr() as *mut libc::c_void, len);
        }
    }

    pub fn unlink(name: &str) {
        if let Ok(c) = CString::new(name) {
            unsafe {
                libc::shm_unlink(c.as_ptr());
            }
        }
    }
}

// TODO: back this with CreateFileMappingW so Windows builds can capture.
#[cfg(not(unix))]
mod sys {
    use super::SegmentError;
    use std::ptr::NonNull;

    pub fn create(_name: &str, _len: usize) -> Result<NonNull<u8>, SegmentError> {
        Err(SegmentError::Unsupported)
    }

    pub fn open(_name: &str) -> Result<(NonNull<u8>, usize), SegmentError> {
        Err(SegmentError::Unsupported)
    }

    pub fn unmap(_ptr: NonNull<u8>, _len: usize) {}

    pub fn unlink(_name: &str) {}
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_copy_out() {
        let name = unique_segment_name();
        let mut writer = SharedSegment::create(&name, 64).unwrap();
        assert_eq!(writer.capacity(), 64);

        let handle = writer.publish(1, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(handle.name, name);
        assert_eq!(handle.len, 8);

        let reader = SharedSegment::open(&name).unwrap();
        assert_eq!(reader.copy_out(&handle).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_stale_handle_detected() {
        let name = unique_segment_name();
        let mut writer = SharedSegment::create(&name, 16).unwrap();
        let first = writer.publish(1, &[0xAA; 4]).unwrap();
        let _second = writer.publish(2, &[0xBB; 4]).unwrap();

        let reader = SharedSegment::open(&name).unwrap();
        assert!(matches!(
            reader.copy_out(&first),
            Err(SegmentError::Stale {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn test_uncommitted_write_makes_old_handle_stale() {
        let name = unique_segment_name();
        let mut writer = SharedSegment::create(&name, 16).unwrap();
        let old = writer.publish(1, &[0xAA; 8]).unwrap();

        // Overwrite the first half without committing
        writer.payload_mut(4).unwrap().copy_from_slice(&[0xBB; 4]);

        let reader = SharedSegment::open(&name).unwrap();
        assert!(matches!(
            reader.copy_out(&old),
            Err(SegmentError::Stale {
                expected: 1,
                found: SEQUENCE_WRITING
            })
        ));

        let new = writer.commit(2, 4).unwrap();
        assert_eq!(reader.copy_out(&new).unwrap(), vec![0xBB; 4]);
        assert!(matches!(reader.copy_out(&old), Err(SegmentError::Stale { .. })));
    }

    #[test]
    fn test_nothing_published_yet() {
        let name = unique_segment_name();
        let _writer = SharedSegment::create(&name, 8).unwrap();
        let reader = SharedSegment::open(&name).unwrap();
        let handle = SegmentHandle {
            name: name.clone(),
            sequence: SEQUENCE_WRITING,
            len: 0,
        };
        assert!(matches!(
            reader.verify(&handle),
            Err(SegmentError::Stale { .. })
        ));
    }

    #[test]
    fn test_commit_rejects_reserved_sequence() {
        let name = unique_segment_name();
        let mut writer = SharedSegment::create(&name, 8).unwrap();
        assert!(matches!(
            writer.commit(SEQUENCE_WRITING, 4),
            Err(SegmentError::InvalidSequence)
        ));
    }

    #[test]
    fn test_payload_too_large() {
        let name = unique_segment_name();
        let mut writer = SharedSegment::create(&name, 4).unwrap();
        assert!(matches!(
            writer.publish(1, &[0u8; 5]),
            Err(SegmentError::TooLarge { len: 5, capacity: 4 })
        ));
    }

    #[test]
    fn test_reader_cannot_write() {
        let name = unique_segment_name();
        let _writer = SharedSegment::create(&name, 4).unwrap();
        let mut reader = SharedSegment::open(&name).unwrap();
        assert!(matches!(reader.payload_mut(1), Err(SegmentError::ReadOnly)));
    }

    #[test]
    fn test_segment_unlinked_on_drop() {
        let name = unique_segment_name();
        drop(SharedSegment::create(&name, 4).unwrap());
        assert!(matches!(
            SharedSegment::open(&name),
            Err(SegmentError::Open(_))
        ));
    }

    #[test]
    fn test_invalid_name_rejected() {
        assert!(matches!(
            SharedSegment::create("no-leading-slash", 4),
            Err(SegmentError::InvalidName(_))
        ));
    }
}
