//! Headless CPU backend.
//!
//! Emulates a GPU readback path on a plain framebuffer: reads complete after a
//! configurable number of map attempts, rows can come back bottom-up and
//! padded like a real driver would deliver them, and context loss can be
//! injected. Used by the CLI demo and the pipeline tests.

use std::collections::HashMap;

use framecap_common::{FrameSize, RowOrder, BYTES_PER_PIXEL};

use super::{BackendError, MapStatus, MappedFrame, ReadbackBackend, TransferBufferId};

struct SoftBuffer {
    data: Vec<u8>,
    /// Bytes of the last issued read, 0 if nothing was issued
    frame_len: usize,
    bytes_per_row: u32,
    /// Map attempts left before the read counts as complete
    polls_remaining: u32,
    mapped: bool,
}

/// Counters exposed for tests and the demo report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    pub reads_issued: u64,
    pub maps_pending: u64,
    pub maps_ready: u64,
    pub blocking_reads: u64,
    pub buffers_allocated: u64,
    pub buffers_freed: u64,
}

pub struct SoftwareBackend {
    size: FrameSize,
    /// Top-down, tightly packed RGBA
    framebuffer: Vec<u8>,
    row_order: RowOrder,
    row_alignment: u32,
    latency_polls: u32,
    context_lost: bool,
    buffers: HashMap<u64, SoftBuffer>,
    next_buffer: u64,
    stats: SoftwareStats,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let size = FrameSize::new(width, height);
        Self {
            size,
            framebuffer: vec![0; size.byte_len()],
            row_order: RowOrder::TopDown,
            row_alignment: 1,
            latency_polls: 0,
            context_lost: false,
            buffers: HashMap::new(),
            next_buffer: 1,
            stats: SoftwareStats::default(),
        }
    }

    /// Deliver rows bottom row first, like `glReadPixels`.
    pub fn with_row_order(mut self, order: RowOrder) -> Self {
        self.row_order = order;
        self
    }

    /// Pad every row to a multiple of `alignment` bytes.
    pub fn with_row_alignment(mut self, alignment: u32) -> Self {
        self.row_alignment = alignment.max(1);
        self
    }

    /// Number of `try_map` calls that report `Pending` before a read completes.
    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency_polls = polls;
        self
    }

    pub fn set_latency(&mut self, polls: u32) {
        self.latency_polls = polls;
    }

    pub fn stats(&self) -> SoftwareStats {
        self.stats
    }

    /// Number of live transfer buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Change the surface size. Outstanding reads keep their old contents.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = FrameSize::new(width, height);
        self.framebuffer = vec![0; self.size.byte_len()];
    }

    /// Simulate a lost context: every buffer becomes unusable.
    pub fn lose_context(&mut self) {
        self.context_lost = true;
    }

    pub fn restore_context(&mut self) {
        self.context_lost = false;
    }

    /// Fill the whole framebuffer with one colour.
    pub fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.framebuffer.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Render by evaluating `shader` for every pixel (top-left origin).
    pub fn draw_with<F>(&mut self, mut shader: F)
    where
        F: FnMut(u32, u32) -> [u8; 4],
    {
        let width = self.size.width as usize;
        for (i, px) in self.framebuffer.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let x = (i % width) as u32;
            let y = (i / width) as u32;
            px.copy_from_slice(&shader(x, y));
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.size.width as usize + x as usize) * BYTES_PER_PIXEL;
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.framebuffer[offset..offset + BYTES_PER_PIXEL]);
        out
    }

    /// Copy the framebuffer into `dst` using this backend's layout.
    fn copy_frame(&self, dst: &mut [u8], stride: usize) {
        let row_bytes = self.size.row_bytes();
        let height = self.size.height as usize;
        for row in 0..height {
            let src_row = match self.row_order {
                RowOrder::TopDown => row,
                RowOrder::BottomUp => height - 1 - row,
            };
            let src = &self.framebuffer[src_row * row_bytes..(src_row + 1) * row_bytes];
            dst[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }
    }
}

impl ReadbackBackend for SoftwareBackend {
    fn surface_size(&self) -> FrameSize {
        self.size
    }

    fn row_order(&self) -> RowOrder {
        self.row_order
    }

    fn bytes_per_row(&self, width: u32) -> u32 {
        let packed = width * BYTES_PER_PIXEL as u32;
        packed.div_ceil(self.row_alignment) * self.row_alignment
    }

    fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    fn allocate_transfer_buffer(
        &mut self,
        byte_len: usize,
    ) -> Result<TransferBufferId, BackendError> {
        if self.context_lost {
            return Err(BackendError::ContextLost);
        }
        let id = self.next_buffer;
        self.next_buffer += 1;
        self.buffers.insert(
            id,
            SoftBuffer {
                data: vec![0; byte_len],
                frame_len: 0,
                bytes_per_row: 0,
                polls_remaining: 0,
                mapped: false,
            },
        );
        self.stats.buffers_allocated += 1;
        Ok(TransferBufferId(id))
    }

    fn free_transfer_buffer(&mut self, id: TransferBufferId) {
        if self.buffers.remove(&id.0).is_some() {
            self.stats.buffers_freed += 1;
        }
    }

    fn issue_async_read(&mut self, id: TransferBufferId) -> Result<(), BackendError> {
        if self.context_lost {
            return Err(BackendError::ContextLost);
        }
        let stride = self.bytes_per_row(self.size.width) as usize;
        let needed = stride * self.size.height as usize;
        let latency = self.latency_polls;

        // Take the buffer out so the framebuffer can be borrowed alongside it.
        let mut buffer = self
            .buffers
            .remove(&id.0)
            .ok_or(BackendError::UnknownBuffer(id))?;
        if buffer.data.len() < needed {
            let capacity = buffer.data.len();
            self.buffers.insert(id.0, buffer);
            return Err(BackendError::BufferTooSmall { needed, capacity });
        }

        self.copy_frame(&mut buffer.data[..needed], stride);
        buffer.frame_len = needed;
        buffer.bytes_per_row = stride as u32;
        buffer.polls_remaining = latency;
        buffer.mapped = false;
        self.buffers.insert(id.0, buffer);
        self.stats.reads_issued += 1;
        Ok(())
    }

    fn try_map(&mut self, id: TransferBufferId) -> Result<MapStatus<'_>, BackendError> {
        if self.context_lost {
            return Err(BackendError::ContextLost);
        }
        let buffer = self
            .buffers
            .get_mut(&id.0)
            .ok_or(BackendError::UnknownBuffer(id))?;
        if buffer.frame_len == 0 {
            return Err(BackendError::NothingIssued(id));
        }
        if buffer.polls_remaining > 0 {
            buffer.polls_remaining -= 1;
            self.stats.maps_pending += 1;
            return Ok(MapStatus::Pending);
        }
        buffer.mapped = true;
        self.stats.maps_ready += 1;
        Ok(MapStatus::Ready(MappedFrame {
            data: &buffer.data[..buffer.frame_len],
            bytes_per_row: buffer.bytes_per_row,
        }))
    }

    fn unmap(&mut self, id: TransferBufferId) {
        if let Some(buffer) = self.buffers.get_mut(&id.0) {
            buffer.mapped = false;
        }
    }

    fn read_blocking_into(&mut self, dst: &mut [u8]) -> Result<u32, BackendError> {
        if self.context_lost {
            return Err(BackendError::ContextLost);
        }
        let stride = self.bytes_per_row(self.size.width) as usize;
        let needed = stride * self.size.height as usize;
        if dst.len() < needed {
            return Err(BackendError::BufferTooSmall {
                needed,
                capacity: dst.len(),
            });
        }
        self.copy_frame(&mut dst[..needed], stride);
        self.stats.blocking_reads += 1;
        Ok(stride as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_marker(_x: u32, y: u32) -> [u8; 4] {
        [y as u8, 0, 0, 255]
    }

    #[test]
    fn test_read_completes_after_latency() {
        let mut backend = SoftwareBackend::new(4, 2).with_latency(2);
        let id = backend.allocate_transfer_buffer(32).unwrap();
        backend.issue_async_read(id).unwrap();

        assert!(matches!(backend.try_map(id), Ok(MapStatus::Pending)));
        assert!(matches!(backend.try_map(id), Ok(MapStatus::Pending)));
        assert!(matches!(backend.try_map(id), Ok(MapStatus::Ready(_))));
        assert_eq!(backend.stats().maps_pending, 2);
    }

    #[test]
    fn test_bottom_up_rows() {
        let mut backend = SoftwareBackend::new(2, 3).with_row_order(RowOrder::BottomUp);
        backend.draw_with(row_marker);
        let id = backend.allocate_transfer_buffer(24).unwrap();
        backend.issue_async_read(id).unwrap();

        match backend.try_map(id).unwrap() {
            MapStatus::Ready(frame) => {
                assert_eq!(frame.bytes_per_row, 8);
                // First delivered row is the bottom one
                assert_eq!(frame.data[0], 2);
                assert_eq!(frame.data[16], 0);
            }
            MapStatus::Pending => panic!("expected ready"),
        }
    }

    #[test]
    fn test_row_padding() {
        let mut backend = SoftwareBackend::new(3, 2).with_row_alignment(256);
        assert_eq!(backend.bytes_per_row(3), 256);
        assert_eq!(backend.transfer_len(FrameSize::new(3, 2)), 512);

        let mut dst = vec![0u8; 512];
        backend.clear([9, 9, 9, 9]);
        assert_eq!(backend.read_blocking_into(&mut dst).unwrap(), 256);
        assert_eq!(&dst[..12], &[9; 12]);
        assert_eq!(dst[12], 0);
        assert_eq!(&dst[256..268], &[9; 12]);
    }

    #[test]
    fn test_buffer_too_small() {
        let mut backend = SoftwareBackend::new(8, 8);
        let id = backend.allocate_transfer_buffer(16).unwrap();
        assert!(matches!(
            backend.issue_async_read(id),
            Err(BackendError::BufferTooSmall { .. })
        ));
        // The buffer survives the failed read
        assert_eq!(backend.buffer_count(), 1);
    }

    #[test]
    fn test_context_loss() {
        let mut backend = SoftwareBackend::new(2, 2);
        let id = backend.allocate_transfer_buffer(16).unwrap();
        backend.issue_async_read(id).unwrap();
        backend.lose_context();
        assert!(matches!(backend.try_map(id), Err(BackendError::ContextLost)));
        assert!(backend.is_context_lost());
    }

    #[test]
    fn test_map_without_issue() {
        let mut backend = SoftwareBackend::new(2, 2);
        let id = backend.allocate_transfer_buffer(16).unwrap();
        assert!(matches!(
            backend.try_map(id),
            Err(BackendError::NothingIssued(_))
        ));
    }
}
