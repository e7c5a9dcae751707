//! Shared types for the capture pipeline and its encode workers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::security::validation::{validate_dimensions, validate_row_layout, ValidationError};

/// Bytes per pixel of every frame moved through the pipeline (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// Dimensions of a render surface or captured frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Tightly packed row length in bytes.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Tightly packed frame length in bytes.
    pub fn byte_len(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Order in which rows arrive from the rendering backend.
///
/// OpenGL-style readback delivers the bottom row first; PNG files are always
/// written top row first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOrder {
    #[default]
    TopDown,
    BottomUp,
}

/// PNG compression effort requested from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Fast,
    Default,
    Best,
}

impl Compression {
    /// Convert from string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "default" => Some(Self::Default),
            "best" => Some(Self::Best),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Default => "default",
            Self::Best => "best",
        }
    }
}

/// Name of a shared pixel segment plus the write it refers to.
///
/// A handle only stays valid until the next write into the same segment; the
/// `sequence` lets the reader detect that it arrived too late.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHandle {
    /// OS-level name of the segment (resolvable from another process)
    pub name: String,
    /// Write sequence number stored in the segment header
    pub sequence: u64,
    /// Number of payload bytes written
    pub len: usize,
}

/// Everything a worker needs to turn one hand-off into a PNG file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeJob {
    pub job_id: u64,
    pub segment: SegmentHandle,
    pub width: u32,
    pub height: u32,
    /// Row stride inside the segment; may exceed `width * 4` when the
    /// backend pads rows for copy alignment.
    pub bytes_per_row: u32,
    #[serde(default)]
    pub row_order: RowOrder,
    #[serde(default)]
    pub compression: Compression,
    pub output_path: PathBuf,
}

/// Scratch file a PNG is written to before being renamed to `path`.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

impl EncodeJob {
    pub fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Validate the geometry of this job against its segment payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_dimensions(self.width, self.height)?;
        validate_row_layout(self.width, self.height, self.bytes_per_row, self.segment.len)?;
        Ok(())
    }
}

/// Failure reported by a worker for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum EncodeFailure {
    /// Writing the output file failed
    Io(String),
    /// Width/height/stride do not describe the payload
    InvalidDimensions(String),
    /// The PNG encoder rejected the data
    Encode(String),
    /// The shared segment could not be opened or was overwritten
    Segment(String),
    /// Output path was rejected
    InvalidPath(String),
}

impl std::fmt::Display for EncodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeFailure::Io(msg) => write!(f, "I/O error: {}", msg),
            EncodeFailure::InvalidDimensions(msg) => write!(f, "Invalid dimensions: {}", msg),
            EncodeFailure::Encode(msg) => write!(f, "Encode error: {}", msg),
            EncodeFailure::Segment(msg) => write!(f, "Segment error: {}", msg),
            EncodeFailure::InvalidPath(msg) => write!(f, "Invalid output path: {}", msg),
        }
    }
}

impl std::error::Error for EncodeFailure {}

/// Successful encode as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeReport {
    pub job_id: u64,
    pub path: PathBuf,
    pub bytes_written: u64,
    /// Time the worker spent encoding and writing, in microseconds
    pub encode_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(width: u32, height: u32, bytes_per_row: u32, len: usize) -> EncodeJob {
        EncodeJob {
            job_id: 1,
            segment: SegmentHandle {
                name: "/framecap-test".to_string(),
                sequence: 1,
                len,
            },
            width,
            height,
            bytes_per_row,
            row_order: RowOrder::TopDown,
            compression: Compression::Fast,
            output_path: PathBuf::from("/tmp/out.png"),
        }
    }

    #[test]
    fn test_frame_size_byte_len() {
        let size = FrameSize::new(800, 600);
        assert_eq!(size.row_bytes(), 3200);
        assert_eq!(size.byte_len(), 800 * 600 * 4);
        assert!(!size.is_empty());
        assert!(FrameSize::new(0, 600).is_empty());
    }

    #[test]
    fn test_job_validate_accepts_padded_rows() {
        // 10px wide rows padded to 256 bytes
        assert!(job(10, 4, 256, 256 * 4).validate().is_ok());
    }

    #[test]
    fn test_job_validate_rejects_short_payload() {
        assert!(job(10, 4, 40, 40 * 3).validate().is_err());
    }

    #[test]
    fn test_job_serializes_defaults() {
        let json = r#"{
            "job_id": 7,
            "segment": {"name": "/framecap-1", "sequence": 3, "len": 16},
            "width": 2, "height": 2, "bytes_per_row": 8,
            "output_path": "/tmp/a.png"
        }"#;
        let job: EncodeJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.row_order, RowOrder::TopDown);
        assert_eq!(job.compression, Compression::Fast);
    }

    #[test]
    fn test_encode_failure_wire_format() {
        let failure = EncodeFailure::Io("disk full".to_string());
        let json = serde_json::to_string(&failure).unwrap();
        assert_eq!(json, r#"{"kind":"io","message":"disk full"}"#);
    }

    #[test]
    fn test_partial_path_sits_next_to_output() {
        assert_eq!(
            partial_path(Path::new("/tmp/shots/a.png")),
            PathBuf::from("/tmp/shots/a.png.partial")
        );
    }
}
