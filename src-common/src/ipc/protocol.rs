//! IPC message framing between the capture pipeline and its encode workers.
//!
//! Workers speak this protocol over their stdin/stdout pipes. Pixel data never
//! travels through it; jobs only carry a shared segment handle.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum IPC message size (64 KB). Jobs are small descriptors, so anything
/// bigger is a framing error.
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Error type for IPC operations.
#[derive(Debug)]
pub enum IpcError {
    /// I/O error during read/write
    Io(std::io::Error),
    /// Message exceeds maximum size
    MessageTooLarge { size: usize, max: usize },
    /// JSON parsing failed
    ParseError(String),
    /// Peer closed its end of the pipe
    ConnectionClosed,
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcError::Io(e) => write!(f, "I/O error: {}", e),
            IpcError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            IpcError::ParseError(e) => write!(f, "Parse error: {}", e),
            IpcError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for IpcError {}

impl From<std::io::Error> for IpcError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe => {
                IpcError::ConnectionClosed
            }
            _ => IpcError::Io(e),
        }
    }
}

/// Read a length-prefixed message with size validation.
///
/// Message format:
/// ```text
/// ┌──────────────────┬─────────────────────────────────┐
/// │ Length (4 bytes) │ JSON Payload (variable length)  │
/// │ Little-endian    │ Max 65,536 bytes                │
/// └──────────────────┴─────────────────────────────────┘
/// ```
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, IpcError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Validate size BEFORE allocating
    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed message and flush it.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), IpcError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and deserialize a JSON message.
pub async fn read_json<R: AsyncRead + Unpin, T: serde::de::DeserializeOwned>(
    reader: &mut R,
) -> Result<T, IpcError> {
    let data = read_message(reader).await?;
    serde_json::from_slice(&data).map_err(|e| IpcError::ParseError(e.to_string()))
}

/// Serialize and write a JSON message.
pub async fn write_json<W: AsyncWrite + Unpin, T: serde::Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), IpcError> {
    let data = serde_json::to_vec(value).map_err(|e| IpcError::ParseError(e.to_string()))?;
    write_message(writer, &data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{Request, Response};
    use std::io::Cursor;

    #[tokio::test]
    async fn test_message_roundtrip() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"hello worker").await.unwrap();
        assert_eq!(&buf[..4], &12u32.to_le_bytes());

        let mut cursor = Cursor::new(buf);
        let read = read_message(&mut cursor).await.unwrap();
        assert_eq!(read, b"hello worker");
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let oversized = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let mut buf = Vec::new();

        let result = write_message(&mut buf, &oversized).await;
        assert!(matches!(result, Err(IpcError::MessageTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected_before_read() {
        let prefix = ((MAX_MESSAGE_SIZE + 1) as u32).to_le_bytes();
        let mut cursor = Cursor::new(prefix.to_vec());
        let result = read_message(&mut cursor).await;
        assert!(matches!(result, Err(IpcError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_closed_connection() {
        let mut cursor = Cursor::new(vec![10u8, 0, 0, 0, b'{']);
        let result = read_message(&mut cursor).await;
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_json_messages_back_to_back() {
        let mut buf = Vec::new();
        write_json(&mut buf, &Request::Ping).await.unwrap();
        write_json(&mut buf, &Response::Received { job_id: 4 })
            .await
            .unwrap();

        let mut cursor = Cursor::new(buf);
        let first: Request = read_json(&mut cursor).await.unwrap();
        let second: Response = read_json(&mut cursor).await.unwrap();
        assert!(matches!(first, Request::Ping));
        assert!(matches!(second, Response::Received { job_id: 4 }));
    }

    #[tokio::test]
    async fn test_garbage_payload_is_parse_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"not json").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let result: Result<Request, _> = read_json(&mut cursor).await;
        assert!(matches!(result, Err(IpcError::ParseError(_))));
    }
}
