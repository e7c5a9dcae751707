//! IPC response types (worker to pipeline).

use serde::{Deserialize, Serialize};

use crate::types::{EncodeFailure, EncodeReport};

/// IPC response from an encode worker.
///
/// For every `Encode` request a worker sends either `Received` followed by
/// `Encoded`/`Failed`, or a single `Failed` when the segment could not be
/// read at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Worker started and is waiting for jobs
    Ready { pid: u32 },
    /// Pixels were copied out of the shared segment; the segment may be reused
    Received { job_id: u64 },
    /// PNG written
    Encoded(EncodeReport),
    /// Job failed; no output file exists
    Failed { job_id: u64, error: EncodeFailure },
    /// Pong response to ping
    Pong,
    /// Request could not be understood
    Error { message: String },
}

impl Response {
    /// Job this response refers to, if any.
    pub fn job_id(&self) -> Option<u64> {
        match self {
            Response::Received { job_id } | Response::Failed { job_id, .. } => Some(*job_id),
            Response::Encoded(report) => Some(report.job_id),
            Response::Ready { .. } | Response::Pong | Response::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_encoded_wire_format() {
        let response = Response::Encoded(EncodeReport {
            job_id: 3,
            path: PathBuf::from("/tmp/a.png"),
            bytes_written: 120,
            encode_us: 900,
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "encoded");
        assert_eq!(json["job_id"], 3);
        assert_eq!(response.job_id(), Some(3));
    }

    #[test]
    fn test_failed_roundtrip() {
        let response = Response::Failed {
            job_id: 5,
            error: EncodeFailure::Segment("stale handle".to_string()),
        };
        let json = serde_json::to_string(&response).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        match parsed {
            Response::Failed { job_id, error } => {
                assert_eq!(job_id, 5);
                assert_eq!(error, EncodeFailure::Segment("stale handle".to_string()));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_job_id_absent_for_control_messages() {
        assert_eq!(Response::Pong.job_id(), None);
        assert_eq!(Response::Ready { pid: 1 }.job_id(), None);
    }
}
