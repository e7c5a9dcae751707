//! IPC request types (pipeline to worker).

use serde::{Deserialize, Serialize};

use crate::security::path_validation::{validate_output_path, PathError};
use crate::security::validation::ValidationError;
use crate::types::{EncodeFailure, EncodeJob};

/// IPC request from the pipeline to an encode worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Encode one hand-off into a PNG file
    Encode { job: EncodeJob },
    /// Ping for health check
    Ping,
    /// Finish the current job (if any) and exit
    Shutdown,
}

/// Reasons a request is rejected before any work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    Geometry(ValidationError),
    Path(PathError),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Geometry(e) => write!(f, "{}", e),
            RequestError::Path(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<ValidationError> for RequestError {
    fn from(e: ValidationError) -> Self {
        RequestError::Geometry(e)
    }
}

impl From<PathError> for RequestError {
    fn from(e: PathError) -> Self {
        RequestError::Path(e)
    }
}

impl From<RequestError> for EncodeFailure {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Geometry(e) => EncodeFailure::InvalidDimensions(e.to_string()),
            RequestError::Path(e) => EncodeFailure::InvalidPath(e.to_string()),
        }
    }
}

impl Request {
    /// Validate all parameters in this request.
    ///
    /// Returns Ok(()) if all parameters are valid, or an error describing
    /// the first invalid parameter found.
    pub fn validate(&self) -> Result<(), RequestError> {
        match self {
            Request::Encode { job } => {
                job.validate()?;
                validate_output_path(&job.output_path)?;
            }
            Request::Ping | Request::Shutdown => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Compression, RowOrder, SegmentHandle};

    fn encode_request(width: u32, output_path: std::path::PathBuf) -> Request {
        Request::Encode {
            job: EncodeJob {
                job_id: 9,
                segment: SegmentHandle {
                    name: "/framecap-t".to_string(),
                    sequence: 1,
                    len: 16,
                },
                width,
                height: 2,
                bytes_per_row: 8,
                row_order: RowOrder::BottomUp,
                compression: Compression::Fast,
                output_path,
            },
        }
    }

    #[test]
    fn test_request_wire_tag() {
        let json = serde_json::to_string(&Request::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn test_encode_request_valid() {
        let req = encode_request(2, std::env::temp_dir().join("ok.png"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_encode_request_bad_geometry() {
        let req = encode_request(0, std::env::temp_dir().join("ok.png"));
        let err = req.validate().unwrap_err();
        assert!(matches!(err, RequestError::Geometry(_)));
        assert!(matches!(
            EncodeFailure::from(err),
            EncodeFailure::InvalidDimensions(_)
        ));
    }

    #[test]
    fn test_encode_request_bad_path() {
        let req = encode_request(2, std::path::PathBuf::from("relative.png"));
        assert!(matches!(
            req.validate(),
            Err(RequestError::Path(PathError::NotAbsolute))
        ));
    }
}
