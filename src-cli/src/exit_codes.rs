//! Exit codes for the CLI.
//!
//! These codes enable scripting integration by providing structured
//! feedback about operation results.

/// Exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Operation completed successfully
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Invalid command-line arguments or configuration
    InvalidArguments = 2,
    /// No encode worker could be started
    EncoderUnavailable = 3,
    /// The capture pipeline could not be set up
    PipelineFailed = 4,
    /// At least one capture failed
    CaptureFailed = 5,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Success => write!(f, "success"),
            ExitCode::GeneralError => write!(f, "general error"),
            ExitCode::InvalidArguments => write!(f, "invalid arguments"),
            ExitCode::EncoderUnavailable => write!(f, "encoder unavailable"),
            ExitCode::PipelineFailed => write!(f, "pipeline failed"),
            ExitCode::CaptureFailed => write!(f, "capture failed"),
        }
    }
}
