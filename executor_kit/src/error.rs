//! Error type shared by every executor operation
//!
//! "Timed out" is deliberately absent: an expired wait is reported through
//! [`crate::executor::WaitOutcome::TimedOut`], not as an error.

use thiserror::Error;

/// Errors returned by executor operations
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The operation is not implemented for this platform
    #[error("operation '{op}' is not supported by this executor")]
    NotSupported { op: String },

    /// The caller's context was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's context deadline elapsed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The platform call backing the operation failed
    #[error("platform error: {0}")]
    Platform(String),

    /// I/O failure while talking to the platform
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An out-of-process executor exited with a non-reserved code
    #[error("command '{command}' failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// An out-of-process executor produced output that could not be decoded
    #[error("invalid executor output: {0}")]
    InvalidOutput(String),

    /// A caller supplied an argument the executor cannot act on
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ExecutorError {
    /// Build a `NotSupported` error for the named operation
    pub fn not_supported(op: impl Into<String>) -> Self {
        Self::NotSupported { op: op.into() }
    }

    /// Whether the caller may recover by choosing a different strategy
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    /// Whether the error came from the caller's context rather than the platform
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;
