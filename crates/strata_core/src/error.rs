//! Error taxonomy shared by every layer of the connector.
//!
//! Three families matter operationally: configuration errors (synchronous,
//! never retried), RPC errors carrying a status code (retried unless the code
//! is in the permanent set), and transport failures (connection-level,
//! treated as retryable like `Unavailable`).

use std::fmt;

use thiserror::Error;

/// Convenience alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Status code space of the Store's RPC surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl ErrorCode {
    /// Permanent errors are surfaced immediately; everything else is retried
    /// with backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorCode::FailedPrecondition
                | ErrorCode::InvalidArgument
                | ErrorCode::PermissionDenied
                | ErrorCode::Unauthenticated
        )
    }

    /// Stable name used in service-call metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::OutOfRange => "OUT_OF_RANGE",
            ErrorCode::Unimplemented => "UNIMPLEMENTED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::DataLoss => "DATA_LOSS",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level connector error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid or contradictory configuration, including incomplete keys.
    /// Surfaced synchronously, before any RPC.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The Store answered an RPC with a non-OK status.
    #[error("store rpc failed ({code}): {message}")]
    Rpc { code: ErrorCode, message: String },

    /// Connection-level failure before a status was produced.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The statistics tables had no row for the requested scope. Callers
    /// fall back to the minimum split count; never fatal on the read path.
    #[error("store statistics unavailable: {0}")]
    StatisticsUnavailable(String),
}

impl StoreError {
    /// RPC error from a status code and message.
    pub fn rpc(code: ErrorCode, message: impl Into<String>) -> Self {
        StoreError::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Status code, when this error originated from an RPC.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            StoreError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Retry policy: RPC errors follow their code, transport failures are
    /// retryable, configuration and missing-statistics errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Rpc { code, .. } => code.is_retryable(),
            StoreError::Transport(_) => true,
            StoreError::Config(_) | StoreError::StatisticsUnavailable(_) => false,
        }
    }
}
