//! Error types shared across the terminal core
//!
//! Every remote call resolves to a `ServiceError` on failure; the
//! `kind()` classification drives the rollback-and-queue vs
//! rollback-and-surface decision in the mutation engine.

use thiserror::Error;

/// Recovery classification for a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout, connection refused, 5xx - safe to retry/queue
    Transient,
    /// 4xx-class rejection - retrying would fail identically
    Validation,
    /// Anything else (decode errors, local bugs)
    Other,
}

/// Error raised by a domain service client
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request exceeded its timeout budget
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Could not reach the service at all
    #[error("connection failed: {0}")]
    Connection(String),

    /// Service answered with a non-2xx status
    #[error("service rejected request ({status}): {message}")]
    Status { status: u16, message: String },

    /// Response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Classify this error per the recovery taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) | Self::Connection(_) => ErrorKind::Transient,
            Self::Status { status, .. } if *status >= 500 => ErrorKind::Transient,
            Self::Status { .. } => ErrorKind::Validation,
            Self::Decode(_) => ErrorKind::Other,
        }
    }

    /// True when rollback-and-queue is the right response
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Error raised by the persistent local store
///
/// Store failures are degraded-mode: callers log at WARN and drop the
/// write rather than propagating, since the store is itself used to
/// report failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record has no id field")]
    MissingId,
}

/// Result type for service calls
pub type ServiceResult<T> = Result<T, ServiceError>;
