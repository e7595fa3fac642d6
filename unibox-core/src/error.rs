//! Error types for unibox

use thiserror::Error;

/// The main error type for unibox operations
///
/// The first five variants form the delivery-pipeline taxonomy: only
/// `Transient` failures are ever retried; everything else fails fast.
#[derive(Error, Debug)]
pub enum Error {
    /// Recoverable failures (network, 5xx, rate limiting)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Non-recoverable failures (validation, auth, other 4xx)
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Unknown job/schedule/outbox-entry id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate submission or invalid state transition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Offline storage over its configured limit
    #[error("Quota exceeded: {0}")]
    Quota(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for unibox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    NotFound,
    Conflict,
    Quota,
    Other,
}

impl Error {
    /// Classify this error for retry decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transient(_) | Error::Io(_) => ErrorKind::Transient,
            Error::Permanent(_) => ErrorKind::Permanent,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Quota(_) => ErrorKind::Quota,
            _ => ErrorKind::Other,
        }
    }

    /// Whether the pipeline may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::Transient("timeout".into()).is_retryable());
        assert!(!Error::Permanent("bad request".into()).is_retryable());
        assert!(!Error::NotFound("job".into()).is_retryable());
        assert!(!Error::Conflict("already dispatched".into()).is_retryable());
        assert!(!Error::Quota("outbox full".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Conflict("cancel after dispatch".to_string());
        assert_eq!(err.to_string(), "Conflict: cancel after dispatch");

        let err = Error::NotFound("job 42".to_string());
        assert_eq!(err.to_string(), "Not found: job 42");
    }
}
