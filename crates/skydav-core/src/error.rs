//! Error types for the cache and dispatch engine.
//!
//! [`CloudError`] is what callers of the facade see. It is `Clone` because a
//! coalesced fetch delivers the same result, error included, to every
//! waiter. Consistency violations are deliberately absent: those are
//! absorbed by clearing the cache, never surfaced.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by upstream calls and the engine around them.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// The upstream service answered with an error.
    #[error("Upstream request failed (status {status:?}): {message}")]
    Upstream {
        /// HTTP status, if the failure carried one.
        status: Option<u16>,
        /// Provider message.
        message: String,
    },

    /// A single attempt exceeded its time budget.
    #[error("Upstream request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend does not implement this capability.
    #[error("Operation not supported by this backend")]
    NotSupported,

    /// The session is shutting down.
    #[error("Operation cancelled")]
    Cancelled,

    /// The path cannot be represented upstream.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Transport-level failure.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
}

impl CloudError {
    /// An upstream failure with an HTTP status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        CloudError::Upstream {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Timeouts, connection errors, throttling, 5xx and 404 (a shard that
    /// does not hold the resource yet) are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Timeout(_) | CloudError::Io(_) => true,
            CloudError::Upstream {
                status: Some(status),
                ..
            } => *status == 404 || *status == 429 || (500..600).contains(status),
            CloudError::Upstream { status: None, .. }
            | CloudError::NotSupported
            | CloudError::Cancelled
            | CloudError::InvalidPath(_) => false,
        }
    }
}

impl From<io::Error> for CloudError {
    fn from(e: io::Error) -> Self {
        CloudError::Io(Arc::new(e))
    }
}

/// Result type for engine operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CloudError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(CloudError::status(503, "unavailable").is_transient());
        assert!(CloudError::status(404, "shard miss").is_transient());
        assert!(CloudError::status(429, "slow down").is_transient());
        assert!(CloudError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset")).is_transient());

        assert!(!CloudError::status(403, "forbidden").is_transient());
        assert!(!CloudError::NotSupported.is_transient());
        assert!(!CloudError::Cancelled.is_transient());
    }

    #[test]
    fn test_error_is_clone_and_displays() {
        let e = CloudError::status(500, "boom");
        let copy = e.clone();
        assert_eq!(e.to_string(), copy.to_string());
        assert!(e.to_string().contains("boom"));
    }
}
