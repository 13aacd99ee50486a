//! Error types for msgpipe.
//!
//! Only endpoint creation errors are fatal. Everything that can go wrong with
//! a single peer is handled inside the dispatch loop and only reported here so
//! it can be logged with a consistent shape.

use crate::address::Endpoint;
use thiserror::Error;

/// Main error type for msgpipe channels.
#[derive(Debug, Error)]
pub enum PipeError {
    // Creation errors
    #[error("Endpoint {endpoint} is already bound by another receiver")]
    BindConflict { endpoint: Endpoint },

    #[error("Failed to create endpoint {endpoint}: {source}")]
    CreationFailed {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    // Connection errors
    #[error("Peer connection lost: {source}")]
    ConnectionLost {
        #[source]
        source: std::io::Error,
    },

    #[error("Write to {endpoint} failed: {source}")]
    WriteFailure {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },

    // Validation errors
    #[error("Empty messages cannot be sent over a message-mode channel")]
    EmptyMessage,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for msgpipe operations.
pub type Result<T> = std::result::Result<T, PipeError>;

impl PipeError {
    /// True for the errors `Receiver::new` reports when the endpoint cannot
    /// be created.
    pub fn is_creation_error(&self) -> bool {
        matches!(
            self,
            PipeError::BindConflict { .. } | PipeError::CreationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::format_name;

    #[test]
    fn test_bind_conflict_is_creation_error() {
        let err = PipeError::BindConflict {
            endpoint: format_name("demo"),
        };
        assert!(err.is_creation_error());
        assert!(err.to_string().contains("msgpipe/demo"));
    }

    #[test]
    fn test_write_failure_keeps_errno() {
        let err = PipeError::WriteFailure {
            endpoint: format_name("demo"),
            source: nix::Error::ECONNREFUSED.into(),
        };
        assert!(!err.is_creation_error());
        match err {
            PipeError::WriteFailure { source, .. } => {
                assert_eq!(source.raw_os_error(), Some(nix::Error::ECONNREFUSED as i32));
            }
            other => panic!("Expected WriteFailure, got: {:?}", other),
        }
    }
}
