//! Common error types for the reconciliation gateway

use thiserror::Error;

/// Common result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the gateway crates
#[derive(Error, Debug)]
pub enum Error {
    /// Connection, timeout or non-success HTTP status from an upstream service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream service rejected the request with a rate-limit response
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Upstream response body could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors an upstream caller may recover from by retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Throttled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let err = Error::Throttled("HTTP 429".to_string());
        assert_eq!(err.to_string(), "Throttled: HTTP 429");

        let err = Error::Parse("unexpected end of document".to_string());
        assert!(err.to_string().starts_with("Parse error:"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transport("timeout".into()).is_transient());
        assert!(Error::Throttled("429".into()).is_transient());
        assert!(!Error::Parse("bad".into()).is_transient());
        assert!(!Error::Config("missing url".into()).is_transient());
    }
}
