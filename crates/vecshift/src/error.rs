//! Error types for vecshift.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by adapters, the checkpoint store and the orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration.
    #[error("config error: {0}")]
    Config(String),

    /// An adapter could not establish (or lost) its client/pool.
    #[error("connection error: {0}")]
    Connection(String),

    /// A source-side query failed.
    #[error("read error: {0}")]
    Read(String),

    /// A target-side upsert failed.
    #[error("write error: {0}")]
    Write(String),

    /// Post-migration count comparison failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Checkpoint file could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Connection("pool exhausted".to_string());
        assert_eq!(err.to_string(), "connection error: pool exhausted");

        let err = Error::Validation("source=10 target=9".to_string());
        assert!(err.to_string().starts_with("validation error"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
