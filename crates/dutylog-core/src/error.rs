//! Error types for dutylog core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Collaborator errors
    #[error("Subject directory error: {0}")]
    Directory(String),

    #[error("Export sink error: {0}")]
    Sink(String),

    // Input errors
    #[error("Invalid subject id: {0}")]
    InvalidSubject(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Database("connection refused".to_string());
        assert_eq!(err.to_string(), "Database error: connection refused");

        let err = Error::InvalidSubject("not-a-uuid".to_string());
        assert_eq!(err.to_string(), "Invalid subject id: not-a-uuid");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
