//! Error types for vstore

use thiserror::Error;

/// Result type alias
pub type StorageResult<T> = Result<T, StorageError>;

/// Main error type
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Name collision: {0}")]
    CollisionConflict(String),

    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    #[error("IO failure: {0}")]
    IoFailure(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    pub fn not_supported(operation: &str, path: &str) -> Self {
        StorageError::NotSupported(format!("{operation} on {path}"))
    }

    /// True for failures that may succeed if the caller tries again later.
    /// The storage layer itself never retries.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => StorageError::CollisionConflict(err.to_string()),
            _ => StorageError::Io(err),
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            StorageError::Cancelled
        } else {
            StorageError::IoFailure(format!("background task failed: {err}"))
        }
    }
}
