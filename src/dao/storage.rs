use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The session document does not exist (never created or already deleted).
    #[error("session `{pin}` not found")]
    NotFound { pin: String },
    /// A live session already uses this PIN.
    #[error("session `{pin}` already exists")]
    Conflict { pin: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a not-found error for the given session PIN.
    pub fn not_found(pin: impl Into<String>) -> Self {
        StorageError::NotFound { pin: pin.into() }
    }

    /// Construct a conflict error for the given session PIN.
    pub fn conflict(pin: impl Into<String>) -> Self {
        StorageError::Conflict { pin: pin.into() }
    }
}
