//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// The backend refused the request (permissions, size, quota).
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("invalid continuation token: {0}")]
    InvalidContinuationToken(String),

    #[error("listing not resumable: this backend does not support continuation tokens")]
    ListingNotResumable,
}

impl StorageError {
    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures and timeouts are transient; rejections, missing
    /// objects and invalid input are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
                    | std::io::ErrorKind::AlreadyExists
            ),
            Self::S3(_) | Self::Timeout(_) => true,
            Self::NotFound(_)
            | Self::Rejected(_)
            | Self::InvalidPath(_)
            | Self::InvalidKey(_)
            | Self::Config(_)
            | Self::InvalidContinuationToken(_)
            | Self::ListingNotResumable => false,
        }
    }
}

impl From<curator_core::Error> for StorageError {
    fn from(err: curator_core::Error) -> Self {
        Self::InvalidKey(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
