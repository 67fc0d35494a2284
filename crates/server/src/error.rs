//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use curator_lifecycle::LifecycleError;
use curator_metadata::MetadataError;
use curator_storage::StorageError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    SweepInProgress(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("{0}")]
    LinkFailed(String),

    #[error("request cancelled: {0}")]
    Unavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("{0}")]
    Core(#[from] curator_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::SweepInProgress(_) => "sweep_in_progress",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::UploadFailed(_) => "upload_failed",
            Self::LinkFailed(_) => "link_failed",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
            Self::Storage(StorageError::NotFound(_)) => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Metadata(MetadataError::NotFound(_)) => "not_found",
            Self::Metadata(
                MetadataError::AlreadyExists(_)
                | MetadataError::Constraint(_)
                | MetadataError::Conflict(_),
            ) => "conflict",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "bad_request",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) | Self::SweepInProgress(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UploadFailed(_) => StatusCode::BAD_GATEWAY,
            Self::LinkFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::InvalidKey(_) | StorageError::InvalidPath(_) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                MetadataError::Constraint(_) => StatusCode::CONFLICT,
                MetadataError::Conflict(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidTarget(msg) => Self::BadRequest(msg),
            e @ LifecycleError::ReferenceMismatch { .. } => Self::Conflict(e.to_string()),
            e @ LifecycleError::SweepInProgress { .. } => Self::SweepInProgress(e.to_string()),
            LifecycleError::UploadFailed(e) => Self::UploadFailed(e.to_string()),
            e @ LifecycleError::LinkFailed { .. } => Self::LinkFailed(e.to_string()),
            // Handlers that can see a partial report render it themselves.
            e @ LifecycleError::PartialSweepFailure { .. } => Self::Internal(e.to_string()),
            e @ LifecycleError::Cancelled => Self::Unavailable(e.to_string()),
            e @ LifecycleError::Timeout(_) => Self::Timeout(e.to_string()),
            LifecycleError::Storage(e) => Self::Storage(e),
            LifecycleError::Metadata(e) => Self::Metadata(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use curator_core::{AssetKey, Namespace};

    #[test]
    fn test_lifecycle_errors_keep_stable_codes() {
        let ns = Namespace::new("gallery").unwrap();
        let err: ApiError = LifecycleError::SweepInProgress { namespace: ns }.into();
        assert_eq!(err.code(), "sweep_in_progress");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err: ApiError =
            LifecycleError::UploadFailed(StorageError::Rejected("quota".to_string())).into();
        assert_eq!(err.code(), "upload_failed");

        let err: ApiError = LifecycleError::LinkFailed {
            key: AssetKey::parse("logos/new.png").unwrap(),
            source: MetadataError::Internal("down".to_string()),
        }
        .into();
        assert_eq!(err.code(), "link_failed");
        assert!(err.to_string().contains("logos/new.png"));

        let err: ApiError = LifecycleError::InvalidTarget("bad slot".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_storage_error_maps_to_404() {
        let err = ApiError::Storage(StorageError::NotFound("gallery/a.jpg".to_string()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "not_found");
    }
}
