//! API error types.

use crate::ingest::IngestError;
use crate::retrieval::RetrievalError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
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

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Ingest(#[from] IngestError),

    #[error("{0}")]
    Retrieval(#[from] RetrievalError),

    #[error("storage error: {0}")]
    Storage(#[from] satchel_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] satchel_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] satchel_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Internal(_) => "internal_error",
            Self::Ingest(e) => e.reason(),
            Self::Retrieval(e) => match e {
                RetrievalError::NotFound => "not_found",
                RetrievalError::Storage(_) => "storage_error",
                RetrievalError::Index(_) => "metadata_error",
            },
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Ingest(e) => match e {
                IngestError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                IngestError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                IngestError::EmptyContent
                | IngestError::InvalidName(_)
                | IngestError::InvalidExpiry(_)
                | IngestError::SizeMismatch { .. }
                | IngestError::StreamInterrupted(_) => StatusCode::BAD_REQUEST,
                IngestError::StorageWriteFailed(_) | IngestError::IndexWriteFailed(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Retrieval(e) => match e {
                RetrievalError::NotFound => StatusCode::NOT_FOUND,
                RetrievalError::Storage(_) | RetrievalError::Index(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Storage(e) => match e {
                satchel_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                satchel_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                satchel_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
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

    #[test]
    fn test_ingest_status_mapping() {
        let cases = [
            (IngestError::EmptyContent, StatusCode::BAD_REQUEST),
            (
                IngestError::UnsupportedType("text/html".to_string()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                IngestError::TooLarge { limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                IngestError::InvalidExpiry("past".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                IngestError::StorageWriteFailed(satchel_storage::StorageError::Io(
                    std::io::Error::other("disk full"),
                )),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), status, "{api}");
        }
    }

    #[test]
    fn test_retrieval_not_found_hides_ownership() {
        let api = ApiError::from(RetrievalError::NotFound);
        assert_eq!(api.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(api.code(), "not_found");
    }
}
