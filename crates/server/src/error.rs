//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tessera_client::ClientError;
use tessera_storage::StorageError;

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

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] tessera_core::Error),

    #[error("upstream error: {0}")]
    Upstream(#[from] ClientError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Storage(e) if e.is_not_found() => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Core(_) => "core_error",
            Self::Upstream(ClientError::Unavailable(_) | ClientError::Timeout(_)) => "unavailable",
            Self::Upstream(_) => "upstream_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::NotFound(_) | StorageError::NoSuchChunk { .. } => {
                    StatusCode::NOT_FOUND
                }
                StorageError::InvalidPath(_) => StatusCode::BAD_REQUEST,
                StorageError::Core(core) if core.is_bad_request() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(e) if e.is_bad_request() => StatusCode::BAD_REQUEST,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(e) => match e {
                ClientError::Status { status, .. } => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                ClientError::Unavailable(_) | ClientError::Timeout(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
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
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Storage(StorageError::NoSuchChunk {
                path: "a".to_string(),
                nchunk: 3,
                nchunks: 1
            })
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Core(tessera_core::Error::UnsupportedStep("2".to_string())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Upstream(ClientError::Status {
                status: 404,
                body: String::new()
            })
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Upstream(ClientError::Unavailable("refused".to_string())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Upstream(ClientError::Decode("junk".to_string())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Storage(StorageError::Codec("bad".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(ApiError::NotFound("x".to_string()).code(), "not_found");
        assert_eq!(
            ApiError::Storage(StorageError::NotFound("x".to_string())).code(),
            "not_found"
        );
        assert_eq!(
            ApiError::Upstream(ClientError::Timeout(std::time::Duration::from_secs(1))).code(),
            "unavailable"
        );
    }
}
