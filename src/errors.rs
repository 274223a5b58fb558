use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after_seconds: Option<u64>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            retry_after_seconds: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "status": self.status.as_u16(),
            "message": self.message,
        });
        if let Some(secs) = self.retry_after_seconds {
            body["retry_after_seconds"] = json!(secs);
        }

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_seconds {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Failure kinds surfaced by the upload orchestrator and slug allocator.
///
/// Raw store errors never cross this boundary; they are logged where they occur and
/// translated into one of these kinds.
#[derive(Debug, Error, PartialEq)]
pub enum ServiceError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("object store write failed")]
    StorageWriteFailed,
    #[error("object store did not confirm the write")]
    StorageVerificationFailed,
    /// Metadata was removed but the object could not be confirmed gone.
    #[error("delete left an orphaned object")]
    DeleteError,
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthorized(msg) => AppError::new(StatusCode::UNAUTHORIZED, msg),
            ServiceError::Forbidden(msg) => AppError::new(StatusCode::FORBIDDEN, msg),
            ServiceError::NotFound(msg) => AppError::not_found(msg),
            ServiceError::Conflict(msg) => AppError::new(StatusCode::CONFLICT, msg),
            ServiceError::BadRequest(msg) => AppError::new(StatusCode::BAD_REQUEST, msg),
            ServiceError::StorageWriteFailed => AppError::internal("Failed to upload the file"),
            ServiceError::StorageVerificationFailed => {
                AppError::internal("Failed to verify the file upload")
            }
            ServiceError::DeleteError => AppError::internal("Error deleting upload"),
            ServiceError::RateLimited {
                retry_after_seconds,
            } => AppError {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: format!(
                    "Rate limit exceeded. Please wait {} seconds before uploading again.",
                    retry_after_seconds
                ),
                retry_after_seconds: Some(retry_after_seconds),
            },
            ServiceError::Internal(msg) => AppError::internal(msg),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "unhandled error");
        AppError::internal("Internal server error")
    }
}
