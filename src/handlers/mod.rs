pub mod account_handlers;
pub mod health_handlers;
pub mod upload_handlers;
pub mod url_handlers;

use crate::errors::AppError;
use axum::http::{HeaderMap, StatusCode};

/// Header uploader clients send their account key in.
pub const KEY_HEADER: &str = "key";

/// Redaction marker for fields never returned in listings.
pub const REDACTED: &str = "[Redacted]";

/// Read the caller's credential from the `key` header.
pub fn credential(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "API key is required"))
}
