//! Upload admission middleware.

use super::ip::ClientIp;
use crate::services::rate_limiter::RateLimiter;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Reject the request with 429 once `ip` has used up its window.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    ClientIp(ip): ClientIp,
    req: Request,
    next: Next,
) -> Response {
    match limiter.admit(ip) {
        Ok(()) => next.run(req).await,
        Err(err) => {
            warn!(%ip, path = %req.uri().path(), "rate limit exceeded");
            err.into_response()
        }
    }
}
