//! Defines routes for uploads, short URLs and account endpoints.
//!
//! ## Structure
//! - **Uploads**
//!   - `POST   /api/upload`              - multipart upload (rate limited per client IP)
//!   - `DELETE /api/delete-upload/{id}`  - delete an upload and its object
//!   - `GET    /api/uploads`             - caller's uploads
//!   - `GET    /i/{file}`                - file metadata, counts a view
//!
//! - **Short URLs**
//!   - `POST   /api/url`                 - create
//!   - `PUT    /api/url/{slug}`          - rename
//!   - `DELETE /api/delete-url/{slug}`   - delete
//!   - `GET    /api/urls`                - caller's URLs
//!   - `GET    /u/{slug}`                - redirect, counts a click
//!
//! - **Account**
//!   - `PUT    /api/account/display-name`
//!   - `GET    /api/domains`
//!
//! Every authenticated route reads the account key from the `key` header.

use crate::{
    errors::AppError,
    handlers::{
        account_handlers::{list_domains, update_display_name},
        health_handlers::{healthz, readyz},
        upload_handlers::{delete_upload, list_uploads, upload_file, view_upload},
        url_handlers::{create_url, delete_url, list_urls, redirect, rename_slug},
    },
    middleware::rate_limit::rate_limit_middleware,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the router for all API routes.
///
/// Only the upload route is rate limited and gets the large body limit.
pub fn routes(state: &AppState, max_upload_bytes: usize) -> Router<AppState> {
    let upload = Router::new()
        .route("/api/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(upload)
        .route("/api/delete-upload/{id}", delete(delete_upload))
        .route("/api/uploads", get(list_uploads))
        .route("/i/{file}", get(view_upload))
        .route("/api/url", post(create_url))
        .route("/api/url/{slug}", put(rename_slug))
        .route("/api/delete-url/{slug}", delete(delete_url))
        .route("/api/urls", get(list_urls))
        .route("/u/{slug}", get(redirect))
        .route("/api/account/display-name", put(update_display_name))
        .route("/api/domains", get(list_domains))
        .fallback(|| async { AppError::not_found("Content not found") })
}

/// The full application with state and the HTTP layers applied.
pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    routes(&state, max_upload_bytes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
