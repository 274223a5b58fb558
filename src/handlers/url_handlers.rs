//! HTTP handlers for short URLs.

use crate::{
    errors::AppError,
    handlers::{REDACTED, credential},
    middleware::ip::ClientIp,
    models::url::UrlRecord,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct CreateUrlReq {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameSlugReq {
    pub new_slug: String,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|_| AppError::new(StatusCode::BAD_REQUEST, "Invalid request body"))
}

/// `POST /api/url`
pub async fn create_url(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    payload: Result<Json<CreateUrlReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let credential = credential(&headers)?;
    let req = body(payload)?;

    let short = state
        .slugs
        .allocate(&credential, &req.url, &ip.to_string())
        .await?;

    Ok(Json(json!({
        "status": StatusCode::OK.as_u16(),
        "message": "URL created successfully",
        "url": short.url,
        "slug": short.slug,
        "fullUrl": short.full_url,
    })))
}

/// `PUT /api/url/{slug}`
pub async fn rename_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<RenameSlugReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let credential = credential(&headers)?;
    let req = body(payload)?;

    let renamed = state
        .slugs
        .rename(&credential, &slug, &req.new_slug)
        .await?;

    Ok(Json(json!({
        "status": StatusCode::OK.as_u16(),
        "message": "Slug updated successfully",
        "slug": renamed.slug,
        "url": renamed.url,
    })))
}

/// `DELETE /api/delete-url/{slug}`
pub async fn delete_url(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let credential = credential(&headers)?;
    let removed = state.slugs.delete(&credential, &slug).await?;

    Ok(Json(json!({
        "status": StatusCode::OK.as_u16(),
        "message": "URL deleted successfully",
        "url": removed.url,
    })))
}

/// `GET /u/{slug}` - 302 to the target; counts as a click.
pub async fn redirect(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let target = state.slugs.resolve(&slug).await?;
    let location = HeaderValue::from_str(&target)
        .map_err(|_| AppError::internal("Stored URL cannot be redirected to"))?;

    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// `GET /api/urls` - the caller's short URLs, newest first.
pub async fn list_urls(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let credential = credential(&headers)?;
    let urls: Vec<UrlRecord> = state
        .slugs
        .list(&credential)
        .await?
        .into_iter()
        .map(|mut record| {
            record.api_key = REDACTED.to_string();
            record.ip = REDACTED.to_string();
            record
        })
        .collect();

    Ok(Json(json!({
        "status": StatusCode::OK.as_u16(),
        "urls": urls,
    })))
}
