use crate::{errors::AppError, handlers::credential, state::AppState};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct DisplayNameReq {
    pub display_name: String,
}

/// `PUT /api/account/display-name`
///
/// Also rewrites the display name stored on every upload the caller owns.
pub async fn update_display_name(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<DisplayNameReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let credential = credential(&headers)?;
    let Json(req) =
        payload.map_err(|_| AppError::new(StatusCode::BAD_REQUEST, "Invalid request body"))?;

    let updated = state
        .accounts
        .update_display_name(&credential, &req.display_name)
        .await?;

    Ok(Json(json!({
        "status": StatusCode::OK.as_u16(),
        "message": "Display name updated successfully",
        "updatedUploads": updated,
    })))
}

/// `GET /api/domains`
pub async fn list_domains(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let credential = credential(&headers)?;
    let domains = state.accounts.eligible_domains(&credential).await?;

    Ok(Json(json!({
        "status": StatusCode::OK.as_u16(),
        "domains": domains,
    })))
}
