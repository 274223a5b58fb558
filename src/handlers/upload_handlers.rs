//! HTTP handlers for file uploads.
//! The body is read fully before the upload pipeline starts, so the object store
//! always receives a complete payload with a known size.

use crate::{
    errors::AppError,
    handlers::{REDACTED, credential},
    middleware::ip::ClientIp,
    models::upload::UploadRecord,
    services::upload_service::UploadRequest,
    state::AppState,
};
use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use serde_json::json;
use tracing::debug;

/// Form field ShareX-style clients send the file in.
pub const FILE_FIELD: &str = "sharex";

/// `POST /api/upload`
///
/// Takes the `sharex` field, or failing that the first field that carries a filename.
pub async fn upload_file(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let credential = credential(&headers)?;
    let mut multipart =
        multipart.map_err(|_| AppError::new(StatusCode::BAD_REQUEST, "No file uploaded"))?;

    let (filename, content) = read_file_field(&mut multipart)
        .await?
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "No file uploaded"))?;

    let reference = state
        .uploads
        .upload(UploadRequest {
            credential,
            filename,
            content,
            source_ip: ip.to_string(),
        })
        .await?;

    Ok(Json(json!({
        "status": StatusCode::OK.as_u16(),
        "message": "File uploaded successfully",
        "id": reference.id,
        "url": reference.url,
        "fullUrl": reference.full_url,
    })))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Option<(String, Bytes)>, AppError> {
    let mut fallback = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let is_named = field.name() == Some(FILE_FIELD);
        let Some(filename) = field.file_name().map(str::to_string) else {
            debug!(field = ?field.name(), "skipping field without filename");
            continue;
        };
        if !is_named && fallback.is_some() {
            continue;
        }

        let content = field.bytes().await.map_err(multipart_error)?;
        if is_named {
            return Ok(Some((filename, content)));
        }
        fallback = Some((filename, content));
    }

    Ok(fallback)
}

fn multipart_error(err: MultipartError) -> AppError {
    let status = err.status();
    debug!(error = %err, "multipart read failed");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(status, "File too large")
    } else {
        AppError::new(StatusCode::BAD_REQUEST, "Invalid multipart data")
    }
}

/// `DELETE /api/delete-upload/{id}`
pub async fn delete_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let credential = credential(&headers)?;
    state.uploads.delete_upload(&credential, &id).await?;

    Ok(Json(json!({
        "status": StatusCode::OK.as_u16(),
        "message": "Upload deleted successfully",
    })))
}

/// `GET /i/{file}` - metadata for a stored file; counts as a view.
pub async fn view_upload(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.uploads.view(&file).await?;
    let object_url = state
        .public_base_url
        .as_ref()
        .map(|base| format!("{}/{}", base, record.file_name));

    Ok(Json(json!({
        "status": StatusCode::OK.as_u16(),
        "id": record.public_id(),
        "fileName": record.file_name,
        "fileType": record.file_type,
        "fileSize": record.file_size,
        "displayName": record.display_name,
        "views": record.views,
        "uploadDate": record.upload_date,
        "objectUrl": object_url,
    })))
}

/// `GET /api/uploads` - the caller's uploads, newest first.
pub async fn list_uploads(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let credential = credential(&headers)?;
    let uploads: Vec<UploadRecord> = state
        .uploads
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
        "uploads": uploads,
    })))
}
