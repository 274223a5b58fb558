//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and the object store

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Key probed by readiness checks. A miss still proves the bucket is reachable.
const PROBE_KEY: &str = ".readyz";

/// `GET /healthz`
///
/// Liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// HTTP 200 when both stores answer, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let metadata = match state.metadata.ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => {
            warn!(error = %e, "metadata store not ready");
            CheckStatus::unavailable()
        }
    };
    let objects = match state.objects.head_exists(PROBE_KEY).await {
        Ok(_) => CheckStatus::ok(),
        Err(e) => {
            warn!(error = %e, "object store not ready");
            CheckStatus::unavailable()
        }
    };

    let overall_ok = metadata.ok && objects.ok;
    let checks = HashMap::from([("metadata", metadata), ("object_store", objects)]);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    /// Details stay in the log; the body only says the dependency is down.
    fn unavailable() -> Self {
        Self {
            ok: false,
            error: Some("unavailable".into()),
        }
    }
}
