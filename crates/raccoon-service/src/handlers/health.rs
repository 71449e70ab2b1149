//! Health check handlers.
//!
//! - `/health`: Liveness probe - returns OK if the process is running
//! - `/ready`: Readiness probe - reports whether signing keys are loaded

use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Body of the `/ready` response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub key_count: usize,
    /// RFC 3339 timestamp of the last successful JWKS load.
    pub keys_refreshed_at: String,
}

/// Liveness probe handler.
///
/// Does not check any dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 while the current key set holds at least one key, 503 when it
/// is empty and no token could be accepted.
#[tracing::instrument(skip_all, name = "raccoon.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let key_set = state.validator.coordinator().store().current();

    let (status_code, status) = if key_set.is_empty() {
        tracing::warn!(target: "raccoon.health", "Readiness check failed: key set is empty");
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    } else {
        (StatusCode::OK, "ready")
    };

    (
        status_code,
        Json(ReadinessResponse {
            status,
            key_count: key_set.len(),
            keys_refreshed_at: key_set.refreshed_at().to_rfc3339(),
        }),
    )
}
