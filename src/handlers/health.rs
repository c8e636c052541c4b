use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{SecondsFormat, Utc};
use serde_json::json;

use super::AppState;
use crate::error::AppError;

/// Liveness endpoint
///
/// Returns 200 OK while the process is serving requests.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "UP",
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        })),
    )
}

/// Readiness endpoint
///
/// Returns 200 OK if the storage backend answers a ping, 503 otherwise.
pub async fn readiness_check(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.store.ping().await.map_err(|e| {
        tracing::warn!(error = %e, "Readiness check failed");
        AppError::NotReady("storage backend unreachable".to_string())
    })?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "service": "log-aggregator",
        })),
    ))
}
