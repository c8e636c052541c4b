use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Errors surfaced by the log store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable, or a batch/scan was rejected
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Record cannot be persisted as given
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Request body or query parameters rejected
    BadRequest(String),
    /// Storage backend failed
    StoreUnavailable(String),
    /// Storage backend not ready to serve
    NotReady(String),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Self::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Self::NotReady(msg) => write!(f, "Not ready: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::StoreUnavailable(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::NotReady(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::BadRequest(_) => "bad_request",
        AppError::StoreUnavailable(_) => "store_unavailable",
        AppError::NotReady(_) => "not_ready",
        AppError::InternalError(_) => "internal_error",
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::InvalidRecord(msg) => Self::BadRequest(msg),
        }
    }
}
