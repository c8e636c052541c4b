//! Log ingestion and query endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::AppState;
use crate::error::{AppError, StoreError};
use crate::models::{IngestRequest, LogCreateResponse, LogView};

/// Query parameters for `GET /logs`
#[derive(Debug, Default, Deserialize)]
pub struct LogQueryParams {
    /// Service whose index is scanned (required)
    pub service: Option<String>,

    /// Inclusive lower bound on event time, RFC3339
    pub start: Option<String>,

    /// Inclusive upper bound on event time, RFC3339
    pub end: Option<String>,
}

fn parse_bound(value: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
    match value.filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| AppError::BadRequest(format!("Invalid {} time format", name))),
    }
}

/// POST /logs - Ingest a single log entry
///
/// Example body: `{"service_name": "auth", "timestamp": "2024-01-01T00:00:00Z", "message": "login ok"}`
pub async fn store_log(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LogCreateResponse>), AppError> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!(error = %e, "Rejected log body");
        AppError::BadRequest("Invalid request body".to_string())
    })?;

    let record = request
        .into_record()
        .ok_or_else(|| AppError::BadRequest("Missing required fields".to_string()))?;

    let id = state.store.put(&record).await.map_err(|e| match e {
        StoreError::InvalidRecord(msg) => AppError::BadRequest(msg),
        StoreError::Unavailable(_) => {
            AppError::StoreUnavailable("Failed to store log entry".to_string())
        }
    })?;

    Ok((StatusCode::CREATED, Json(LogCreateResponse::created(id))))
}

/// GET /logs - Query a service's logs by event time
///
/// Example: GET /logs?service=auth&start=2023-12-31T00:00:00Z&end=2024-01-02T00:00:00Z
pub async fn query_logs(
    State(state): State<AppState>,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<Vec<LogView>>, AppError> {
    let service = params
        .service
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Service name is required".to_string()))?;

    let start = parse_bound(params.start.as_deref(), "start")?;
    let end = parse_bound(params.end.as_deref(), "end")?;

    let logs = state
        .store
        .query(&service, start, end)
        .await
        .map_err(|_| AppError::StoreUnavailable("Failed to query logs".to_string()))?;

    Ok(Json(logs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_bound() {
        assert_eq!(parse_bound(None, "start").unwrap(), None);
        assert_eq!(parse_bound(Some(""), "start").unwrap(), None);
        assert_eq!(
            parse_bound(Some("2024-01-01T02:00:00+02:00"), "start").unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );

        let err = parse_bound(Some("2024-01-01"), "end").unwrap_err();
        assert_eq!(err.to_string(), "Bad request: Invalid end time format");
    }

    #[test]
    fn test_log_query_params_defaults() {
        let params: LogQueryParams = serde_json::from_str("{}").unwrap();
        assert!(params.service.is_none());
        assert!(params.start.is_none());
        assert!(params.end.is_none());
    }
}
