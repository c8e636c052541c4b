use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single log message emitted by a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Assigned by the store on ingest when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub service_name: String,
    /// When the event happened, as reported by the service
    #[serde(rename = "timestamp")]
    pub event_time: DateTime<Utc>,
    pub message: String,
    /// Ingest time, set by the store when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl LogRecord {
    pub fn new(
        service_name: impl Into<String>,
        event_time: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            service_name: service_name.into(),
            event_time,
            message: message.into(),
            created_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Projection returned by range queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogView {
    #[serde(rename = "timestamp")]
    pub event_time: DateTime<Utc>,
    pub message: String,
}

/// Body of `POST /logs`
///
/// Every field is optional at the serde level so that missing fields are
/// reported as a validation failure instead of a JSON decoding failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default, alias = "event_time")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl IngestRequest {
    /// Convert into a record, returning `None` when a required field is
    /// missing or blank
    pub fn into_record(self) -> Option<LogRecord> {
        let service_name = self.service_name.filter(|s| !s.trim().is_empty())?;
        let event_time = self.timestamp?;
        let message = self.message.filter(|m| !m.is_empty())?;

        Some(LogRecord {
            id: self.id.filter(|id| !id.is_empty()),
            service_name,
            event_time,
            message,
            created_at: self.created_at,
        })
    }
}

/// Response for a successful ingest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogCreateResponse {
    pub status: String,
    pub message: String,
    pub id: String,
}

impl LogCreateResponse {
    pub fn created(id: String) -> Self {
        Self {
            status: "success".to_string(),
            message: "Log entry created".to_string(),
            id,
        }
    }
}
