//! Log record persistence and per-service time-range queries

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{KvBackend, ScoreBound, WriteOp};
use crate::error::StoreError;
use crate::metrics;
use crate::models::{LogRecord, LogView};

const FIELD_ID: &str = "id";
const FIELD_SERVICE_NAME: &str = "service_name";
const FIELD_TIMESTAMP: &str = "timestamp";
const FIELD_MESSAGE: &str = "message";
const FIELD_CREATED_AT: &str = "created_at";

/// Key of the hash holding a record
pub fn record_key(id: &str) -> String {
    format!("log:{}", id)
}

/// Key of the sorted set indexing a service's records by event time
pub fn index_key(service_name: &str) -> String {
    format!("service:{}", service_name)
}

/// Index score of an event time: nanoseconds since the Unix epoch
///
/// `None` outside roughly 1677-09-21 ..= 2262-04-11, where the value does not
/// fit in an `i64`.
pub fn event_score(event_time: &DateTime<Utc>) -> Option<i64> {
    event_time.timestamp_nanos_opt()
}

/// Lower query bound in the score domain; times before the representable
/// range admit everything below
fn lower_bound(from: Option<DateTime<Utc>>) -> ScoreBound {
    match from {
        None => ScoreBound::Unbounded,
        Some(t) => match event_score(&t) {
            Some(score) => ScoreBound::Inclusive(score),
            None if t.timestamp() < 0 => ScoreBound::Unbounded,
            None => ScoreBound::Inclusive(i64::MAX),
        },
    }
}

/// Upper query bound in the score domain; times past the representable range
/// admit everything above
fn upper_bound(to: Option<DateTime<Utc>>) -> ScoreBound {
    match to {
        None => ScoreBound::Unbounded,
        Some(t) => match event_score(&t) {
            Some(score) => ScoreBound::Inclusive(score),
            None if t.timestamp() > 0 => ScoreBound::Unbounded,
            None => ScoreBound::Inclusive(i64::MIN),
        },
    }
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Field map written to the record hash
pub fn encode_fields(
    id: &str,
    record: &LogRecord,
    created_at: &DateTime<Utc>,
) -> Vec<(String, String)> {
    vec![
        (FIELD_ID.to_string(), id.to_string()),
        (FIELD_SERVICE_NAME.to_string(), record.service_name.clone()),
        (FIELD_TIMESTAMP.to_string(), format_time(&record.event_time)),
        (FIELD_MESSAGE.to_string(), record.message.clone()),
        (FIELD_CREATED_AT.to_string(), format_time(created_at)),
    ]
}

/// Rebuild the query projection from a record hash
///
/// Returns `None` for an empty hash or a missing/unparsable event time.
pub fn decode_fields(fields: &HashMap<String, String>) -> Option<LogView> {
    let event_time = parse_time(fields.get(FIELD_TIMESTAMP)?)?;
    let message = fields.get(FIELD_MESSAGE)?.clone();
    Some(LogView {
        event_time,
        message,
    })
}

/// Log storage on top of a key-value backend
///
/// Each record lives in its own hash and is indexed in a per-service sorted
/// set scored by event time. Both keys expire after `retention`.
#[derive(Clone)]
pub struct LogStore {
    backend: Arc<dyn KvBackend>,
    retention: Duration,
}

impl LogStore {
    pub fn new(backend: Arc<dyn KvBackend>, retention: Duration) -> Self {
        Self { backend, retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Persist a record together with its index entry
    ///
    /// Generates an id and an ingest time when the record has none. The hash
    /// write, the index insert and both expiries go out as one atomic batch.
    pub async fn put(&self, record: &LogRecord) -> Result<String, StoreError> {
        let score = event_score(&record.event_time).ok_or_else(|| {
            StoreError::InvalidRecord(format!(
                "event time {} is outside the indexable range",
                record.event_time
            ))
        })?;

        let id = match record.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let created_at = record.created_at.unwrap_or_else(Utc::now);

        let record_key = record_key(&id);
        let index_key = index_key(&record.service_name);

        let ops = vec![
            WriteOp::SetFields {
                key: record_key.clone(),
                fields: encode_fields(&id, record, &created_at),
            },
            WriteOp::Expire {
                key: record_key,
                ttl: self.retention,
            },
            WriteOp::SortedAdd {
                key: index_key.clone(),
                member: id.clone(),
                score,
            },
            WriteOp::Expire {
                key: index_key,
                ttl: self.retention,
            },
        ];

        if let Err(e) = self.backend.execute_atomic(ops).await {
            error!(
                service = %record.service_name,
                id = %id,
                error = %e,
                "Failed to store log"
            );
            metrics::record_store_error("put");
            metrics::record_ingest("error");
            return Err(match e {
                StoreError::Unavailable(msg) => {
                    StoreError::Unavailable(format!("failed to store log: {}", msg))
                }
                other => other,
            });
        }

        debug!(service = %record.service_name, id = %id, "Stored log");
        metrics::record_ingest("success");

        Ok(id)
    }

    /// Records of `service_name` with event time in `[from, to]`, oldest first
    ///
    /// Missing bounds are open. Index members whose record has expired,
    /// cannot be fetched or does not decode are left out.
    ///
    /// Index scores are doubles on the server, so event times a few hundred
    /// nanoseconds apart can share a score and straddle a bound. Bounds and
    /// order are therefore re-applied on the decoded event times.
    pub async fn query(
        &self,
        service_name: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogView>, StoreError> {
        let start = Instant::now();
        let result = self.query_inner(service_name, from, to).await;

        match &result {
            Ok(_) => metrics::record_query("success", start.elapsed()),
            Err(e) => {
                error!(service = %service_name, error = %e, "Failed to query logs");
                metrics::record_store_error("query");
                metrics::record_query("error", start.elapsed());
            }
        }

        result
    }

    async fn query_inner(
        &self,
        service_name: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogView>, StoreError> {
        let min = lower_bound(from);
        let max = upper_bound(to);

        let ids = self
            .backend
            .range_by_score(&index_key(service_name), min, max)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to query logs: {}", e)))?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| record_key(id)).collect();
        let fetched = self
            .backend
            .fetch_fields(&keys)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to retrieve logs: {}", e)))?;

        let mut logs = Vec::with_capacity(ids.len());
        let mut skipped = 0usize;

        for (id, fields) in ids.iter().zip(fetched) {
            match fields.as_ref().and_then(decode_fields) {
                Some(view) => logs.push(view),
                None => {
                    skipped += 1;
                    debug!(service = %service_name, id = %id, "Skipping unavailable log record");
                }
            }
        }

        if skipped > 0 {
            metrics::record_skipped(skipped as u64);
        }

        logs.retain(|view| {
            from.map_or(true, |from| view.event_time >= from)
                && to.map_or(true, |to| view.event_time <= to)
        });
        logs.sort_by_key(|view| view.event_time);

        debug!(
            service = %service_name,
            min = %min,
            max = %max,
            count = logs.len(),
            skipped = skipped,
            "Queried logs"
        );

        Ok(logs)
    }

    /// Backend health check
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.backend.ping().await
    }

    /// Release backend connections
    pub async fn close(&self) -> Result<(), StoreError> {
        self.backend.close().await?;
        info!("Log store closed");
        Ok(())
    }
}
