//! Storage layer for ingested logs
//!
//! The [`LogStore`] owns the record encoding and the per-service time index.
//! It talks to a [`KvBackend`], which is either Redis (production) or an
//! in-process map with the same semantics (tests and local runs).
//!
//! ## Key layout
//!
//! ```text
//! log:<id>               hash        id, service_name, timestamp, message, created_at
//! service:<service_name> sorted set  member = id, score = event time in nanoseconds
//! ```
//!
//! Both keys of a record are written and given the same expiry in one atomic batch.

pub mod log_store;
pub mod memory;
pub mod redis_backend;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendKind, Config};
use crate::error::StoreError;

pub use log_store::LogStore;
pub use memory::InMemoryBackend;
pub use redis_backend::RedisBackend;

/// Longest expiry a batch may set
///
/// Redis rejects a PEXPIRE whose deadline overflows, and inside `MULTI`/`EXEC`
/// that rejection does not undo the other commands of the batch.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// A single write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Upsert fields of the hash stored at `key`
    SetFields {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Set the time-to-live of `key`
    Expire { key: String, ttl: Duration },
    /// Insert or re-score `member` in the sorted set stored at `key`
    SortedAdd {
        key: String,
        member: String,
        score: i64,
    },
}

/// Reject a batch that sets an expiry beyond [`MAX_TTL`]
///
/// Backends call this before sending or applying anything.
pub(crate) fn check_expiries(ops: &[WriteOp]) -> Result<(), StoreError> {
    for op in ops {
        if let WriteOp::Expire { key, ttl } = op {
            if *ttl > MAX_TTL {
                return Err(StoreError::Unavailable(format!(
                    "invalid expire time for {}: {}s exceeds the {}s limit",
                    key,
                    ttl.as_secs(),
                    MAX_TTL.as_secs()
                )));
            }
        }
    }
    Ok(())
}

/// Inclusive bound of a score range scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    Unbounded,
    Inclusive(i64),
}

impl ScoreBound {
    /// Redis argument form when used as the lower bound
    pub fn as_min_arg(&self) -> String {
        match self {
            Self::Unbounded => "-inf".to_string(),
            Self::Inclusive(score) => score.to_string(),
        }
    }

    /// Redis argument form when used as the upper bound
    pub fn as_max_arg(&self) -> String {
        match self {
            Self::Unbounded => "+inf".to_string(),
            Self::Inclusive(score) => score.to_string(),
        }
    }

    pub(crate) fn admits_above(&self, score: i64) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Inclusive(min) => score >= *min,
        }
    }

    pub(crate) fn admits_below(&self, score: i64) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Inclusive(max) => score <= *max,
        }
    }
}

impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => write!(f, "inf"),
            Self::Inclusive(score) => write!(f, "{}", score),
        }
    }
}

/// Key-value backend used by [`LogStore`]
///
/// Implementations must apply [`KvBackend::execute_atomic`] all-or-nothing:
/// a concurrent reader never observes a subset of the batch.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Apply every operation as one indivisible unit
    async fn execute_atomic(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Members of the sorted set at `key` with score in `[min, max]`,
    /// ascending by score then member
    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<String>, StoreError>;

    /// Fetch every hash in a single round trip
    ///
    /// The result is positional. `None` marks a per-key failure, an empty map
    /// a key that does not exist.
    async fn fetch_fields(
        &self,
        keys: &[String],
    ) -> Result<Vec<Option<HashMap<String, String>>>, StoreError>;

    /// Connection health check
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release connections held by the backend
    async fn close(&self) -> Result<(), StoreError>;
}

/// Create the backend selected by configuration
///
/// For Redis this opens every pooled connection and pings the server, so a
/// returned backend is known to be reachable.
pub async fn create_backend(config: &Config) -> Result<Arc<dyn KvBackend>, StoreError> {
    match config.storage.backend {
        BackendKind::Memory => Ok(Arc::new(InMemoryBackend::new())),
        BackendKind::Redis => {
            let backend = RedisBackend::connect(&config.redis).await?;
            backend.ping().await?;
            Ok(Arc::new(backend))
        }
    }
}
