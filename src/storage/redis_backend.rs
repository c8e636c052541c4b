//! Redis backend
//!
//! Holds a fixed number of multiplexed connection managers, created once at
//! startup and used round-robin. Atomic batches are sent as `MULTI`/`EXEC`
//! pipelines, bulk reads as plain pipelines.

use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{
    Client, ConnectionAddr, ConnectionInfo, FromRedisValue, RedisConnectionInfo, Value,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

use super::{check_expiries, KvBackend, ScoreBound, WriteOp};
use crate::config::RedisConfig;
use crate::error::StoreError;

/// Redis-backed key-value store
pub struct RedisBackend {
    connections: RwLock<Vec<ConnectionManager>>,
    next: AtomicUsize,
}

impl RedisBackend {
    /// Open `pool_size` connections to the configured server
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(connection_info(config))?;

        let pool_size = config.pool_size.max(1);
        let connections = futures::future::try_join_all(
            (0..pool_size).map(|_| client.get_connection_manager_with_config(manager_config(config))),
        )
        .await
        .map_err(|e| {
            StoreError::Unavailable(format!(
                "failed to connect to redis at {}:{}: {}",
                config.host, config.port, e
            ))
        })?;

        info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            pool_size = pool_size,
            "Connected to Redis"
        );

        Ok(Self {
            connections: RwLock::new(connections),
            next: AtomicUsize::new(0),
        })
    }

    /// Pick the next pooled connection
    fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let connections = self
            .connections
            .read()
            .map_err(|_| StoreError::Unavailable("connection pool poisoned".to_string()))?;

        if connections.is_empty() {
            return Err(StoreError::Unavailable("connection pool closed".to_string()));
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % connections.len();
        Ok(connections[index].clone())
    }
}

fn connection_info(config: &RedisConfig) -> ConnectionInfo {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

    ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: config.db,
            username: non_empty(&config.username),
            password: non_empty(&config.password),
            ..Default::default()
        },
    }
}

fn manager_config(config: &RedisConfig) -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_connection_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .set_response_timeout(Duration::from_secs(config.response_timeout_seconds))
}

/// Build the `MULTI`/`EXEC` pipeline for an atomic batch
///
/// Expiries are checked up front: once queued, a rejected PEXPIRE would not
/// stop the other commands from applying.
fn atomic_pipeline(ops: &[WriteOp]) -> Result<::redis::Pipeline, StoreError> {
    check_expiries(ops)?;

    let mut pipe = ::redis::pipe();
    pipe.atomic();

    for op in ops {
        match op {
            WriteOp::SetFields { key, fields } => {
                pipe.cmd("HSET").arg(key).arg(fields).ignore();
            }
            WriteOp::Expire { key, ttl } => {
                let millis = i64::try_from(ttl.as_millis()).map_err(|_| {
                    StoreError::Unavailable(format!("invalid expire time for {}", key))
                })?;
                pipe.cmd("PEXPIRE").arg(key).arg(millis).ignore();
            }
            WriteOp::SortedAdd { key, member, score } => {
                pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
            }
        }
    }

    Ok(pipe)
}

/// Decode one HGETALL reply; `None` when it is not a string map
fn decode_hash_reply(key: &str, reply: &Value) -> Option<HashMap<String, String>> {
    match HashMap::<String, String>::from_redis_value(reply) {
        Ok(fields) => Some(fields),
        Err(e) => {
            debug!(key = %key, error = %e, "Discarding unreadable hash reply");
            None
        }
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn execute_atomic(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let pipe = atomic_pipeline(&ops)?;
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection()?;
        let members: Vec<String> = ::redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(min.as_min_arg())
            .arg(max.as_max_arg())
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn fetch_fields(
        &self,
        keys: &[String],
    ) -> Result<Vec<Option<HashMap<String, String>>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection()?;
        let mut pipe = ::redis::pipe();
        for key in keys {
            pipe.cmd("HGETALL").arg(key);
        }

        let replies: Vec<Value> = pipe.query_async(&mut conn).await?;
        if replies.len() != keys.len() {
            return Err(StoreError::Unavailable(format!(
                "expected {} replies, got {}",
                keys.len(),
                replies.len()
            )));
        }

        Ok(replies
            .iter()
            .zip(keys)
            .map(|(reply, key)| decode_hash_reply(key, reply))
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut connections = self
            .connections
            .write()
            .map_err(|_| StoreError::Unavailable("connection pool poisoned".to_string()))?;
        let count = connections.len();
        connections.clear();
        info!(connections = count, "Redis connection pool closed");
        Ok(())
    }
}
