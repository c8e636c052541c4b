use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::storage::MAX_TTL;

/// Environment variable prefix, e.g. `LOG_AGGREGATOR__REDIS__HOST`
pub const ENV_PREFIX: &str = "LOG_AGGREGATOR";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub startup: StartupConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Per-request deadline applied by the HTTP layer
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// How long in-flight requests may drain after a shutdown signal
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            request_timeout_seconds: default_request_timeout(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

/// Which key-value backend holds the logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Redis,
    /// In-process, non-persistent; for local development
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default = "default_redis_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_seconds: u64,
    /// Retention of every record and its index entry
    #[serde(default = "default_log_expiry")]
    pub log_expiry_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            username: default_redis_username(),
            password: String::new(),
            db: 0,
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            response_timeout_seconds: default_response_timeout(),
            log_expiry_seconds: default_log_expiry(),
        }
    }
}

impl RedisConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.log_expiry_seconds)
    }
}

/// Backend connection retries at process start
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StartupConfig {
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: default_max_connect_attempts(),
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    15
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_username() -> String {
    "default".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_response_timeout() -> u64 {
    5
}

fn default_log_expiry() -> u64 {
    3600
}

fn default_max_connect_attempts() -> u32 {
    4
}

fn default_retry_delay() -> u64 {
    2
}

/// Load configuration from `path` (optional) overlaid with environment variables
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        anyhow::bail!("Server port must be non-zero");
    }

    match cfg.server.log_format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Invalid log format '{}': expected 'text' or 'json'", other),
    }

    if cfg.redis.log_expiry_seconds == 0 {
        anyhow::bail!("Log expiry must be at least one second");
    }

    if cfg.redis.log_expiry_seconds > MAX_TTL.as_secs() {
        anyhow::bail!(
            "Log expiry of {}s exceeds the maximum of {}s",
            cfg.redis.log_expiry_seconds,
            MAX_TTL.as_secs()
        );
    }

    if cfg.startup.max_connect_attempts == 0 {
        anyhow::bail!("At least one backend connection attempt is required");
    }

    if cfg.storage.backend == BackendKind::Redis {
        if cfg.redis.host.is_empty() {
            anyhow::bail!("Redis host cannot be empty");
        }
        if cfg.redis.pool_size == 0 {
            anyhow::bail!("Redis pool size must be at least 1");
        }
    }

    Ok(())
}
