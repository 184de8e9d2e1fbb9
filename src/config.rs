//! Pipeline configuration
//!
//! Each component owns its config struct (with defaults matching production
//! values). [`PipelineConfig`] aggregates them and can be overridden from
//! `ROOMCAST_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{ChatError, Result};
use crate::pipeline::PersisterConfig;
use crate::server::ChatConfig;
use crate::storage::CacheConfig;
use crate::transport::ShardConfig;

/// Full pipeline configuration
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Intake queue and batch persister
    pub persister: PersisterConfig,
    /// Tiered read cache
    pub cache: CacheConfig,
    /// Shard manager
    pub shards: ShardConfig,
    /// Chat service
    pub chat: ChatConfig,
    /// Redis URL for the distributed tier (in-memory tier when unset)
    pub redis_url: Option<String>,
}

impl PipelineConfig {
    /// Build a config from defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let p = &mut config.persister;
        p.queue_capacity = env_or("ROOMCAST_QUEUE_CAPACITY", p.queue_capacity);
        p.retry_capacity = env_or("ROOMCAST_RETRY_CAPACITY", p.retry_capacity);
        p.default_batch_size = env_or("ROOMCAST_BATCH_SIZE", p.default_batch_size);
        p.min_batch_size = env_or("ROOMCAST_MIN_BATCH_SIZE", p.min_batch_size);
        p.max_batch_size = env_or("ROOMCAST_MAX_BATCH_SIZE", p.max_batch_size);
        p.retry_batch_size = env_or("ROOMCAST_RETRY_BATCH_SIZE", p.retry_batch_size);
        p.batch_interval = env_ms_or("ROOMCAST_BATCH_INTERVAL_MS", p.batch_interval);
        p.retry_interval = env_ms_or("ROOMCAST_RETRY_INTERVAL_MS", p.retry_interval);
        p.monitor_interval = env_ms_or("ROOMCAST_MONITOR_INTERVAL_MS", p.monitor_interval);
        p.shutdown_timeout = env_ms_or("ROOMCAST_SHUTDOWN_TIMEOUT_MS", p.shutdown_timeout);

        let c = &mut config.cache;
        c.local_capacity = env_or("ROOMCAST_LOCAL_CACHE_SIZE", c.local_capacity);
        c.distributed_capacity = env_or("ROOMCAST_DISTRIBUTED_CACHE_SIZE", c.distributed_capacity);
        c.ttl = Duration::from_secs(env_or("ROOMCAST_CACHE_TTL_SECS", c.ttl.as_secs()));
        c.warmup_window = Duration::from_secs(env_or(
            "ROOMCAST_WARMUP_WINDOW_SECS",
            c.warmup_window.as_secs(),
        ));

        config.shards.num_shards = env_or("ROOMCAST_NUM_SHARDS", config.shards.num_shards);
        config.chat.max_message_len = env_or("ROOMCAST_MAX_MESSAGE_LEN", config.chat.max_message_len);

        config.redis_url = std::env::var("ROOMCAST_REDIS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        config
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let p = &self.persister;
        if p.queue_capacity == 0 {
            return Err(ChatError::config("queue_capacity must be >= 1"));
        }
        if p.retry_capacity == 0 {
            return Err(ChatError::config("retry_capacity must be >= 1"));
        }
        if p.min_batch_size == 0 || p.min_batch_size > p.max_batch_size {
            return Err(ChatError::config(format!(
                "batch bounds must satisfy 1 <= min <= max, got [{}, {}]",
                p.min_batch_size, p.max_batch_size
            )));
        }
        if p.default_batch_size < p.min_batch_size || p.default_batch_size > p.max_batch_size {
            return Err(ChatError::config(format!(
                "default_batch_size {} outside [{}, {}]",
                p.default_batch_size, p.min_batch_size, p.max_batch_size
            )));
        }
        if p.retry_batch_size == 0 {
            return Err(ChatError::config("retry_batch_size must be >= 1"));
        }
        if p.batch_interval.is_zero() || p.retry_interval.is_zero() || p.monitor_interval.is_zero() {
            return Err(ChatError::config("periodic intervals must be > 0"));
        }

        let c = &self.cache;
        if c.local_capacity == 0 || c.distributed_capacity == 0 {
            return Err(ChatError::config("cache capacities must be >= 1"));
        }
        if c.ttl.is_zero() {
            return Err(ChatError::config("cache ttl must be > 0"));
        }

        if self.shards.num_shards == 0 {
            return Err(ChatError::config("num_shards must be >= 1"));
        }
        if self.chat.max_message_len == 0 {
            return Err(ChatError::config("max_message_len must be >= 1"));
        }

        Ok(())
    }
}

/// Read an env var, falling back to `default` when unset or unparsable
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_ms_or(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(name, default.as_millis() as u64))
}
