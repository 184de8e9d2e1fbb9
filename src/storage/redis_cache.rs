//! Redis-backed distributed tier

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::error::Result;
use crate::storage::distributed::ListCache;

/// [`ListCache`] over a Redis list per key
///
/// Bounded appends and full replacements run as one atomic pipeline so a
/// concurrent reader never observes an untrimmed or half-filled list.
#[derive(Clone)]
pub struct RedisListCache {
    conn: ConnectionManager,
}

impl RedisListCache {
    /// Connect to `redis_url` with an auto-reconnecting connection manager
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %redis_url, "Connected to Redis");
        Ok(Self::from_manager(conn))
    }

    /// Share an existing connection manager
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

#[async_trait]
impl ListCache for RedisListCache {
    async fn push_tail(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }

    async fn trim_to_last(&self, key: &str, len: usize) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.ltrim(key, -(len as isize), -1).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn append_bounded(
        &self,
        key: &str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .rpush(key, value)
            .ignore()
            .ltrim(key, -(max_len as isize), -1)
            .ignore()
            .expire(key, ttl_secs(ttl))
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn replace(&self, key: &str, values: Vec<String>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !values.is_empty() {
            pipe.rpush(key, values)
                .ignore()
                .expire(key, ttl_secs(ttl))
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
