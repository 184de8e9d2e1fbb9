//! Distributed list cache
//!
//! The warm tier is an ordered list per room key with a sliding TTL. The
//! trait mirrors the list commands of a Redis-like server; negative indices
//! in [`ListCache::range`] count from the tail, as they do there.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ChatError, Result};

/// Ordered list storage keyed by string
#[async_trait]
pub trait ListCache: Send + Sync {
    /// Append one value to the tail of the list
    async fn push_tail(&self, key: &str, value: String) -> Result<()>;

    /// Read the inclusive index range `[start, stop]`
    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Keep only the last `len` elements
    async fn trim_to_last(&self, key: &str, len: usize) -> Result<()>;

    /// Set the key's time to live
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remove the key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Push, trim and refresh the TTL
    async fn append_bounded(
        &self,
        key: &str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> Result<()> {
        self.push_tail(key, value).await?;
        self.trim_to_last(key, max_len).await?;
        self.expire(key, ttl).await
    }

    /// Replace the whole list and set its TTL
    async fn replace(&self, key: &str, values: Vec<String>, ttl: Duration) -> Result<()> {
        self.delete(key).await?;
        if values.is_empty() {
            return Ok(());
        }
        for value in values {
            self.push_tail(key, value).await?;
        }
        self.expire(key, ttl).await
    }
}

struct ListEntry {
    items: VecDeque<String>,
    expires_at: Option<Instant>,
}

impl ListEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process implementation of [`ListCache`]
///
/// Expiry is evaluated lazily on access. `set_unavailable(true)` makes every
/// call fail, which is how tests simulate an unreachable cache server.
#[derive(Default)]
pub struct MemoryListCache {
    lists: Mutex<HashMap<String, ListEntry>>,
    unavailable: AtomicBool,
    range_calls: AtomicU64,
}

impl MemoryListCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of range reads served
    pub fn range_calls(&self) -> u64 {
        self.range_calls.load(Ordering::SeqCst)
    }

    /// Current list length (0 if missing or expired)
    pub async fn len(&self, key: &str) -> usize {
        let mut lists = self.lists.lock().await;
        live_entry(&mut lists, key).map_or(0, |entry| entry.items.len())
    }

    /// Remaining time to live, if any
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut lists = self.lists.lock().await;
        let now = Instant::now();
        live_entry(&mut lists, key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::cache("cache server unavailable"));
        }
        Ok(())
    }
}

/// Look up a key, dropping it first if its TTL has passed
fn live_entry<'a>(lists: &'a mut HashMap<String, ListEntry>, key: &str) -> Option<&'a mut ListEntry> {
    if lists.get(key).is_some_and(|entry| entry.is_expired(Instant::now())) {
        lists.remove(key);
    }
    lists.get_mut(key)
}

/// Resolve Redis-style inclusive indices against a list length
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl ListCache for MemoryListCache {
    async fn push_tail(&self, key: &str, value: String) -> Result<()> {
        self.check_available()?;
        let mut lists = self.lists.lock().await;
        if live_entry(&mut lists, key).is_none() {
            lists.insert(
                key.to_string(),
                ListEntry {
                    items: VecDeque::new(),
                    expires_at: None,
                },
            );
        }
        if let Some(entry) = lists.get_mut(key) {
            entry.items.push_back(value);
        }
        Ok(())
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.check_available()?;
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        let mut lists = self.lists.lock().await;
        let Some(entry) = live_entry(&mut lists, key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(entry.items.len(), start, stop) {
            Some((from, to)) => entry.items.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn trim_to_last(&self, key: &str, len: usize) -> Result<()> {
        self.check_available()?;
        let mut lists = self.lists.lock().await;
        if let Some(entry) = live_entry(&mut lists, key) {
            while entry.items.len() > len {
                entry.items.pop_front();
            }
            if entry.items.is_empty() {
                lists.remove(key);
            }
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let mut lists = self.lists.lock().await;
        if let Some(entry) = live_entry(&mut lists, key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.lists.lock().await.remove(key);
        Ok(())
    }
}
