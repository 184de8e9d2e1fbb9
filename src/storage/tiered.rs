//! Multi-tier read cache
//!
//! Reads go in-process → distributed → durable and stop at the first tier
//! holding data, back-filling the faster tiers on the way out. A failing
//! distributed tier is treated as a miss and never surfaces to callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::codec;
use crate::protocol::messages::ChatEvent;
use crate::storage::distributed::ListCache;
use crate::storage::durable::MessageStore;
use crate::storage::local::LocalTier;

const KEY_PREFIX: &str = "chat:room:";
const KEY_SUFFIX: &str = ":messages";

/// Configuration for the read cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries kept per room in process (default: 50)
    pub local_capacity: usize,
    /// Entries kept per room in the distributed tier (default: 100)
    pub distributed_capacity: usize,
    /// Sliding TTL of distributed entries (default: 7 days)
    pub ttl: Duration,
    /// Rooms with activity inside this window are warmed on startup (default: 7 days)
    pub warmup_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_capacity: 50,
            distributed_capacity: 100,
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
            warmup_window: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Which tier answered a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheTier {
    Local,
    Distributed,
    Durable,
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub local_hits: u64,
    pub distributed_hits: u64,
    pub durable_loads: u64,
    pub distributed_errors: u64,
    pub local_rooms: usize,
}

#[derive(Default)]
struct CacheCounters {
    local_hits: AtomicU64,
    distributed_hits: AtomicU64,
    durable_loads: AtomicU64,
    distributed_errors: AtomicU64,
}

/// Three-tier read cache over a [`LocalTier`], a [`ListCache`] and a [`MessageStore`]
pub struct MessageCache {
    local: LocalTier,
    distributed: Arc<dyn ListCache>,
    store: Arc<dyn MessageStore>,
    config: CacheConfig,
    counters: CacheCounters,
}

impl MessageCache {
    pub fn new(
        config: CacheConfig,
        distributed: Arc<dyn ListCache>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            local: LocalTier::new(config.local_capacity),
            distributed,
            store,
            config,
            counters: CacheCounters::default(),
        }
    }

    /// Distributed key for a room
    pub fn cache_key(room_id: &str) -> String {
        format!("{}{}{}", KEY_PREFIX, room_id, KEY_SUFFIX)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    /// Append an event to both tiers
    pub async fn record_message(&self, room_id: &str, event: &ChatEvent) {
        self.local.append(room_id, event.clone()).await;

        let entry = match codec::encode(event) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Failed to encode event for distributed tier");
                return;
            }
        };

        if let Err(e) = self
            .distributed
            .append_bounded(
                &Self::cache_key(room_id),
                entry,
                self.config.distributed_capacity,
                self.config.ttl,
            )
            .await
        {
            self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
            warn!(room_id = %room_id, error = %e, "Distributed tier write failed");
        }
    }

    /// Recent history of a room in ascending order
    pub async fn recent_messages(&self, room_id: &str) -> Vec<ChatEvent> {
        self.recent_messages_with_tier(room_id).await.0
    }

    /// Like [`recent_messages`](Self::recent_messages), also reporting the tier that answered
    pub async fn recent_messages_with_tier(&self, room_id: &str) -> (Vec<ChatEvent>, CacheTier) {
        let local = self.local.snapshot(room_id).await;
        if !local.is_empty() {
            self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            return (local, CacheTier::Local);
        }

        if let Some(events) = self.read_distributed(room_id).await {
            self.counters.distributed_hits.fetch_add(1, Ordering::Relaxed);
            self.local.fill(room_id, tail(events.clone(), self.local.capacity())).await;
            debug!(room_id = %room_id, count = events.len(), "Served history from distributed tier");
            return (events, CacheTier::Distributed);
        }

        let events = self.load_from_store(room_id).await;
        (events, CacheTier::Durable)
    }

    /// Last `limit` entries of the tiered read
    pub async fn recent_messages_limited(&self, room_id: &str, limit: usize) -> Vec<ChatEvent> {
        tail(self.recent_messages(room_id).await, limit)
    }

    /// Page of history strictly older than `before`, newest first, straight from the store
    pub async fn messages_before(
        &self,
        room_id: &str,
        before: u64,
        limit: usize,
    ) -> Result<Vec<ChatEvent>> {
        self.store.messages_before(room_id, before, limit).await
    }

    /// History inside `[from, to]`, oldest first, straight from the store
    pub async fn messages_between(
        &self,
        room_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChatEvent>> {
        if from > to {
            return Err(ChatError::invalid_message(format!(
                "period start {} is after end {}",
                from, to
            )));
        }
        self.store.messages_between(room_id, from, to).await
    }

    /// Hydrate both tiers for rooms active inside the warm-up window
    pub async fn warm_up(&self) -> usize {
        let since = current_timestamp()
            .saturating_sub(self.config.warmup_window.as_millis() as u64);

        let rooms = match self.store.active_room_ids(since).await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(error = %e, "Cache warm-up skipped, active rooms unavailable");
                return 0;
            }
        };

        let mut warmed = 0;
        for room_id in &rooms {
            if !self.load_from_store(room_id).await.is_empty() {
                warmed += 1;
            }
        }
        info!(rooms = rooms.len(), warmed, "Cache warm-up complete");
        warmed
    }

    /// Drop the in-process buffer of a room. The distributed tier expires on its own.
    pub fn cleanup_room(&self, room_id: &str) {
        if self.local.remove(room_id) {
            debug!(room_id = %room_id, "Removed in-process history");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            distributed_hits: self.counters.distributed_hits.load(Ordering::Relaxed),
            durable_loads: self.counters.durable_loads.load(Ordering::Relaxed),
            distributed_errors: self.counters.distributed_errors.load(Ordering::Relaxed),
            local_rooms: self.local.room_count(),
        }
    }

    async fn read_distributed(&self, room_id: &str) -> Option<Vec<ChatEvent>> {
        match self.distributed.range(&Self::cache_key(room_id), 0, -1).await {
            Ok(entries) if !entries.is_empty() => {
                let events: Vec<ChatEvent> = codec::decode_lossy(entries);
                (!events.is_empty()).then_some(events)
            }
            Ok(_) => None,
            Err(e) => {
                self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
                warn!(room_id = %room_id, error = %e, "Distributed tier read failed, treating as miss");
                None
            }
        }
    }

    async fn load_from_store(&self, room_id: &str) -> Vec<ChatEvent> {
        let mut events = match self
            .store
            .recent_messages(room_id, self.config.distributed_capacity)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Durable history read failed");
                return Vec::new();
            }
        };
        self.counters.durable_loads.fetch_add(1, Ordering::Relaxed);

        if events.is_empty() {
            return events;
        }
        events.sort_by_key(|e| e.timestamp);

        let entries: Vec<String> = events
            .iter()
            .filter_map(|e| codec::encode(e).ok())
            .collect();
        if let Err(e) = self
            .distributed
            .replace(&Self::cache_key(room_id), entries, self.config.ttl)
            .await
        {
            self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
            warn!(room_id = %room_id, error = %e, "Distributed tier fill failed");
        }

        self.local
            .fill(room_id, tail(events.clone(), self.local.capacity()))
            .await;
        debug!(room_id = %room_id, count = events.len(), "Loaded history from durable store");
        events
    }
}

fn tail(mut events: Vec<ChatEvent>, limit: usize) -> Vec<ChatEvent> {
    if events.len() > limit {
        events.drain(..events.len() - limit);
    }
    events
}
