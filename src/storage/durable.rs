//! Durable message store
//!
//! The durable store is the source of truth for chat history. The pipeline
//! only needs bulk append, a "most recent N" read, recent-activity discovery
//! for cache warm-up, a cursor read for paging and a time-range read.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{ChatError, Result};
use crate::protocol::messages::{ChatEvent, RoomId};

/// Durable storage for chat events
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a batch of events in one write. May fail as a whole.
    async fn append_batch(&self, events: &[ChatEvent]) -> Result<()>;

    /// Most recent `limit` events of a room, newest first
    async fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<ChatEvent>>;

    /// Rooms with at least one event at or after `since` (Unix ms)
    async fn active_room_ids(&self, since: u64) -> Result<Vec<RoomId>>;

    /// Up to `limit` events strictly older than `before` (Unix ms), newest first
    async fn messages_before(
        &self,
        room_id: &str,
        before: u64,
        limit: usize,
    ) -> Result<Vec<ChatEvent>>;

    /// Events with `from <= timestamp <= to` (Unix ms), oldest first
    async fn messages_between(
        &self,
        room_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChatEvent>>;
}

#[derive(Default)]
struct StoreState {
    rooms: HashMap<RoomId, Vec<ChatEvent>>,
    ids: HashSet<String>,
}

/// In-memory message store
///
/// Writes are idempotent by event id. Failure injection and write latency
/// hooks let callers exercise the persister's retry and sizing paths.
#[derive(Default)]
pub struct MemoryMessageStore {
    state: RwLock<StoreState>,
    fail_next: AtomicUsize,
    failing: AtomicBool,
    write_delay_ms: AtomicU64,
    batch_writes: AtomicU64,
    reads: AtomicU64,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` batch writes fail
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make every write fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep this long inside every batch write
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `append_batch` calls that reached the store
    pub fn batch_writes(&self) -> u64 {
        self.batch_writes.load(Ordering::SeqCst)
    }

    /// Number of history read calls
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Total stored events across rooms
    pub async fn len(&self) -> usize {
        self.state.read().await.ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether an event with this id has been stored
    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.ids.contains(id)
    }

    /// Seed history directly, bypassing failure injection
    pub async fn seed(&self, events: impl IntoIterator<Item = ChatEvent>) {
        let mut state = self.state.write().await;
        for event in events {
            insert(&mut state, event);
        }
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn insert(state: &mut StoreState, event: ChatEvent) {
    if state.ids.insert(event.id.clone()) {
        state
            .rooms
            .entry(event.room_id.clone())
            .or_default()
            .push(event);
    }
}

fn newest_first<'a>(events: impl Iterator<Item = &'a ChatEvent>, limit: usize) -> Vec<ChatEvent> {
    let mut sorted: Vec<ChatEvent> = events.cloned().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted.truncate(limit);
    sorted
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append_batch(&self, events: &[ChatEvent]) -> Result<()> {
        self.batch_writes.fetch_add(1, Ordering::SeqCst);

        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.should_fail() {
            return Err(ChatError::storage(format!(
                "injected failure writing {} events",
                events.len()
            )));
        }

        let mut state = self.state.write().await;
        for event in events {
            insert(&mut state, event.clone());
        }
        Ok(())
    }

    async fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<ChatEvent>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        Ok(state
            .rooms
            .get(room_id)
            .map(|events| newest_first(events.iter(), limit))
            .unwrap_or_default())
    }

    async fn active_room_ids(&self, since: u64) -> Result<Vec<RoomId>> {
        let state = self.state.read().await;
        let mut rooms: Vec<RoomId> = state
            .rooms
            .iter()
            .filter(|(_, events)| events.iter().any(|e| e.timestamp >= since))
            .map(|(room_id, _)| room_id.clone())
            .collect();
        rooms.sort();
        Ok(rooms)
    }

    async fn messages_before(
        &self,
        room_id: &str,
        before: u64,
        limit: usize,
    ) -> Result<Vec<ChatEvent>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        Ok(state
            .rooms
            .get(room_id)
            .map(|events| {
                newest_first(events.iter().filter(|e| e.timestamp < before), limit)
            })
            .unwrap_or_default())
    }

    async fn messages_between(
        &self,
        room_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChatEvent>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        let mut events: Vec<ChatEvent> = state
            .rooms
            .get(room_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| (from..=to).contains(&e.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}
