//! In-process hot tier
//!
//! One bounded buffer per room. Each buffer has its own lock, so writers in
//! different rooms never contend and append + evict is atomic within a room.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::protocol::messages::{ChatEvent, RoomId};

type RoomBuffer = Arc<Mutex<VecDeque<ChatEvent>>>;

/// Per-room bounded FIFO buffers
pub struct LocalTier {
    rooms: DashMap<RoomId, RoomBuffer>,
    capacity: usize,
}

impl LocalTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn buffer(&self, room_id: &str) -> RoomBuffer {
        if let Some(buffer) = self.rooms.get(room_id) {
            return buffer.clone();
        }
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity))))
            .clone()
    }

    /// Append an event, evicting the oldest entries beyond capacity
    pub async fn append(&self, room_id: &str, event: ChatEvent) {
        let buffer = self.buffer(room_id);
        let mut events = buffer.lock().await;
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Copy of the room's buffer in insertion order (empty if unknown)
    pub async fn snapshot(&self, room_id: &str) -> Vec<ChatEvent> {
        let Some(buffer) = self.rooms.get(room_id).map(|b| b.clone()) else {
            return Vec::new();
        };
        let events = buffer.lock().await;
        events.iter().cloned().collect()
    }

    /// Populate a room from a slower tier
    ///
    /// Events appended while the slower read was in flight are kept after the
    /// loaded history instead of being overwritten.
    pub async fn fill(&self, room_id: &str, history: Vec<ChatEvent>) {
        let buffer = self.buffer(room_id);
        let mut events = buffer.lock().await;

        let newer: Vec<ChatEvent> = {
            let loaded: HashSet<&str> = history.iter().map(|e| e.id.as_str()).collect();
            events
                .iter()
                .filter(|e| !loaded.contains(e.id.as_str()))
                .cloned()
                .collect()
        };

        let mut merged: VecDeque<ChatEvent> = history.into_iter().chain(newer).collect();
        while merged.len() > self.capacity {
            merged.pop_front();
        }
        *events = merged;
    }

    /// Drop a room's buffer
    pub fn remove(&self, room_id: &str) -> bool {
        self.rooms.remove(room_id).is_some()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of buffered events in a room
    pub async fn len(&self, room_id: &str) -> usize {
        match self.rooms.get(room_id).map(|b| b.clone()) {
            Some(buffer) => buffer.lock().await.len(),
            None => 0,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::UserInfo;

    fn msg(body: &str) -> ChatEvent {
        ChatEvent::chat("room-1", &UserInfo::new("u-1", "alice"), body)
    }

    #[tokio::test]
    async fn test_append_evicts_oldest() {
        let tier = LocalTier::new(3);
        for i in 0..5 {
            tier.append("room-1", msg(&i.to_string())).await;
        }
        let bodies: Vec<String> = tier
            .snapshot("room-1")
            .await
            .into_iter()
            .map(|e| e.body)
            .collect();
        assert_eq!(bodies, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_bounded() {
        let tier = Arc::new(LocalTier::new(50));
        let mut handles = Vec::new();
        for task in 0..8 {
            let tier = tier.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    tier.append("room-1", msg(&format!("{}-{}", task, i))).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tier.len("room-1").await, 50);
    }

    #[tokio::test]
    async fn test_fill_keeps_newer_appends() {
        let tier = LocalTier::new(10);
        let live = msg("live");
        tier.append("room-1", live.clone()).await;

        let history = vec![msg("h1"), msg("h2")];
        tier.fill("room-1", history).await;

        let bodies: Vec<String> = tier
            .snapshot("room-1")
            .await
            .into_iter()
            .map(|e| e.body)
            .collect();
        assert_eq!(bodies, vec!["h1", "h2", "live"]);
    }

    #[tokio::test]
    async fn test_remove_room() {
        let tier = LocalTier::new(10);
        tier.append("room-1", msg("a")).await;
        assert!(tier.remove("room-1"));
        assert!(!tier.contains("room-1"));
        assert!(tier.snapshot("room-1").await.is_empty());
    }
}
