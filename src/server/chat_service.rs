//! Chat orchestration
//!
//! Sequences membership transitions and pushes every room event through the
//! same path: record in the read cache, submit for persistence, broadcast to
//! the room. Room and participant state stays behind [`RoomDirectory`];
//! precondition failures surface as domain errors, infrastructure failures
//! are absorbed by the components below.
//!
//! Joins and leaves of one room run one at a time, so the capacity check,
//! the membership transition and the announcement see a consistent room.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{ChatError, Result};
use crate::pipeline::{BatchPersister, PersisterStats};
use crate::protocol::messages::{ChatEvent, RoomId, ShardId, UserInfo};
use crate::server::membership::{MembershipEvent, MembershipState, transition};
use crate::server::room_manager::RoomDirectory;
use crate::storage::{CacheStats, ListCache, MessageCache, MessageStore};
use crate::transport::{
    BroadcastCompletion, BroadcastDispatcher, DeliveryChannel, DispatcherStats, ShardManager,
    ShardStats,
};

/// Configuration for the chat service
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Maximum message length in characters (default: 1000)
    pub max_message_len: usize,
    /// Push recent history to a user on join (default: true)
    pub history_on_join: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_len: 1000,
            history_on_join: true,
        }
    }
}

/// An event that went through record → persist → broadcast
#[derive(Debug)]
pub struct Published {
    pub event: ChatEvent,
    pub delivery: BroadcastCompletion,
}

/// Result of a join
#[derive(Debug)]
pub struct JoinOutcome {
    pub shard_id: ShardId,
    /// The join announcement, absent for a rejoin while already active
    pub announcement: Option<Published>,
    /// History events pushed to the joining user
    pub history_sent: usize,
}

/// Snapshot of every pipeline counter
#[derive(Debug, Clone, Serialize)]
pub struct ChatStats {
    pub persister: PersisterStats,
    pub cache: CacheStats,
    pub shards: ShardStats,
    pub dispatcher: DispatcherStats,
}

/// The chat orchestrator
pub struct ChatService {
    config: ChatConfig,
    rooms: Arc<dyn RoomDirectory>,
    cache: Arc<MessageCache>,
    persister: Arc<BatchPersister>,
    shards: Arc<ShardManager>,
    dispatcher: Arc<BroadcastDispatcher>,
    channel: Arc<dyn DeliveryChannel>,
    membership_locks: DashMap<RoomId, Arc<Mutex<()>>>,
    shutting_down: AtomicBool,
}

impl ChatService {
    /// Wire the pipeline from its collaborators
    pub fn new(
        config: &PipelineConfig,
        rooms: Arc<dyn RoomDirectory>,
        store: Arc<dyn MessageStore>,
        distributed: Arc<dyn ListCache>,
        channel: Arc<dyn DeliveryChannel>,
    ) -> Self {
        let shards = Arc::new(ShardManager::new(config.shards.clone()));
        Self {
            config: config.chat.clone(),
            rooms,
            cache: Arc::new(MessageCache::new(
                config.cache.clone(),
                distributed,
                store.clone(),
            )),
            persister: Arc::new(BatchPersister::new(config.persister.clone(), store)),
            dispatcher: Arc::new(BroadcastDispatcher::new(shards.clone(), channel.clone())),
            shards,
            channel,
            membership_locks: DashMap::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Warm the read cache and start background persistence
    pub async fn start(&self) {
        let warmed = self.cache.warm_up().await;
        self.persister.start().await;
        info!(warmed_rooms = warmed, "Chat service started");
    }

    /// Stop accepting events and flush pending writes
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.persister.shutdown().await;
        info!("Chat service stopped");
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    pub fn persister(&self) -> &Arc<BatchPersister> {
        &self.persister
    }

    pub fn shards(&self) -> &Arc<ShardManager> {
        &self.shards
    }

    pub fn dispatcher(&self) -> &Arc<BroadcastDispatcher> {
        &self.dispatcher
    }

    /// Handle an inbound chat message
    pub async fn on_message(
        &self,
        room_id: &str,
        sender: &UserInfo,
        content: &str,
    ) -> Result<Published> {
        self.ensure_running()?;
        ensure_authenticated(sender)?;
        self.validate_content(content)?;

        let event = ChatEvent::chat(room_id, sender, content.trim());
        debug!(room_id = %room_id, user_id = %sender.user_id, message_id = %event.id, "Chat message");
        Ok(self.publish(room_id, event).await)
    }

    /// Handle a user entering a room
    pub async fn on_join(&self, room_id: &str, user: &UserInfo) -> Result<JoinOutcome> {
        self.ensure_running()?;
        ensure_authenticated(user)?;

        let (shard_id, announcement) = {
            let lock = self.membership_lock(room_id);
            let _membership = lock.lock().await;

            let room = self.rooms.find_room(room_id).await?.ok_or_else(|| {
                ChatError::room_not_found(format!("room {} does not exist", room_id))
            })?;

            let state = self.rooms.participation(room_id, &user.user_id).await?;
            let step = transition(state, MembershipEvent::Join)
                .ok_or_else(|| ChatError::internal("join rejected by membership table"))?;

            // Capacity only gates joins that add a participant
            if state != MembershipState::Active && room.is_full() {
                return Err(ChatError::room_full(format!(
                    "room {} is full ({}/{})",
                    room_id, room.current_participants, room.max_participants
                )));
            }

            if step.next != state {
                self.rooms.activate(room_id, user).await?;
            }
            if step.participant_delta(state) > 0 {
                let count = self.rooms.increment_participants(room_id).await?;
                info!(room_id = %room_id, user_id = %user.user_id, participants = count, "Participant joined");
            }

            let shard_id = self.shards.assign(room_id, &user.user_id);

            let announcement = if step.emits_join {
                Some(self.publish(room_id, ChatEvent::join(room_id, user)).await)
            } else {
                debug!(room_id = %room_id, user_id = %user.user_id, "Rejoin while active");
                None
            };
            (shard_id, announcement)
        };

        let history_sent = if self.config.history_on_join {
            self.push_history(room_id, &user.user_id).await
        } else {
            0
        };

        Ok(JoinOutcome {
            shard_id,
            announcement,
            history_sent,
        })
    }

    /// Handle a permanent leave
    pub async fn on_leave(&self, room_id: &str, user: &UserInfo) -> Result<Published> {
        self.ensure_running()?;
        ensure_authenticated(user)?;

        let lock = self.membership_lock(room_id);
        let _membership = lock.lock().await;

        if self.rooms.find_room(room_id).await?.is_none() {
            return Err(ChatError::room_not_found(format!(
                "room {} does not exist",
                room_id
            )));
        }

        let state = self.rooms.participation(room_id, &user.user_id).await?;
        let not_participant =
            || ChatError::not_participant(format!("{} is not in room {}", user.user_id, room_id));
        transition(state, MembershipEvent::Leave).ok_or_else(not_participant)?;

        if !self.rooms.deactivate(room_id, &user.user_id).await? {
            return Err(not_participant());
        }
        let remaining = self.rooms.decrement_participants(room_id).await?;
        self.shards.remove(room_id, &user.user_id);

        if remaining == 0 {
            self.cache.cleanup_room(room_id);
            self.shards.clear(room_id);
        }
        info!(room_id = %room_id, user_id = %user.user_id, participants = remaining, "Participant left");

        Ok(self.publish(room_id, ChatEvent::leave(room_id, user)).await)
    }

    /// Handle a dropped connection. Membership is kept and nothing is announced.
    pub fn on_disconnect(&self, room_id: &str, user_id: &str) -> bool {
        let removed = self.shards.remove(room_id, user_id);
        if removed {
            debug!(room_id = %room_id, user_id = %user_id, "User disconnected");
        }
        removed
    }

    /// Recent history in ascending order
    pub async fn recent_messages(&self, room_id: &str) -> Vec<ChatEvent> {
        self.cache.recent_messages(room_id).await
    }

    /// Last `limit` events of the recent history
    pub async fn recent_messages_limited(&self, room_id: &str, limit: usize) -> Vec<ChatEvent> {
        self.cache.recent_messages_limited(room_id, limit).await
    }

    /// Page of older history, newest first
    pub async fn messages_before(
        &self,
        room_id: &str,
        before: u64,
        limit: usize,
    ) -> Result<Vec<ChatEvent>> {
        self.cache.messages_before(room_id, before, limit).await
    }

    /// History inside `[from, to]` (Unix ms), oldest first
    pub async fn messages_between(
        &self,
        room_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChatEvent>> {
        self.cache.messages_between(room_id, from, to).await
    }

    /// Tell a single user why their request was rejected
    pub async fn notify_error(&self, room_id: &str, user_id: &str, error: &ChatError) {
        let event = ChatEvent::error(room_id, error.to_string());
        if let Err(e) = self.channel.deliver(user_id, &event).await {
            warn!(room_id = %room_id, user_id = %user_id, error = %e, "Could not deliver error notice");
        }
    }

    pub fn stats(&self) -> ChatStats {
        ChatStats {
            persister: self.persister.stats(),
            cache: self.cache.stats(),
            shards: self.shards.stats(),
            dispatcher: self.dispatcher.stats(),
        }
    }

    fn membership_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        self.membership_locks
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    async fn publish(&self, room_id: &str, event: ChatEvent) -> Published {
        self.cache.record_message(room_id, &event).await;
        self.persister.submit(event.clone()).await;
        let delivery = self.dispatcher.broadcast(room_id, &event);
        Published { event, delivery }
    }

    async fn push_history(&self, room_id: &str, user_id: &str) -> usize {
        let history = self.cache.recent_messages(room_id).await;
        let mut sent = 0;
        for event in &history {
            match self.channel.deliver(user_id, &event.as_history()).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(room_id = %room_id, user_id = %user_id, error = %e, "History push failed");
                    break;
                }
            }
        }
        debug!(room_id = %room_id, user_id = %user_id, sent, "History pushed");
        sent
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ChatError::invalid_message("message is empty"));
        }
        let len = trimmed.chars().count();
        if len > self.config.max_message_len {
            return Err(ChatError::invalid_message(format!(
                "message is {} characters, limit is {}",
                len, self.config.max_message_len
            )));
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ChatError::ShuttingDown);
        }
        Ok(())
    }
}

fn ensure_authenticated(user: &UserInfo) -> Result<()> {
    if user.user_id.trim().is_empty() {
        return Err(ChatError::auth("sender is not authenticated"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::EventKind;
    use crate::server::room_manager::MemoryRoomDirectory;
    use crate::storage::{MemoryListCache, MemoryMessageStore};
    use crate::transport::{ConnectionCommand, ConnectionHandle, ConnectionRegistry};

    struct Harness {
        service: ChatService,
        rooms: Arc<MemoryRoomDirectory>,
        store: Arc<MemoryMessageStore>,
        registry: Arc<ConnectionRegistry>,
    }

    fn harness(max_participants: usize) -> Harness {
        let rooms = Arc::new(MemoryRoomDirectory::new());
        rooms.create_room("R1", "General", max_participants);
        let store = Arc::new(MemoryMessageStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let service = ChatService::new(
            &PipelineConfig::default(),
            rooms.clone(),
            store.clone(),
            Arc::new(MemoryListCache::new()),
            registry.clone(),
        );
        Harness {
            service,
            rooms,
            store,
            registry,
        }
    }

    fn drain(handle: &mut ConnectionHandle) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Ok(ConnectionCommand::Deliver(event)) = handle.commands.try_recv() {
            events.push(event);
        }
        events
    }

    async fn join_and_wait(service: &ChatService, user: &UserInfo) {
        let outcome = service.on_join("R1", user).await.unwrap();
        if let Some(announcement) = outcome.announcement {
            announcement.delivery.wait().await;
        }
    }

    #[tokio::test]
    async fn test_join_emits_once_and_rejoin_is_noop() {
        let h = harness(10);
        let alice = UserInfo::new("alice", "Alice");

        let first = h.service.on_join("R1", &alice).await.unwrap();
        let announcement = first.announcement.unwrap();
        assert_eq!(announcement.event.kind, EventKind::Join);
        announcement.delivery.wait().await;

        let again = h.service.on_join("R1", &alice).await.unwrap();
        assert!(again.announcement.is_none());
        assert_eq!(again.shard_id, first.shard_id);

        let room = h.rooms.find_room("R1").await.unwrap().unwrap();
        assert_eq!(room.current_participants, 1);
        let joins = h
            .service
            .recent_messages("R1")
            .await
            .into_iter()
            .filter(|e| e.kind == EventKind::Join)
            .count();
        assert_eq!(joins, 1);
    }

    #[tokio::test]
    async fn test_rejoin_after_leave_emits_once() {
        let h = harness(10);
        let alice = UserInfo::new("alice", "Alice");

        h.service.on_join("R1", &alice).await.unwrap();
        let left = h.service.on_leave("R1", &alice).await.unwrap();
        assert_eq!(left.event.kind, EventKind::Leave);
        assert_eq!(left.event.body, "Alice left the room.");

        let back = h.service.on_join("R1", &alice).await.unwrap();
        assert!(back.announcement.is_some());
        assert_eq!(
            h.rooms.participation("R1", "alice").await.unwrap(),
            MembershipState::Active
        );
    }

    #[tokio::test]
    async fn test_join_pushes_history_only_to_joiner() {
        let h = harness(10);
        let alice = UserInfo::new("alice", "Alice");
        let bob = UserInfo::new("bob", "Bob");
        let mut alice_conn = h.registry.register("alice").await;
        let mut bob_conn = h.registry.register("bob").await;

        join_and_wait(&h.service, &alice).await;
        h.service
            .on_message("R1", &alice, "hello")
            .await
            .unwrap()
            .delivery
            .wait()
            .await;
        drain(&mut alice_conn);

        let outcome = h.service.on_join("R1", &bob).await.unwrap();
        outcome.announcement.unwrap().delivery.wait().await;

        // join(alice), chat, join(bob)
        assert_eq!(outcome.history_sent, 3);
        let bob_events = drain(&mut bob_conn);
        let history: Vec<_> = bob_events
            .iter()
            .filter(|e| e.kind == EventKind::History)
            .collect();
        assert_eq!(history.len(), 3);

        let alice_events = drain(&mut alice_conn);
        assert_eq!(alice_events.len(), 1);
        assert_eq!(alice_events[0].kind, EventKind::Join);
        assert_eq!(alice_events[0].sender_id, "bob");
    }

    #[tokio::test]
    async fn test_room_full_and_missing_room() {
        let h = harness(1);
        h.service
            .on_join("R1", &UserInfo::new("alice", "Alice"))
            .await
            .unwrap();

        let full = h
            .service
            .on_join("R1", &UserInfo::new("bob", "Bob"))
            .await
            .unwrap_err();
        assert!(matches!(full, ChatError::RoomFull(_)));

        let missing = h
            .service
            .on_join("nope", &UserInfo::new("bob", "Bob"))
            .await
            .unwrap_err();
        assert!(matches!(missing, ChatError::RoomNotFound(_)));

        h.rooms.delete_room("R1");
        let deleted = h
            .service
            .on_join("R1", &UserInfo::new("bob", "Bob"))
            .await
            .unwrap_err();
        assert!(matches!(deleted, ChatError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_active_member_rejoins_full_room() {
        // A rejoin while active adds no participant, so a full room does not
        // turn it away
        let h = harness(1);
        let alice = UserInfo::new("alice", "Alice");
        h.service.on_join("R1", &alice).await.unwrap();
        assert!(h.rooms.find_room("R1").await.unwrap().unwrap().is_full());

        let again = h.service.on_join("R1", &alice).await.unwrap();
        assert!(again.announcement.is_none());
        assert_eq!(
            h.rooms.find_room("R1").await.unwrap().unwrap().current_participants,
            1
        );

        // After leaving, the same user counts as a new participant again
        h.service.on_leave("R1", &alice).await.unwrap();
        h.service.on_join("R1", &UserInfo::new("bob", "Bob")).await.unwrap();
        let back = h.service.on_join("R1", &alice).await.unwrap_err();
        assert!(matches!(back, ChatError::RoomFull(_)));
    }

    /// Yields inside every call, like a directory behind a network round-trip
    struct YieldingDirectory {
        inner: MemoryRoomDirectory,
    }

    #[async_trait::async_trait]
    impl RoomDirectory for YieldingDirectory {
        async fn find_room(&self, room_id: &str) -> Result<Option<crate::server::RoomInfo>> {
            tokio::task::yield_now().await;
            self.inner.find_room(room_id).await
        }

        async fn participation(&self, room_id: &str, user_id: &str) -> Result<MembershipState> {
            tokio::task::yield_now().await;
            self.inner.participation(room_id, user_id).await
        }

        async fn activate(&self, room_id: &str, user: &UserInfo) -> Result<()> {
            tokio::task::yield_now().await;
            self.inner.activate(room_id, user).await
        }

        async fn deactivate(&self, room_id: &str, user_id: &str) -> Result<bool> {
            tokio::task::yield_now().await;
            self.inner.deactivate(room_id, user_id).await
        }

        async fn increment_participants(&self, room_id: &str) -> Result<usize> {
            tokio::task::yield_now().await;
            self.inner.increment_participants(room_id).await
        }

        async fn decrement_participants(&self, room_id: &str) -> Result<usize> {
            tokio::task::yield_now().await;
            self.inner.decrement_participants(room_id).await
        }
    }

    fn yielding_service(max_participants: usize) -> (ChatService, Arc<YieldingDirectory>) {
        let inner = MemoryRoomDirectory::new();
        inner.create_room("R1", "General", max_participants);
        let rooms = Arc::new(YieldingDirectory { inner });
        let service = ChatService::new(
            &PipelineConfig::default(),
            rooms.clone(),
            Arc::new(MemoryMessageStore::new()),
            Arc::new(MemoryListCache::new()),
            Arc::new(ConnectionRegistry::new()),
        );
        (service, rooms)
    }

    #[tokio::test]
    async fn test_concurrent_first_joins_announce_once() {
        let (service, rooms) = yielding_service(1);
        let alice = UserInfo::new("alice", "Alice");

        let (a, b) = tokio::join!(service.on_join("R1", &alice), service.on_join("R1", &alice));
        let announcements = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(|outcome| outcome.announcement.is_some())
            .count();
        assert_eq!(announcements, 1);

        let room = rooms.find_room("R1").await.unwrap().unwrap();
        assert_eq!(room.current_participants, 1);
        let joins = service
            .recent_messages("R1")
            .await
            .into_iter()
            .filter(|e| e.kind == EventKind::Join)
            .count();
        assert_eq!(joins, 1);
    }

    #[tokio::test]
    async fn test_concurrent_joins_respect_capacity() {
        let (service, rooms) = yielding_service(1);
        let bob = UserInfo::new("bob", "Bob");
        let carol = UserInfo::new("carol", "Carol");

        let (b, c) = tokio::join!(service.on_join("R1", &bob), service.on_join("R1", &carol));
        assert_eq!(b.is_ok() as usize + c.is_ok() as usize, 1);
        let rejected = if b.is_err() { b.unwrap_err() } else { c.unwrap_err() };
        assert!(matches!(rejected, ChatError::RoomFull(_)));

        let room = rooms.find_room("R1").await.unwrap().unwrap();
        assert_eq!(room.current_participants, 1);
        assert_eq!(service.shards().total_users("R1"), 1);
    }

    #[tokio::test]
    async fn test_period_history_reads_the_store() {
        let h = harness(10);
        let alice = UserInfo::new("alice", "Alice");
        h.store
            .seed((1..=5).map(|i| {
                let mut event = ChatEvent::chat("R1", &alice, format!("m{}", i));
                event.timestamp = i * 100;
                event
            }))
            .await;

        let period = h.service.messages_between("R1", 200, 400).await.unwrap();
        let bodies: Vec<&str> = period.iter().map(|e| e.body.as_str()).collect();
        assert_eq!(bodies, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_leave_requires_participation() {
        let h = harness(10);
        let err = h
            .service
            .on_leave("R1", &UserInfo::new("ghost", "Ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotParticipant(_)));
    }

    #[tokio::test]
    async fn test_last_leave_cleans_local_cache() {
        let h = harness(10);
        let alice = UserInfo::new("alice", "Alice");
        h.service.on_join("R1", &alice).await.unwrap();
        assert!(h.service.cache().local().contains("R1"));

        h.service.on_leave("R1", &alice).await.unwrap();
        // the leave message itself repopulates the buffer after cleanup
        assert_eq!(h.service.cache().local().len("R1").await, 1);
        assert_eq!(h.service.shards().total_users("R1"), 0);
    }

    #[tokio::test]
    async fn test_message_validation() {
        let h = harness(10);
        let alice = UserInfo::new("alice", "Alice");

        let empty = h.service.on_message("R1", &alice, "   ").await.unwrap_err();
        assert!(matches!(empty, ChatError::InvalidMessage(_)));

        let long = "x".repeat(1001);
        let too_long = h.service.on_message("R1", &alice, &long).await.unwrap_err();
        assert!(matches!(too_long, ChatError::InvalidMessage(_)));

        let anon = h
            .service
            .on_message("R1", &UserInfo::new("", "anon"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(anon, ChatError::Auth(_)));

        let ok = h.service.on_message("R1", &alice, "x".repeat(1000).as_str()).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_message_flows_to_cache_persister_and_room() {
        let h = harness(10);
        let alice = UserInfo::new("alice", "Alice");
        let mut conn = h.registry.register("alice").await;
        join_and_wait(&h.service, &alice).await;
        drain(&mut conn);

        let published = h.service.on_message("R1", &alice, "  hi  ").await.unwrap();
        assert_eq!(published.event.body, "hi");
        published.delivery.wait().await;

        assert_eq!(drain(&mut conn), vec![published.event.clone()]);
        assert!(h
            .service
            .recent_messages("R1")
            .await
            .iter()
            .any(|e| e.id == published.event.id));

        h.service.persister().run_batch_once().await;
        assert!(h.store.contains(&published.event.id).await);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_membership() {
        let h = harness(10);
        let alice = UserInfo::new("alice", "Alice");
        h.service.on_join("R1", &alice).await.unwrap();

        assert!(h.service.on_disconnect("R1", "alice"));
        assert_eq!(h.service.shards().total_users("R1"), 0);
        assert_eq!(
            h.rooms.participation("R1", "alice").await.unwrap(),
            MembershipState::Active
        );
        let leaves = h
            .service
            .recent_messages("R1")
            .await
            .into_iter()
            .filter(|e| e.kind == EventKind::Leave)
            .count();
        assert_eq!(leaves, 0);
    }

    #[tokio::test]
    async fn test_error_notice_and_shutdown() {
        let h = harness(10);
        let mut conn = h.registry.register("alice").await;
        h.service
            .notify_error("R1", "alice", &ChatError::room_full("room R1 is full"))
            .await;
        let notice = drain(&mut conn);
        assert_eq!(notice.len(), 1);
        assert_eq!(notice[0].kind, EventKind::Error);

        h.service.shutdown().await;
        let err = h
            .service
            .on_message("R1", &UserInfo::new("alice", "Alice"), "late")
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::ShuttingDown);
    }
}
