//! Real-time chat message pipeline
//!
//! Events enter through the [`ChatService`], which records them in a
//! three-tier read cache, queues them for batched durable persistence and
//! fans them out to the room's connected users shard by shard.
//!
//! Rooms, participants, durable storage and the wire transport are external
//! collaborators, reached through the [`RoomDirectory`], [`MessageStore`],
//! [`ListCache`] and [`DeliveryChannel`] traits. In-memory implementations of
//! each ship with the crate, plus a Redis-backed [`ListCache`].

pub mod config;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transport;

pub use config::PipelineConfig;
pub use error::{ChatError, Result};
pub use pipeline::{BatchPersister, PersisterConfig, PersisterStats};
pub use protocol::{ChatEvent, EventKind, UserInfo};
pub use server::{ChatConfig, ChatService, MemoryRoomDirectory, RoomDirectory};
pub use storage::{
    CacheConfig, ListCache, MemoryListCache, MemoryMessageStore, MessageCache, MessageStore,
    RedisListCache,
};
pub use transport::{
    BroadcastDispatcher, ConnectionRegistry, DeliveryChannel, ShardConfig, ShardManager,
};

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique message ID
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
