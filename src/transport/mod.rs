//! Delivery side of the chat pipeline
//!
//! This module provides:
//! - Shard assignment of connected users per room
//! - The per-user delivery channel and a connection registry implementing it
//! - Parallel per-shard broadcast

pub mod broadcast;
pub mod connection;
pub mod shards;

// Re-export commonly used types
pub use broadcast::{
    BroadcastCompletion, BroadcastDispatcher, BroadcastStats, BroadcastSummary, DispatcherStats,
};
pub use connection::{
    ConnectionCommand, ConnectionHandle, ConnectionRegistry, DeliveryChannel, RegistryStats,
};
pub use shards::{RoomShardTable, ShardConfig, ShardManager, ShardStats};
