//! Storage layer
//!
//! This module provides:
//! - The durable message store interface and an in-memory implementation
//! - The distributed list cache interface with in-memory and Redis backends
//! - The in-process hot tier and the tiered read cache built on top

pub mod distributed;
pub mod durable;
pub mod local;
pub mod redis_cache;
pub mod tiered;

pub use distributed::{ListCache, MemoryListCache};
pub use durable::{MemoryMessageStore, MessageStore};
pub use local::LocalTier;
pub use redis_cache::RedisListCache;
pub use tiered::{CacheConfig, CacheStats, CacheTier, MessageCache};
