//! Shard management for room fan-out
//!
//! Every connected user of a room is placed in one of K fixed shards by
//! hashing the user id. The broadcast dispatcher runs one delivery task per
//! shard, so K bounds per-broadcast fan-out concurrency.
//!
//! Rooms live in a concurrent map; a room's shard table is only mutated while
//! holding that room's entry, so there is no lock spanning rooms.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::debug;

use crate::protocol::messages::{NUM_SHARDS, RoomId, ShardId, UserId};

/// Configuration for shard management
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Number of shards per room (default: 2)
    pub num_shards: ShardId,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            num_shards: NUM_SHARDS,
        }
    }
}

/// Shard index → connected users, for one room
pub type RoomShardTable = BTreeMap<ShardId, HashSet<UserId>>;

/// Shard manager counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub rooms: usize,
    pub users: usize,
    pub assignments: u64,
    pub removals: u64,
}

/// DJB2 over the user id bytes
#[inline]
fn djb2(bytes: &[u8]) -> u64 {
    bytes.iter().fold(5381u64, |hash, &b| {
        hash.wrapping_mul(33).wrapping_add(u64::from(b))
    })
}

/// Tracks which shard each connected user of each room belongs to
#[derive(Debug)]
pub struct ShardManager {
    config: ShardConfig,
    rooms: DashMap<RoomId, RoomShardTable>,
    assignments: AtomicU64,
    removals: AtomicU64,
}

impl ShardManager {
    pub fn new(config: ShardConfig) -> Self {
        let config = ShardConfig {
            num_shards: config.num_shards.max(1),
        };
        Self {
            config,
            rooms: DashMap::new(),
            assignments: AtomicU64::new(0),
            removals: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShardConfig::default())
    }

    pub fn num_shards(&self) -> ShardId {
        self.config.num_shards
    }

    /// Shard a user lands in, independent of any room
    #[inline]
    pub fn shard_for_user(&self, user_id: &str) -> ShardId {
        (djb2(user_id.as_bytes()) % u64::from(self.config.num_shards)) as ShardId
    }

    /// Place a user in its shard for a room. Idempotent.
    pub fn assign(&self, room_id: &str, user_id: &str) -> ShardId {
        let shard_id = self.shard_for_user(user_id);
        let inserted = self
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .entry(shard_id)
            .or_default()
            .insert(user_id.to_string());

        if inserted {
            self.assignments.fetch_add(1, Ordering::Relaxed);
            debug!(room_id = %room_id, user_id = %user_id, shard_id, "User assigned to shard");
        }
        shard_id
    }

    /// Remove a user from a room, pruning empty shards and the room itself
    pub fn remove(&self, room_id: &str, user_id: &str) -> bool {
        let Entry::Occupied(mut room) = self.rooms.entry(room_id.to_string()) else {
            return false;
        };

        let table = room.get_mut();
        let mut removed = false;
        table.retain(|_, users| {
            removed |= users.remove(user_id);
            !users.is_empty()
        });
        if table.is_empty() {
            room.remove();
        }

        if removed {
            self.removals.fetch_add(1, Ordering::Relaxed);
            debug!(room_id = %room_id, user_id = %user_id, "User removed from shard");
        }
        removed
    }

    /// Drop all sharding state for a room
    pub fn clear(&self, room_id: &str) {
        if self.rooms.remove(room_id).is_some() {
            debug!(room_id = %room_id, "Cleared shard table");
        }
    }

    /// Every connected user of a room
    pub fn all_users(&self, room_id: &str) -> HashSet<UserId> {
        self.rooms
            .get(room_id)
            .map(|table| table.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Users of one shard of a room
    pub fn users_in_shard(&self, room_id: &str, shard_id: ShardId) -> HashSet<UserId> {
        self.rooms
            .get(room_id)
            .and_then(|table| table.get(&shard_id).cloned())
            .unwrap_or_default()
    }

    /// Number of connected users in a room
    pub fn total_users(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|table| table.values().map(HashSet::len).sum())
            .unwrap_or(0)
    }

    /// Copy of a room's shard table, taken under the room's entry lock
    pub fn snapshot(&self, room_id: &str) -> RoomShardTable {
        self.rooms
            .get(room_id)
            .map(|table| table.clone())
            .unwrap_or_default()
    }

    /// Users per shard for a room
    pub fn shard_distribution(&self, room_id: &str) -> BTreeMap<ShardId, usize> {
        self.rooms
            .get(room_id)
            .map(|table| table.iter().map(|(id, users)| (*id, users.len())).collect())
            .unwrap_or_default()
    }

    /// Shard currently holding a user in a room, if connected
    pub fn shard_of(&self, room_id: &str, user_id: &str) -> Option<ShardId> {
        let table = self.rooms.get(room_id)?;
        table
            .iter()
            .find(|(_, users)| users.contains(user_id))
            .map(|(id, _)| *id)
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Log how a room's users are spread over shards
    pub fn log_shard_balance(&self, room_id: &str) {
        let distribution = self.shard_distribution(room_id);
        let total: usize = distribution.values().sum();
        debug!(
            room_id = %room_id,
            total_users = total,
            shards = ?distribution,
            "Shard balance"
        );
    }

    pub fn stats(&self) -> ShardStats {
        ShardStats {
            rooms: self.rooms.len(),
            users: self
                .rooms
                .iter()
                .map(|room| room.values().map(HashSet::len).sum::<usize>())
                .sum(),
            assignments: self.assignments.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
        }
    }
}
