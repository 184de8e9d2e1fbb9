//! Parallel fan-out of room events
//!
//! A broadcast snapshots the room's shard table and spawns one delivery task
//! per non-empty shard. Each task walks its shard's users sequentially; a
//! failed delivery is logged and counted and the task moves on. The returned
//! [`BroadcastCompletion`] resolves once every shard task has finished.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::protocol::messages::{ChatEvent, RoomId, ShardId};
use crate::transport::connection::DeliveryChannel;
use crate::transport::shards::{RoomShardTable, ShardManager};

/// Outcome of one finished broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastSummary {
    pub shards: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Completion signal of a broadcast
#[derive(Debug)]
pub enum BroadcastCompletion {
    /// Nothing to deliver
    Ready,
    /// Shard tasks are running
    Pending(JoinHandle<BroadcastSummary>),
}

impl BroadcastCompletion {
    /// Wait for every shard task. A panicking join task yields an empty summary.
    pub async fn wait(self) -> BroadcastSummary {
        match self {
            BroadcastCompletion::Ready => BroadcastSummary::default(),
            BroadcastCompletion::Pending(handle) => match handle.await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(error = %e, "Broadcast join task failed");
                    BroadcastSummary::default()
                }
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, BroadcastCompletion::Ready)
    }
}

/// Timing and distribution of one broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub room_id: RoomId,
    pub total_users: usize,
    pub shard_count: usize,
    pub duration: Duration,
    pub shard_distribution: BTreeMap<ShardId, usize>,
    pub delivered: usize,
    pub failed: usize,
}

/// Dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub broadcasts: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Fans events out to a room's connected users, one task per shard
pub struct BroadcastDispatcher {
    shards: Arc<ShardManager>,
    channel: Arc<dyn DeliveryChannel>,
    counters: Arc<Counters>,
}

impl BroadcastDispatcher {
    pub fn new(shards: Arc<ShardManager>, channel: Arc<dyn DeliveryChannel>) -> Self {
        Self {
            shards,
            channel,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn shards(&self) -> &Arc<ShardManager> {
        &self.shards
    }

    /// Start delivering `event` to every connected user of the room
    pub fn broadcast(&self, room_id: &str, event: &ChatEvent) -> BroadcastCompletion {
        let table = self.shards.snapshot(room_id);
        self.dispatch(room_id, table, event)
    }

    fn dispatch(
        &self,
        room_id: &str,
        table: RoomShardTable,
        event: &ChatEvent,
    ) -> BroadcastCompletion {
        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);

        if table.is_empty() {
            debug!(room_id = %room_id, "No connected users, nothing to broadcast");
            return BroadcastCompletion::Ready;
        }

        let event = Arc::new(event.clone());
        let mut tasks = JoinSet::new();
        for (shard_id, users) in table.into_iter().filter(|(_, users)| !users.is_empty()) {
            let channel = self.channel.clone();
            let counters = self.counters.clone();
            let event = event.clone();
            let room_id = room_id.to_string();

            tasks.spawn(async move {
                let mut delivered = 0usize;
                let mut failed = 0usize;
                for user_id in &users {
                    match channel.deliver(user_id, &event).await {
                        Ok(()) => delivered += 1,
                        Err(e) => {
                            failed += 1;
                            warn!(
                                room_id = %room_id,
                                shard_id,
                                user_id = %user_id,
                                error = %e,
                                "Delivery failed"
                            );
                        }
                    }
                }
                counters.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
                counters.delivery_failures.fetch_add(failed as u64, Ordering::Relaxed);
                (delivered, failed)
            });
        }

        let room_id = room_id.to_string();
        BroadcastCompletion::Pending(tokio::spawn(async move {
            let mut summary = BroadcastSummary::default();
            while let Some(joined) = tasks.join_next().await {
                summary.shards += 1;
                match joined {
                    Ok((delivered, failed)) => {
                        summary.delivered += delivered;
                        summary.failed += failed;
                    }
                    Err(e) => error!(room_id = %room_id, error = %e, "Shard delivery task failed"),
                }
            }
            summary
        }))
    }

    /// Broadcast, wait, and report timing and shard distribution
    pub async fn broadcast_with_stats(&self, room_id: &str, event: &ChatEvent) -> BroadcastStats {
        let started = Instant::now();
        let table = self.shards.snapshot(room_id);
        let shard_distribution: BTreeMap<ShardId, usize> = table
            .iter()
            .filter(|(_, users)| !users.is_empty())
            .map(|(shard_id, users)| (*shard_id, users.len()))
            .collect();
        let summary = self.dispatch(room_id, table, event).wait().await;

        let stats = BroadcastStats {
            room_id: room_id.to_string(),
            total_users: shard_distribution.values().sum(),
            shard_count: shard_distribution.len(),
            duration: started.elapsed(),
            shard_distribution,
            delivered: summary.delivered,
            failed: summary.failed,
        };
        debug!(
            room_id = %room_id,
            total_users = stats.total_users,
            shard_count = stats.shard_count,
            duration_us = stats.duration.as_micros() as u64,
            "Broadcast complete"
        );
        stats
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.counters.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChatError, Result};
    use crate::protocol::messages::UserInfo;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    /// Records deliveries and fails for a fixed set of users
    #[derive(Default)]
    struct RecordingChannel {
        delivered: Mutex<Vec<(String, String)>>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl DeliveryChannel for RecordingChannel {
        async fn deliver(&self, user_id: &str, event: &ChatEvent) -> Result<()> {
            if self.failing.contains(user_id) {
                return Err(ChatError::delivery("socket reset"));
            }
            self.delivered
                .lock()
                .await
                .push((user_id.to_string(), event.id.clone()));
            Ok(())
        }
    }

    fn event() -> ChatEvent {
        ChatEvent::chat("R1", &UserInfo::new("u-1", "alice"), "hi")
    }

    #[tokio::test]
    async fn test_empty_room_is_immediate_noop() {
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = BroadcastDispatcher::new(Arc::new(ShardManager::with_defaults()), channel.clone());

        let completion = dispatcher.broadcast("R1", &event());
        assert!(completion.is_ready());
        assert_eq!(completion.wait().await, BroadcastSummary::default());
        assert!(channel.delivered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_delivers_once_per_user() {
        let shards = Arc::new(ShardManager::with_defaults());
        for user in ["a", "b", "c", "d", "e"] {
            shards.assign("R1", user);
        }
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = BroadcastDispatcher::new(shards.clone(), channel.clone());

        let e = event();
        let summary = dispatcher.broadcast("R1", &e).wait().await;
        assert_eq!(summary.delivered, 5);
        assert_eq!(summary.shards, shards.shard_distribution("R1").len());

        let delivered = channel.delivered.lock().await;
        let users: HashSet<&str> = delivered.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(users.len(), 5);
        assert!(delivered.iter().all(|(_, id)| *id == e.id));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let shards = Arc::new(ShardManager::with_defaults());
        for user in ["a", "b", "c", "d"] {
            shards.assign("R1", user);
        }
        let channel = Arc::new(RecordingChannel {
            failing: HashSet::from(["a".to_string(), "c".to_string()]),
            ..Default::default()
        });
        let dispatcher = BroadcastDispatcher::new(shards, channel.clone());

        let summary = dispatcher.broadcast("R1", &event()).wait().await;
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(dispatcher.stats().delivery_failures, 2);
        assert_eq!(channel.delivered.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_with_stats() {
        let shards = Arc::new(ShardManager::with_defaults());
        for user in ["a", "b", "c"] {
            shards.assign("R1", user);
        }
        let dispatcher = BroadcastDispatcher::new(shards.clone(), Arc::new(RecordingChannel::default()));

        let stats = dispatcher.broadcast_with_stats("R1", &event()).await;
        assert_eq!(stats.room_id, "R1");
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.shard_distribution, shards.shard_distribution("R1"));
        assert_eq!(stats.shard_count, stats.shard_distribution.len());
    }

    /// Moves a new user into the room on its first delivery
    struct JoiningChannel {
        shards: Arc<ShardManager>,
        delivered: Mutex<usize>,
    }

    #[async_trait]
    impl DeliveryChannel for JoiningChannel {
        async fn deliver(&self, _user_id: &str, _event: &ChatEvent) -> Result<()> {
            let mut delivered = self.delivered.lock().await;
            if *delivered == 0 {
                self.shards.assign("R1", "late");
            }
            *delivered += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stats_match_the_delivered_snapshot() {
        let shards = Arc::new(ShardManager::with_defaults());
        for user in ["a", "b", "c"] {
            shards.assign("R1", user);
        }
        let channel = Arc::new(JoiningChannel {
            shards: shards.clone(),
            delivered: Mutex::new(0),
        });
        let dispatcher = BroadcastDispatcher::new(shards.clone(), channel.clone());

        let stats = dispatcher.broadcast_with_stats("R1", &event()).await;
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.shard_distribution.values().sum::<usize>(), 3);
        assert_eq!(*channel.delivered.lock().await, 3);
        assert_eq!(shards.total_users("R1"), 4);
    }
}
