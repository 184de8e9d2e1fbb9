//! Per-user delivery
//!
//! The wire transport is outside this crate. Each connected user is
//! represented by an unbounded command channel whose receiving end belongs to
//! whatever task owns the socket; the pipeline only ever pushes into it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::generate_message_id;
use crate::protocol::messages::{ChatEvent, UserId};

/// Delivers one event to one user
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Fire-and-forget push. An error affects this call only.
    async fn deliver(&self, user_id: &str, event: &ChatEvent) -> Result<()>;
}

/// Commands sent to a connection's owning task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCommand {
    /// Push an event to the client
    Deliver(ChatEvent),
    /// Close the connection with a reason
    Close(String),
}

#[derive(Debug)]
struct ActiveConnection {
    conn_id: String,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    connected_at: u64,
}

/// Handed to the transport when a user connects
#[derive(Debug)]
pub struct ConnectionHandle {
    pub conn_id: String,
    pub user_id: UserId,
    pub commands: mpsc::UnboundedReceiver<ConnectionCommand>,
}

/// Registry counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub connections: usize,
    pub delivered: u64,
    pub undeliverable: u64,
}

/// Connected users and their command channels
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, ActiveConnection>>,
    delivered: AtomicU64,
    undeliverable: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user's connection, replacing any previous one
    pub async fn register(&self, user_id: &str) -> ConnectionHandle {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let conn_id = generate_message_id();

        let previous = self.connections.write().await.insert(
            user_id.to_string(),
            ActiveConnection {
                conn_id: conn_id.clone(),
                command_tx,
                connected_at: current_timestamp(),
            },
        );
        if let Some(previous) = previous {
            let _ = previous
                .command_tx
                .send(ConnectionCommand::Close("Replaced by a new connection".to_string()));
            debug!(user_id = %user_id, old_conn = %previous.conn_id, "Replaced connection");
        }

        debug!(user_id = %user_id, conn_id = %conn_id, "Connection registered");
        ConnectionHandle {
            conn_id,
            user_id: user_id.to_string(),
            commands,
        }
    }

    /// Remove a user's connection if it is still the one identified by `conn_id`
    pub async fn unregister(&self, user_id: &str, conn_id: &str) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get(user_id) {
            Some(conn) if conn.conn_id == conn_id => {
                let connected_for = current_timestamp().saturating_sub(conn.connected_at);
                conns.remove(user_id);
                debug!(user_id = %user_id, conn_id = %conn_id, connected_ms = connected_for, "Connection unregistered");
                true
            }
            _ => false,
        }
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.connections.read().await.contains_key(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Ask every connection to close and forget them
    pub async fn close_all(&self, reason: &str) {
        let mut conns = self.connections.write().await;
        for conn in conns.values() {
            let _ = conn
                .command_tx
                .send(ConnectionCommand::Close(reason.to_string()));
        }
        let count = conns.len();
        conns.clear();
        info!(count, reason = %reason, "Closed all connections");
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connection_count().await,
            delivered: self.delivered.load(Ordering::Relaxed),
            undeliverable: self.undeliverable.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DeliveryChannel for ConnectionRegistry {
    async fn deliver(&self, user_id: &str, event: &ChatEvent) -> Result<()> {
        let result = {
            let conns = self.connections.read().await;
            match conns.get(user_id) {
                Some(conn) => conn
                    .command_tx
                    .send(ConnectionCommand::Deliver(event.clone()))
                    .map_err(|_| ChatError::delivery(format!("connection of {} is closed", user_id))),
                None => Err(ChatError::delivery(format!("{} is not connected", user_id))),
            }
        };

        match &result {
            Ok(()) => self.delivered.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.undeliverable.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::UserInfo;

    fn event() -> ChatEvent {
        ChatEvent::chat("room-1", &UserInfo::new("u-1", "alice"), "hi")
    }

    #[tokio::test]
    async fn test_deliver_to_registered_user() {
        let registry = ConnectionRegistry::new();
        let mut handle = registry.register("bob").await;

        let e = event();
        registry.deliver("bob", &e).await.unwrap();
        assert_eq!(handle.commands.recv().await, Some(ConnectionCommand::Deliver(e)));
        assert_eq!(registry.stats().await.delivered, 1);
    }

    #[tokio::test]
    async fn test_deliver_to_unknown_user_fails() {
        let registry = ConnectionRegistry::new();
        let err = registry.deliver("ghost", &event()).await.unwrap_err();
        assert!(matches!(err, ChatError::Delivery(_)));
        assert_eq!(registry.stats().await.undeliverable, 1);
    }

    #[tokio::test]
    async fn test_deliver_after_receiver_dropped_fails() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register("bob").await;
        drop(handle);
        assert!(registry.deliver("bob", &event()).await.is_err());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_and_stale_unregister_is_ignored() {
        let registry = ConnectionRegistry::new();
        let mut first = registry.register("bob").await;
        let second = registry.register("bob").await;

        assert!(matches!(
            first.commands.recv().await,
            Some(ConnectionCommand::Close(_))
        ));
        assert!(!registry.unregister("bob", &first.conn_id).await);
        assert!(registry.is_connected("bob").await);
        assert!(registry.unregister("bob", &second.conn_id).await);
        assert_eq!(registry.connection_count().await, 0);
    }
}
