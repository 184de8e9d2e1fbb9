//! Chat event types flowing through the pipeline
//!
//! A [`ChatEvent`] is created once by the chat service and then shared by the
//! cache tiers, the batch persister and the broadcast dispatcher. Events are
//! treated as immutable after creation; identity is the `id` field.

use serde::{Deserialize, Serialize};

use crate::{current_timestamp, generate_message_id};

/// Unique identifier types
pub type UserId = String;
pub type RoomId = String;
pub type MessageId = String;
pub type ShardId = u16;

/// Default number of shards per room
pub const NUM_SHARDS: ShardId = 2;

/// Display name used for system-generated events
pub const SYSTEM_SENDER: &str = "system";

/// Kind of chat event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Chat,
    Join,
    Leave,
    Error,
    History,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Chat => "CHAT",
            EventKind::Join => "JOIN",
            EventKind::Leave => "LEAVE",
            EventKind::Error => "ERROR",
            EventKind::History => "HISTORY",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User information resolved by the identity layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl UserInfo {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

/// A chat event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Opaque unique id
    pub id: MessageId,
    /// Room the event belongs to
    pub room_id: RoomId,
    /// Sender user id
    pub sender_id: UserId,
    /// Sender display name
    pub sender_name: String,
    /// Sender avatar URL (optional)
    pub sender_avatar_url: Option<String>,
    /// Event kind
    pub kind: EventKind,
    /// Message body
    pub body: String,
    /// Timestamp (Unix ms)
    pub timestamp: u64,
}

impl ChatEvent {
    fn from_sender(room_id: &str, sender: &UserInfo, kind: EventKind, body: String) -> Self {
        Self {
            id: generate_message_id(),
            room_id: room_id.to_string(),
            sender_id: sender.user_id.clone(),
            sender_name: sender.display_name.clone(),
            sender_avatar_url: sender.avatar_url.clone(),
            kind,
            body,
            timestamp: current_timestamp(),
        }
    }

    /// Regular chat message
    pub fn chat(room_id: &str, sender: &UserInfo, body: impl Into<String>) -> Self {
        Self::from_sender(room_id, sender, EventKind::Chat, body.into())
    }

    /// Join announcement
    pub fn join(room_id: &str, user: &UserInfo) -> Self {
        let body = format!("{} joined the room.", user.display_name);
        Self::from_sender(room_id, user, EventKind::Join, body)
    }

    /// Leave announcement
    pub fn leave(room_id: &str, user: &UserInfo) -> Self {
        let body = format!("{} left the room.", user.display_name);
        Self::from_sender(room_id, user, EventKind::Leave, body)
    }

    /// System error notice addressed to a single user
    pub fn error(room_id: &str, body: impl Into<String>) -> Self {
        let system = UserInfo::new(SYSTEM_SENDER, SYSTEM_SENDER);
        Self::from_sender(room_id, &system, EventKind::Error, body.into())
    }

    /// Re-tag a stored event for a history push. Keeps id and timestamp.
    pub fn as_history(&self) -> Self {
        Self {
            kind: EventKind::History,
            ..self.clone()
        }
    }

    /// Fill in id and timestamp when a producer left them empty
    pub fn with_identity(mut self) -> Self {
        if self.id.is_empty() {
            self.id = generate_message_id();
        }
        if self.timestamp == 0 {
            self.timestamp = current_timestamp();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserInfo {
        UserInfo::new("u-1", "alice").with_avatar("https://cdn.example/a.png")
    }

    #[test]
    fn test_chat_event_copies_sender() {
        let event = ChatEvent::chat("room-1", &alice(), "hello");
        assert_eq!(event.room_id, "room-1");
        assert_eq!(event.sender_id, "u-1");
        assert_eq!(event.sender_name, "alice");
        assert_eq!(
            event.sender_avatar_url.as_deref(),
            Some("https://cdn.example/a.png")
        );
        assert_eq!(event.kind, EventKind::Chat);
        assert!(!event.id.is_empty());
        assert!(event.timestamp > 0);
    }

    #[test]
    fn test_join_leave_bodies() {
        let join = ChatEvent::join("room-1", &alice());
        let leave = ChatEvent::leave("room-1", &alice());
        assert_eq!(join.kind, EventKind::Join);
        assert_eq!(join.body, "alice joined the room.");
        assert_eq!(leave.kind, EventKind::Leave);
        assert_eq!(leave.body, "alice left the room.");
        assert_ne!(join.id, leave.id);
    }

    #[test]
    fn test_history_keeps_identity() {
        let event = ChatEvent::chat("room-1", &alice(), "hello");
        let history = event.as_history();
        assert_eq!(history.kind, EventKind::History);
        assert_eq!(history.id, event.id);
        assert_eq!(history.timestamp, event.timestamp);
        assert_eq!(history.body, event.body);
    }

    #[test]
    fn test_with_identity_fills_gaps() {
        let mut event = ChatEvent::error("room-1", "boom");
        assert_eq!(event.sender_id, SYSTEM_SENDER);
        event.id.clear();
        event.timestamp = 0;

        let event = event.with_identity();
        assert!(!event.id.is_empty());
        assert!(event.timestamp > 0);
    }

    #[test]
    fn test_kind_serializes_uppercase() {
        let json = serde_json::to_string(&EventKind::History).unwrap();
        assert_eq!(json, "\"HISTORY\"");
        assert_eq!(EventKind::Leave.to_string(), "LEAVE");
    }
}
