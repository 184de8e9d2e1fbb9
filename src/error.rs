//! Error handling for the chat pipeline

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat pipeline error types
///
/// The first group are domain errors raised to the caller of the chat
/// service. The second group are infrastructure faults; the pipeline absorbs
/// them (log + count) and they only surface from the collaborator traits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Sender could not be resolved to an authenticated user
    Auth(String),
    /// Invalid message content
    InvalidMessage(String),
    /// Room not found or inactive
    RoomNotFound(String),
    /// Room reached its participant limit
    RoomFull(String),
    /// User is not an active participant of the room
    NotParticipant(String),
    /// Durable store failure
    Storage(String),
    /// Distributed cache failure
    Cache(String),
    /// Per-user delivery failure
    Delivery(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Configuration error
    Config(String),
    /// Pipeline is shutting down
    ShuttingDown,
    /// Internal error
    Internal(String),
}

impl ChatError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Auth(_) => 1002,
            ChatError::InvalidMessage(_) => 1005,
            ChatError::RoomNotFound(_) => 1007,
            ChatError::RoomFull(_) => 1013,
            ChatError::NotParticipant(_) => 1014,
            ChatError::Storage(_) => 1020,
            ChatError::Cache(_) => 1021,
            ChatError::Delivery(_) => 1022,
            ChatError::Serialization(_) => 1001,
            ChatError::Config(_) => 1010,
            ChatError::ShuttingDown => 1030,
            ChatError::Internal(_) => 1009,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::Auth(msg)
            | ChatError::InvalidMessage(msg)
            | ChatError::RoomNotFound(msg)
            | ChatError::RoomFull(msg)
            | ChatError::NotParticipant(msg)
            | ChatError::Storage(msg)
            | ChatError::Cache(msg)
            | ChatError::Delivery(msg)
            | ChatError::Serialization(msg)
            | ChatError::Config(msg)
            | ChatError::Internal(msg) => msg,
            ChatError::ShuttingDown => "pipeline is shutting down",
        }
    }

    /// Whether this error is a caller-facing domain rejection
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            ChatError::Auth(_)
                | ChatError::InvalidMessage(_)
                | ChatError::RoomNotFound(_)
                | ChatError::RoomFull(_)
                | ChatError::NotParticipant(_)
        )
    }

    /// Create an authentication error
    pub fn auth<T: Into<String>>(msg: T) -> Self {
        ChatError::Auth(msg.into())
    }

    /// Create an invalid message error
    pub fn invalid_message<T: Into<String>>(msg: T) -> Self {
        ChatError::InvalidMessage(msg.into())
    }

    /// Create a room not found error
    pub fn room_not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::RoomNotFound(msg.into())
    }

    /// Create a room full error
    pub fn room_full<T: Into<String>>(msg: T) -> Self {
        ChatError::RoomFull(msg.into())
    }

    /// Create a not-participant error
    pub fn not_participant<T: Into<String>>(msg: T) -> Self {
        ChatError::NotParticipant(msg.into())
    }

    /// Create a storage error
    pub fn storage<T: Into<String>>(msg: T) -> Self {
        ChatError::Storage(msg.into())
    }

    /// Create a cache error
    pub fn cache<T: Into<String>>(msg: T) -> Self {
        ChatError::Cache(msg.into())
    }

    /// Create a delivery error
    pub fn delivery<T: Into<String>>(msg: T) -> Self {
        ChatError::Delivery(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ChatError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
            ChatError::RoomNotFound(msg) => write!(f, "Room not found: {}", msg),
            ChatError::RoomFull(msg) => write!(f, "Room is full: {}", msg),
            ChatError::NotParticipant(msg) => write!(f, "Not a participant: {}", msg),
            ChatError::Storage(msg) => write!(f, "Storage error: {}", msg),
            ChatError::Cache(msg) => write!(f, "Cache error: {}", msg),
            ChatError::Delivery(msg) => write!(f, "Delivery error: {}", msg),
            ChatError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChatError::ShuttingDown => write!(f, "Pipeline is shutting down"),
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(err: redis::RedisError) -> Self {
        ChatError::Cache(format!("Redis error: {}", err))
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Internal(format!("Anyhow error: {}", err))
    }
}
