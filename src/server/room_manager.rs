//! Room and participant persistence
//!
//! Rooms and participant rows are owned by the host application. The chat
//! service only needs existence and capacity checks, per-user participation
//! state and the room's participant counter, all behind [`RoomDirectory`].

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::messages::{RoomId, UserId, UserInfo};
use crate::server::membership::MembershipState;

/// Room as seen by the chat pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub name: String,
    pub max_participants: usize,
    pub current_participants: usize,
}

impl RoomInfo {
    pub fn is_full(&self) -> bool {
        self.current_participants >= self.max_participants
    }
}

/// Room and participant storage
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Active room by id
    async fn find_room(&self, room_id: &str) -> Result<Option<RoomInfo>>;

    /// Current membership of a user in a room
    async fn participation(&self, room_id: &str, user_id: &str) -> Result<MembershipState>;

    /// Create or reactivate the user's participant row
    async fn activate(&self, room_id: &str, user: &UserInfo) -> Result<()>;

    /// Deactivate the user's participant row. `false` when no active row existed.
    async fn deactivate(&self, room_id: &str, user_id: &str) -> Result<bool>;

    /// Increment the participant counter, returning the new value
    async fn increment_participants(&self, room_id: &str) -> Result<usize>;

    /// Decrement the participant counter (saturating), returning the new value
    async fn decrement_participants(&self, room_id: &str) -> Result<usize>;
}

/// A participant row
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    pub active: bool,
    pub joined_at: u64,
    pub left_at: Option<u64>,
}

#[derive(Debug)]
struct RoomRecord {
    info: RoomInfo,
    participants: HashMap<UserId, Participant>,
}

/// In-memory [`RoomDirectory`]
#[derive(Debug, Default)]
pub struct MemoryRoomDirectory {
    rooms: DashMap<RoomId, RoomRecord>,
}

impl MemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty room
    pub fn create_room(
        &self,
        room_id: impl Into<RoomId>,
        name: impl Into<String>,
        max_participants: usize,
    ) -> RoomInfo {
        let info = RoomInfo {
            room_id: room_id.into(),
            name: name.into(),
            max_participants,
            current_participants: 0,
        };
        self.rooms.insert(
            info.room_id.clone(),
            RoomRecord {
                info: info.clone(),
                participants: HashMap::new(),
            },
        );
        info!(room_id = %info.room_id, max_participants, "Room created");
        info
    }

    /// Remove a room entirely
    pub fn delete_room(&self, room_id: &str) -> bool {
        self.rooms.remove(room_id).is_some()
    }

    /// Active participant rows of a room
    pub fn active_participants(&self, room_id: &str) -> Vec<Participant> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.participants
                    .values()
                    .filter(|p| p.active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

fn missing(room_id: &str) -> ChatError {
    ChatError::room_not_found(format!("room {} does not exist", room_id))
}

#[async_trait]
impl RoomDirectory for MemoryRoomDirectory {
    async fn find_room(&self, room_id: &str) -> Result<Option<RoomInfo>> {
        Ok(self.rooms.get(room_id).map(|room| room.info.clone()))
    }

    async fn participation(&self, room_id: &str, user_id: &str) -> Result<MembershipState> {
        let room = self.rooms.get(room_id).ok_or_else(|| missing(room_id))?;
        Ok(match room.participants.get(user_id) {
            Some(p) if p.active => MembershipState::Active,
            Some(_) => MembershipState::Inactive,
            None => MembershipState::None,
        })
    }

    async fn activate(&self, room_id: &str, user: &UserInfo) -> Result<()> {
        let mut room = self.rooms.get_mut(room_id).ok_or_else(|| missing(room_id))?;
        let now = current_timestamp();
        room.participants
            .entry(user.user_id.clone())
            .and_modify(|p| {
                p.active = true;
                p.display_name = user.display_name.clone();
                p.joined_at = now;
                p.left_at = None;
            })
            .or_insert_with(|| Participant {
                user_id: user.user_id.clone(),
                display_name: user.display_name.clone(),
                active: true,
                joined_at: now,
                left_at: None,
            });
        debug!(room_id = %room_id, user_id = %user.user_id, "Participant activated");
        Ok(())
    }

    async fn deactivate(&self, room_id: &str, user_id: &str) -> Result<bool> {
        let mut room = self.rooms.get_mut(room_id).ok_or_else(|| missing(room_id))?;
        match room.participants.get_mut(user_id) {
            Some(p) if p.active => {
                p.active = false;
                p.left_at = Some(current_timestamp());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_participants(&self, room_id: &str) -> Result<usize> {
        let mut room = self.rooms.get_mut(room_id).ok_or_else(|| missing(room_id))?;
        room.info.current_participants += 1;
        Ok(room.info.current_participants)
    }

    async fn decrement_participants(&self, room_id: &str) -> Result<usize> {
        let mut room = self.rooms.get_mut(room_id).ok_or_else(|| missing(room_id))?;
        room.info.current_participants = room.info.current_participants.saturating_sub(1);
        Ok(room.info.current_participants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_room_lifecycle() {
        let directory = MemoryRoomDirectory::new();
        directory.create_room("R1", "General", 2);

        let room = directory.find_room("R1").await.unwrap().unwrap();
        assert_eq!(room.name, "General");
        assert!(!room.is_full());
        assert!(directory.find_room("missing").await.unwrap().is_none());

        assert_eq!(directory.increment_participants("R1").await.unwrap(), 1);
        assert_eq!(directory.increment_participants("R1").await.unwrap(), 2);
        assert!(directory.find_room("R1").await.unwrap().unwrap().is_full());
        assert_eq!(directory.decrement_participants("R1").await.unwrap(), 1);

        assert!(directory.delete_room("R1"));
        assert!(!directory.delete_room("R1"));
        assert!(directory.find_room("R1").await.unwrap().is_none());
        assert_eq!(directory.room_count(), 0);
    }

    #[tokio::test]
    async fn test_participation_states() {
        let directory = MemoryRoomDirectory::new();
        directory.create_room("R1", "General", 10);
        let alice = UserInfo::new("alice", "Alice");

        assert_eq!(
            directory.participation("R1", "alice").await.unwrap(),
            MembershipState::None
        );
        directory.activate("R1", &alice).await.unwrap();
        assert_eq!(
            directory.participation("R1", "alice").await.unwrap(),
            MembershipState::Active
        );
        assert!(directory.deactivate("R1", "alice").await.unwrap());
        assert!(!directory.deactivate("R1", "alice").await.unwrap());
        assert_eq!(
            directory.participation("R1", "alice").await.unwrap(),
            MembershipState::Inactive
        );
        assert!(directory.active_participants("R1").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_room_is_domain_error() {
        let directory = MemoryRoomDirectory::new();
        let err = directory.participation("nope", "alice").await.unwrap_err();
        assert!(matches!(err, ChatError::RoomNotFound(_)));
        assert!(err.is_domain());
    }
}
