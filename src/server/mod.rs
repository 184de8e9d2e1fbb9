//! Chat orchestration layer
//!
//! This module provides:
//! - The per-room membership state machine
//! - The room directory interface and an in-memory implementation
//! - The chat service sequencing join, leave and message handling

pub mod chat_service;
pub mod membership;
pub mod room_manager;

pub use chat_service::{ChatConfig, ChatService, ChatStats, JoinOutcome, Published};
pub use membership::{MembershipEvent, MembershipState, Transition, transition};
pub use room_manager::{MemoryRoomDirectory, Participant, RoomDirectory, RoomInfo};
