//! Protocol layer for the chat pipeline
//!
//! This module provides:
//! - Chat event and user types
//! - JSON codec for distributed cache entries

pub mod codec;
pub mod messages;

// Re-export commonly used types
pub use codec::{decode, decode_lossy, encode};
pub use messages::*;
