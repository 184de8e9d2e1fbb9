//! Write path of the chat pipeline
//!
//! This module provides:
//! - The bounded intake queue and adaptive batch persister
//! - Batch size planning and adjustment

pub mod persister;
pub mod sizing;

pub use persister::{
    BatchPersister, BatchReport, DeadLetterSink, DropReason, LogDeadLetters, PersisterConfig,
    PersisterStats, RetryReport, SubmitOutcome,
};
pub use sizing::{BatchBounds, RunObservation, adjust_batch_size, plan_batch};
