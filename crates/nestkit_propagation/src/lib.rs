//! # nestkit propagation
//!
//! Change propagation engine for nestkit.
//!
//! This crate provides:
//! - A change log reader that keeps a durable cursor
//! - A router that de-duplicates records and fans them out concurrently
//! - Reaction consumers: notifications, credential hot-swap, cleanup
//! - The collaborator traits those consumers talk to
//!
//! ## Architecture
//!
//! A store-changed notification triggers one cycle:
//! 1. Read every transaction after the persisted cursor
//! 2. Persist the new cursor (before or after consumers, per
//!    [`CursorAdvance`])
//! 3. Flatten and de-duplicate the records
//! 4. Run every consumer concurrently and wait for all of them
//!
//! ## Key Invariants
//!
//! - The persisted cursor never moves backwards
//! - A missing or unusable cursor never replays existing history
//! - A consumer failure never affects sibling consumers or the cursor
//! - Consumers re-read current state; record payloads carry identity only

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod collaborators;
mod config;
mod consumers;
mod engine;
mod error;
mod notification;
mod reader;
mod router;

pub use collaborators::{
    CleanupRoutines, CredentialSession, MemoryNotificationCenter, NotificationCenter,
    SessionActor, SessionRegistry,
};
pub use config::{CursorAdvance, PropagationConfig};
pub use consumers::{
    CleanupConsumer, CleanupTarget, Consumer, ConsumerPriority, ConsumerReport,
    CredentialConsumer, NotificationConsumer,
};
pub use engine::{CycleResult, PropagationEngine, PropagationState, PropagationStats};
pub use error::{PropagationError, PropagationResult};
pub use notification::{
    change_lines, conjunctive_list, display_handle, ChangeLine, InterruptionLevel, ListWidth,
    NotificationContent, NotificationRequest, NotificationSound,
};
pub use reader::{ChangeLogReader, ReadBatch};
pub use router::{ChangeBatch, ChangeRouter, ConsumerOutcome, DispatchReport};
