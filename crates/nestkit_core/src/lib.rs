//! # nestkit core
//!
//! Domain model and store plumbing shared by the propagation engine and the
//! asset cache.
//!
//! This crate provides:
//! - Object identifiers, change records and history tokens
//! - An append-only change history with bounded retention
//! - Cursor persistence (in memory and file-backed)
//! - Snapshot, preferences and asset models
//! - An in-memory reference store that records every commit in its history
//! - The serialized asset write context
//! - The background execution guard
//!
//! ## Key Invariants
//!
//! - History tokens are strictly increasing in commit order
//! - Every store commit appends exactly one transaction
//! - A persisted cursor never moves backwards
//! - Asset rows are never deleted here

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod background;
mod config;
mod cursor;
mod error;
mod hash;
mod history;
mod memory;
mod models;
mod store;
mod types;
mod write_context;

pub use background::{
    with_extended_background_execution, BudgetHost, ExecutionExpired, ExtensionGrant,
    ForegroundHost, LifecycleHost,
};
pub use config::HistoryConfig;
pub use cursor::{decode_cursor, encode_cursor, CursorStore, FileCursorStore, MemoryCursorStore};
pub use error::{CoreError, CoreResult};
pub use hash::ContentHash;
pub use history::{ChangeLog, MemoryHistory};
pub use memory::{MemoryStore, StoreWriter};
pub use models::{
    Account, AssetRecord, Credential, Preferences, Relation, User, UserDetail, UserIdsChanges,
};
pub use store::{preceding_user_detail, AssetMetadata, AssetMutation, AssetStore, Store};
pub use types::{
    ChangeKind, ChangeRecord, EntityKind, HistoryToken, ObjectId, StoreChanged, Transaction,
};
pub use write_context::{changed_metadata, WriteContext};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
