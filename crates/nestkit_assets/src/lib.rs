//! # nestkit assets
//!
//! Content-addressable cache for binary assets (profile images, banners,
//! media) referenced by user snapshots.
//!
//! This crate provides:
//! - Conditional downloads (`If-Modified-Since` while a row is fresh)
//! - In-flight de-duplication keyed by normalized request
//! - Hash de-duplication of stored bodies (SHA-512)
//! - Coalesced commits on settle and on memory pressure
//! - A mock transfer session for tests
//!
//! ## Architecture
//!
//! ```text
//! DownloadRequest ─▶ DownloadScheduler ─▶ TransferSession
//!                                               │ completions
//!                                               ▼
//!            AssetStore ◀─ save ─ AssetWriter ◀─ AssetManager (group)
//! ```
//!
//! Asset commits are ordinary store transactions, so they show up in the
//! change history like any other write.
//!
//! ## Key Invariants
//!
//! - Two consecutive rows for a url never hold identical bytes
//! - At most one live transfer per normalized request
//! - Transport failures record nothing; the next pass retries
//! - One serialized write context per store

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod error;
mod group;
mod http_date;
mod index;
mod manager;
mod request;
mod scheduler;
mod transfer;
mod writer;

pub use config::AssetCacheConfig;
pub use error::{AssetError, AssetResult};
pub use group::{CompletionGroup, GroupTicket, SettleStep, Settlement};
pub use http_date::{format_http_date, parse_http_date};
pub use index::PendingTransferIndex;
pub use manager::{AssetManager, MemoryPressure};
pub use request::{DownloadRequest, RequestKey, TransferRequest, DEFAULT_PRIORITY, IF_MODIFIED_SINCE};
pub use scheduler::{DownloadScheduler, ScheduleReport};
pub use transfer::{
    BodyLocation, MockTransferSession, TransferCompletion, TransferId, TransferOutcome,
    TransferResponse, TransferSession, TransferSnapshot, TransferState,
};
pub use writer::{AssetWriter, CompletionDisposition, WriterStats};
