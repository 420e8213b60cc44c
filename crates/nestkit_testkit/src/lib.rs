//! # nestkit testkit
//!
//! Test utilities for nestkit.
//!
//! This crate provides:
//! - Seeded in-memory stores and snapshot builders
//! - Propagation and asset fixtures wired to in-memory collaborators
//! - Recording collaborators with failure injection
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nestkit_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn notifies_on_new_following() {
//!     let fixture = PropagationFixture::new();
//!     fixture.cycle().await;
//!     fixture.store.insert_snapshot(fixture.snapshot().following(&["1"]).build());
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use collaborators::*;
pub use fixtures::*;
pub use generators::*;
