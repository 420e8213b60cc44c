//! CLI command implementations.

pub mod cursor;
pub mod hash;
pub mod prefs;
