//! Error types for nestkit core.

use crate::types::{HistoryToken, ObjectId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core store and history operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The history no longer holds transactions after the given cursor.
    #[error("history unavailable after {cursor}: oldest retained is {oldest}")]
    LogUnavailable {
        /// The cursor that was requested.
        cursor: HistoryToken,
        /// The oldest token still retained.
        oldest: HistoryToken,
    },

    /// A persisted blob could not be decoded.
    #[error("decode failure: {message}")]
    DecodeFailure {
        /// Description of the failure.
        message: String,
    },

    /// A persisted value could not be encoded.
    #[error("encode failure: {message}")]
    EncodeFailure {
        /// Description of the failure.
        message: String,
    },

    /// Another writer committed a conflicting change first.
    #[error("write conflict on asset {url}")]
    WriteConflict {
        /// The asset url whose latest row moved.
        url: String,
    },

    /// The referenced object does not exist in the store.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),
}

impl CoreError {
    /// Creates a decode failure error.
    pub fn decode_failure(message: impl Into<String>) -> Self {
        Self::DecodeFailure {
            message: message.into(),
        }
    }

    /// Creates an encode failure error.
    pub fn encode_failure(message: impl Into<String>) -> Self {
        Self::EncodeFailure {
            message: message.into(),
        }
    }

    /// Creates a write conflict error.
    pub fn write_conflict(url: impl Into<String>) -> Self {
        Self::WriteConflict { url: url.into() }
    }

    /// Returns true if the caller should fall back to treating the cursor
    /// as absent.
    pub fn resets_cursor(&self) -> bool {
        matches!(self, Self::LogUnavailable { .. } | Self::DecodeFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_resetting_errors() {
        let err = CoreError::LogUnavailable {
            cursor: HistoryToken::new(3),
            oldest: HistoryToken::new(10),
        };
        assert!(err.resets_cursor());
        assert!(CoreError::decode_failure("bad blob").resets_cursor());
        assert!(!CoreError::write_conflict("https://a/b.png").resets_cursor());
    }

    #[test]
    fn error_display() {
        let err = CoreError::LogUnavailable {
            cursor: HistoryToken::new(3),
            oldest: HistoryToken::new(10),
        };
        assert_eq!(
            err.to_string(),
            "history unavailable after token:3: oldest retained is token:10"
        );
    }
}
