//! Error types for the asset cache.

use nestkit_core::{CoreError, ExecutionExpired};
use std::io;
use thiserror::Error;

/// Result type for asset cache operations.
pub type AssetResult<T> = Result<T, AssetError>;

/// Errors that can occur while downloading or storing assets.
#[derive(Error, Debug)]
pub enum AssetError {
    /// Network or transport error.
    #[error("transfer of {url} failed: {message}")]
    TransferFailure {
        /// Requested url.
        url: String,
        /// Error message.
        message: String,
    },

    /// The origin answered with a status that carries no usable body.
    #[error("unexpected status {status} for {url}")]
    UnexpectedStatus {
        /// Requested url.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Another writer moved the latest row of an asset.
    #[error("write conflict on asset {url}")]
    WriteConflict {
        /// Asset url.
        url: String,
    },

    /// The transfer session was invalidated.
    #[error("transfer session invalidated")]
    Invalidated,

    /// I/O error reading a downloaded body.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The host revoked background execution mid-write.
    #[error(transparent)]
    Expired(#[from] ExecutionExpired),

    /// Store error.
    #[error("store error: {0}")]
    Core(CoreError),
}

impl AssetError {
    /// Creates a transfer failure.
    pub fn transfer(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransferFailure {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Returns true if a later scheduling pass may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransferFailure { .. } | Self::WriteConflict { .. } | Self::Expired(_)
        )
    }
}

impl From<CoreError> for AssetError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::WriteConflict { url } => Self::WriteConflict { url },
            CoreError::Io(e) => Self::Io(e),
            other => Self::Core(other),
        }
    }
}
