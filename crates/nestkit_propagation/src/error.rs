//! Error types for the propagation engine.

use nestkit_core::{CoreError, ExecutionExpired, HistoryToken};
use thiserror::Error;

/// Result type for propagation operations.
pub type PropagationResult<T> = Result<T, PropagationError>;

/// Errors that can occur while propagating changes.
#[derive(Error, Debug)]
pub enum PropagationError {
    /// The history was truncated past the cursor.
    #[error("history unavailable after {cursor}: oldest retained is {oldest}")]
    LogUnavailable {
        /// The persisted cursor.
        cursor: HistoryToken,
        /// The oldest retained token.
        oldest: HistoryToken,
    },

    /// The persisted cursor could not be decoded.
    #[error("cursor decode failure: {0}")]
    DecodeFailure(String),

    /// A reaction consumer failed.
    #[error("consumer {consumer} failed: {message}")]
    ConsumerFailure {
        /// Consumer name.
        consumer: &'static str,
        /// Error message.
        message: String,
    },

    /// An external collaborator (notification center, session actor,
    /// cleanup routine) reported an error.
    #[error("collaborator error: {0}")]
    External(String),

    /// The cycle was cancelled.
    #[error("propagation cancelled")]
    Cancelled,

    /// The host revoked background execution mid-cycle.
    #[error(transparent)]
    Expired(#[from] ExecutionExpired),

    /// Store error.
    #[error("store error: {0}")]
    Core(CoreError),
}

impl PropagationError {
    /// Creates a consumer failure.
    pub fn consumer(consumer: &'static str, message: impl Into<String>) -> Self {
        Self::ConsumerFailure {
            consumer,
            message: message.into(),
        }
    }

    /// Creates a collaborator error.
    pub fn external(message: impl Into<String>) -> Self {
        Self::External(message.into())
    }

    /// Returns true if the reader should recover by treating the cursor as
    /// absent.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LogUnavailable { .. } | Self::DecodeFailure(_))
    }
}

impl From<CoreError> for PropagationError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::LogUnavailable { cursor, oldest } => Self::LogUnavailable { cursor, oldest },
            CoreError::DecodeFailure { message } => Self::DecodeFailure(message),
            other => Self::Core(other),
        }
    }
}
