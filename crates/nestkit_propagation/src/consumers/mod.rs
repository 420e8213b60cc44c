//! Reaction consumers.
//!
//! Each consumer reacts to one slice of a [`ChangeBatch`]. Consumers re-read
//! current state from the store instead of trusting record payloads, so a
//! consumer sees each identifier once per (entity, change kind).

mod cleanup;
mod credential;
mod notification;

pub use cleanup::{CleanupConsumer, CleanupTarget};
pub use credential::CredentialConsumer;
pub use notification::NotificationConsumer;

use crate::error::PropagationResult;
use crate::router::ChangeBatch;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Scheduling priority of a consumer.
///
/// Higher priorities are launched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConsumerPriority {
    /// Background maintenance.
    Utility,
    /// Session upkeep.
    Medium,
    /// User-visible output.
    High,
}

impl fmt::Display for ConsumerPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Utility => "utility",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// What a consumer did with a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Identifiers acted on.
    pub handled: usize,
    /// Identifiers skipped without action.
    pub skipped: usize,
    /// Identifiers whose handling failed; failures are logged, not raised.
    pub failed: usize,
}

impl ConsumerReport {
    pub(crate) fn mark_handled(&mut self) {
        self.handled += 1;
    }

    pub(crate) fn mark_skipped(&mut self) {
        self.skipped += 1;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.failed += 1;
    }
}

/// An independent reaction to committed changes.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Launch priority.
    fn priority(&self) -> ConsumerPriority;

    /// Handles a batch.
    ///
    /// Implementations check `cancel` between identifiers and return
    /// [`crate::PropagationError::Cancelled`] once it fires.
    async fn consume(
        &self,
        batch: Arc<ChangeBatch>,
        cancel: CancellationToken,
    ) -> PropagationResult<ConsumerReport>;
}
