use super::{Consumer, ConsumerPriority, ConsumerReport};
use crate::collaborators::CleanupRoutines;
use crate::error::{PropagationError, PropagationResult};
use crate::router::ChangeBatch;
use async_trait::async_trait;
use nestkit_core::{ChangeKind, EntityKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Which inserted objects a [`CleanupConsumer`] reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupTarget {
    /// Deduplicate accounts.
    Account,
    /// Reap orphaned users.
    User,
    /// Reap orphaned data assets.
    DataAsset,
}

impl CleanupTarget {
    /// All targets.
    pub const ALL: [CleanupTarget; 3] = [Self::Account, Self::User, Self::DataAsset];

    /// The entity kind whose inserts trigger this cleanup.
    pub const fn entity(self) -> EntityKind {
        match self {
            Self::Account => EntityKind::Account,
            Self::User => EntityKind::User,
            Self::DataAsset => EntityKind::DataAsset,
        }
    }

    const fn consumer_name(self) -> &'static str {
        match self {
            Self::Account => "cleanup-account",
            Self::User => "cleanup-user",
            Self::DataAsset => "cleanup-data-asset",
        }
    }
}

/// Runs one cleanup routine once per distinct inserted identifier.
pub struct CleanupConsumer {
    target: CleanupTarget,
    routines: Arc<dyn CleanupRoutines>,
}

impl CleanupConsumer {
    /// Creates the consumer.
    pub fn new(target: CleanupTarget, routines: Arc<dyn CleanupRoutines>) -> Self {
        Self { target, routines }
    }
}

#[async_trait]
impl Consumer for CleanupConsumer {
    fn name(&self) -> &'static str {
        self.target.consumer_name()
    }

    fn priority(&self) -> ConsumerPriority {
        ConsumerPriority::Utility
    }

    async fn consume(
        &self,
        batch: Arc<ChangeBatch>,
        cancel: CancellationToken,
    ) -> PropagationResult<ConsumerReport> {
        let mut report = ConsumerReport::default();

        for id in batch.ids(self.target.entity(), ChangeKind::Insert) {
            if cancel.is_cancelled() {
                return Err(PropagationError::Cancelled);
            }

            let result = match self.target {
                CleanupTarget::Account => self.routines.cleanse_account(id).await,
                CleanupTarget::User => self.routines.cleanse_user(id).await,
                CleanupTarget::DataAsset => self.routines.cleanse_data_asset(id).await,
            };

            match result {
                Ok(()) => report.mark_handled(),
                Err(e) => {
                    warn!(cleanup = ?self.target, id = %id, error = %e, "cleanup failed");
                    report.mark_failed();
                }
            }
        }

        Ok(report)
    }
}
