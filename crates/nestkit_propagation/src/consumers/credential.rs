use super::{Consumer, ConsumerPriority, ConsumerReport};
use crate::collaborators::SessionRegistry;
use crate::error::{PropagationError, PropagationResult};
use crate::router::ChangeBatch;
use async_trait::async_trait;
use nestkit_core::{ChangeKind, EntityKind, Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pushes changed account credentials into live session actors.
///
/// Accounts without a live actor are skipped; their credential is read when
/// the actor is next created.
pub struct CredentialConsumer {
    store: Arc<dyn Store>,
    sessions: Arc<SessionRegistry>,
}

impl CredentialConsumer {
    /// Creates the consumer.
    pub fn new(store: Arc<dyn Store>, sessions: Arc<SessionRegistry>) -> Self {
        Self { store, sessions }
    }
}

#[async_trait]
impl Consumer for CredentialConsumer {
    fn name(&self) -> &'static str {
        "credential"
    }

    fn priority(&self) -> ConsumerPriority {
        ConsumerPriority::Medium
    }

    async fn consume(
        &self,
        batch: Arc<ChangeBatch>,
        cancel: CancellationToken,
    ) -> PropagationResult<ConsumerReport> {
        let mut report = ConsumerReport::default();

        for account_id in batch.ids(EntityKind::Account, ChangeKind::Update) {
            if cancel.is_cancelled() {
                return Err(PropagationError::Cancelled);
            }

            let credential = match self.store.account(&account_id) {
                Ok(account) => account.and_then(|account| account.credential),
                Err(e) => {
                    warn!(account = %account_id, error = %e, "failed to read account");
                    report.mark_failed();
                    continue;
                }
            };

            let Some(session) = self.sessions.get(&account_id) else {
                debug!(account = %account_id, "no live session");
                report.mark_skipped();
                continue;
            };

            session.update_credential(credential).await;
            debug!(account = %account_id, "credential updated");
            report.mark_handled();
        }

        Ok(report)
    }
}
