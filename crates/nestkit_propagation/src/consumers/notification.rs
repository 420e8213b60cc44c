use super::{Consumer, ConsumerPriority, ConsumerReport};
use crate::collaborators::NotificationCenter;
use crate::config::PropagationConfig;
use crate::error::{PropagationError, PropagationResult};
use crate::notification::{
    change_lines, conjunctive_list, display_handle, InterruptionLevel, ListWidth,
    NotificationContent, NotificationRequest, NotificationSound,
};
use crate::router::ChangeBatch;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use nestkit_core::{preceding_user_detail, ChangeKind, EntityKind, ObjectId, Preferences, Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Turns new snapshots into "what changed" notifications.
pub struct NotificationConsumer {
    store: Arc<dyn Store>,
    center: Arc<dyn NotificationCenter>,
    freshness: TimeDelta,
    category: String,
}

enum Decision {
    Skip(&'static str),
    Withdraw,
    Schedule(NotificationRequest),
}

impl NotificationConsumer {
    /// Creates the consumer.
    pub fn new(
        store: Arc<dyn Store>,
        center: Arc<dyn NotificationCenter>,
        config: &PropagationConfig,
    ) -> Self {
        Self {
            store,
            center,
            freshness: config.freshness_delta(),
            category: config.notification_category.clone(),
        }
    }

    /// Identifiers a notification for `detail` may have been delivered under.
    fn identifiers(&self, detail: &ObjectId) -> PropagationResult<Vec<String>> {
        let mut identifiers = Vec::with_capacity(2);
        if let Some(key) = self.store.record_key(detail)? {
            identifiers.push(key);
        }
        identifiers.push(detail.canonical());
        Ok(identifiers)
    }

    async fn withdraw(&self, detail: &ObjectId) -> PropagationResult<()> {
        let identifiers = self.identifiers(detail)?;
        self.center.withdraw(&identifiers).await
    }

    fn decide(&self, detail_id: &ObjectId, preferences: &Preferences) -> PropagationResult<Decision> {
        let Some(new) = self.store.user_detail(detail_id)? else {
            return Ok(Decision::Skip("snapshot gone"));
        };
        if new.creation_date < Utc::now() - self.freshness {
            return Ok(Decision::Skip("snapshot too old"));
        }
        let Some(user) = self.store.user(&new.user_id)? else {
            return Ok(Decision::Skip("user gone"));
        };
        let Some(account_id) = user.accounts.last().copied() else {
            return Ok(Decision::Skip("user has no account"));
        };
        let account = self.store.account(&account_id)?;
        let Some(old) = preceding_user_detail(self.store.as_ref(), &new)? else {
            return Ok(Decision::Skip("no previous snapshot"));
        };

        let lines = change_lines(&old, &new, preferences);
        if lines.is_empty() {
            return Ok(Decision::Withdraw);
        }
        let lines: Vec<String> = lines.iter().map(ToString::to_string).collect();

        let subtitle = new
            .username
            .clone()
            .or_else(|| user.remote_id.clone())
            .or_else(|| account.and_then(|account| account.user_remote_id))
            .map(|id| display_handle(&id));
        let thread_identifier = self
            .store
            .record_key(&account_id)?
            .unwrap_or_else(|| account_id.canonical());
        let identifier = self
            .store
            .record_key(detail_id)?
            .unwrap_or_else(|| detail_id.canonical());

        Ok(Decision::Schedule(NotificationRequest {
            identifier,
            content: NotificationContent {
                title: new.name.clone().unwrap_or_else(|| account_id.to_string()),
                subtitle,
                body: conjunctive_list(&lines, ListWidth::Narrow),
                thread_identifier,
                category_identifier: self.category.clone(),
                sound: NotificationSound::Default,
                interruption_level: InterruptionLevel::TimeSensitive,
            },
        }))
    }

    async fn update(&self, detail_id: &ObjectId, preferences: &Preferences) -> PropagationResult<bool> {
        match self.decide(detail_id, preferences)? {
            Decision::Skip(reason) => {
                debug!(detail = %detail_id, reason, "no notification");
                Ok(false)
            }
            Decision::Withdraw => {
                debug!(detail = %detail_id, "snapshot unchanged, withdrawing");
                self.withdraw(detail_id).await?;
                Ok(true)
            }
            Decision::Schedule(request) => {
                debug!(detail = %detail_id, identifier = %request.identifier, "scheduling notification");
                self.center.schedule(request).await?;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl Consumer for NotificationConsumer {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn priority(&self) -> ConsumerPriority {
        ConsumerPriority::High
    }

    async fn consume(
        &self,
        batch: Arc<ChangeBatch>,
        cancel: CancellationToken,
    ) -> PropagationResult<ConsumerReport> {
        let mut report = ConsumerReport::default();
        let records: Vec<_> = batch.records_for(EntityKind::UserDetail).copied().collect();
        if records.is_empty() {
            return Ok(report);
        }

        // Read fresh for every cycle.
        let preferences = self.store.preferences()?;

        for record in records {
            if cancel.is_cancelled() {
                return Err(PropagationError::Cancelled);
            }

            let result = match record.change_kind {
                ChangeKind::Insert | ChangeKind::Update => {
                    self.update(&record.object_id, &preferences).await
                }
                ChangeKind::Delete => self.withdraw(&record.object_id).await.map(|()| true),
            };

            match result {
                Ok(true) => report.mark_handled(),
                Ok(false) => report.mark_skipped(),
                Err(e) => {
                    warn!(detail = %record.object_id, error = %e, "notification update failed");
                    report.mark_failed();
                }
            }
        }

        Ok(report)
    }
}
