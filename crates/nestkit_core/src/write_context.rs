//! Serialized write context for asset rows.
//!
//! A [`WriteContext`] accumulates [`AssetMutation`]s and commits them as one
//! batch. Reads through the context see its own pending changes, so a second
//! completion for the same url is compared against the first one's bytes
//! rather than against stale committed state.
//!
//! Commits are optimistic: every insert carries the latest row id it was
//! decided against. If another writer moved the latest row in the meantime
//! the commit fails with [`CoreError::WriteConflict`]; the context then
//! re-reads current state, re-decides each mutation once, and retries.
//!
//! Inserted rows are stamped here rather than by the caller, strictly after
//! the row they replace, so staging order and `creation_date` order agree.

use crate::error::{CoreError, CoreResult};
use crate::models::AssetRecord;
use crate::store::{AssetMetadata, AssetMutation, AssetStore};
use crate::types::HistoryToken;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pending asset mutations against one store.
pub struct WriteContext {
    store: Arc<dyn AssetStore>,
    pending: Vec<AssetMutation>,
    overlay: HashMap<String, AssetRecord>,
}

impl WriteContext {
    /// Creates an empty context over `store`.
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self {
            store,
            pending: Vec::new(),
            overlay: HashMap::new(),
        }
    }

    /// Returns the latest row for `url`, including pending changes.
    pub fn latest_asset(&self, url: &str) -> CoreResult<Option<AssetRecord>> {
        if let Some(record) = self.overlay.get(url) {
            return Ok(Some(record.clone()));
        }
        self.store.latest_asset(url)
    }

    /// Stages a new row.
    ///
    /// The record's `creation_date` is replaced so that it becomes the
    /// latest row for its url.
    pub fn insert(&mut self, mut record: AssetRecord) -> CoreResult<()> {
        let latest = self.latest_asset(&record.url)?;
        record.creation_date = creation_after(latest.as_ref());
        let expected_latest = latest.map(|latest| latest.id);
        self.overlay.insert(record.url.clone(), record.clone());
        self.pending.push(AssetMutation::Insert {
            record,
            expected_latest,
        });
        Ok(())
    }

    /// Stages a metadata update of `record`.
    ///
    /// Does nothing if `metadata` is empty.
    pub fn update_metadata(&mut self, record: &AssetRecord, metadata: AssetMetadata) {
        if metadata.is_empty() {
            return;
        }
        let mut updated = record.clone();
        metadata.apply_to(&mut updated);
        self.overlay.insert(updated.url.clone(), updated);
        self.pending.push(AssetMutation::Update {
            id: record.id,
            url: record.url.clone(),
            metadata,
        });
    }

    /// Returns true if there is anything to commit.
    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Returns the number of staged mutations.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops all staged mutations.
    pub fn discard(&mut self) {
        self.pending.clear();
        self.overlay.clear();
    }

    /// Commits all staged mutations as one transaction.
    ///
    /// On a write conflict the batch is rebased against current state and
    /// retried once. The context is empty afterwards whatever the outcome.
    pub fn save(&mut self) -> CoreResult<Option<HistoryToken>> {
        let pending = std::mem::take(&mut self.pending);
        self.overlay.clear();
        if pending.is_empty() {
            return Ok(None);
        }

        match self.store.commit_assets(&pending) {
            Err(CoreError::WriteConflict { url }) => {
                debug!(url = %url, mutations = pending.len(), "asset commit conflicted, rebasing");
                let rebased = self.rebase(pending)?;
                self.store.commit_assets(&rebased).inspect_err(|e| {
                    warn!(error = %e, "asset commit failed after rebase");
                })
            }
            result => result,
        }
    }

    fn rebase(&self, pending: Vec<AssetMutation>) -> CoreResult<Vec<AssetMutation>> {
        let mut latest: HashMap<String, Option<AssetRecord>> = HashMap::new();
        let mut rebased = Vec::with_capacity(pending.len());

        for mutation in pending {
            let url = mutation.url().to_string();
            let current = match latest.get(&url) {
                Some(current) => current.clone(),
                None => self.store.latest_asset(&url)?,
            };

            match mutation {
                AssetMutation::Insert { mut record, .. } => match current {
                    Some(existing) if existing.content_hash == record.content_hash => {
                        let metadata = changed_metadata(&existing, &record);
                        let mut updated = existing.clone();
                        metadata.apply_to(&mut updated);
                        if !metadata.is_empty() {
                            rebased.push(AssetMutation::Update {
                                id: existing.id,
                                url: url.clone(),
                                metadata,
                            });
                        }
                        latest.insert(url, Some(updated));
                    }
                    other => {
                        record.creation_date = creation_after(other.as_ref());
                        rebased.push(AssetMutation::Insert {
                            record: record.clone(),
                            expected_latest: other.map(|existing| existing.id),
                        });
                        latest.insert(url, Some(record));
                    }
                },
                AssetMutation::Update { metadata, .. } => match current {
                    Some(mut existing) => {
                        metadata.apply_to(&mut existing);
                        rebased.push(AssetMutation::Update {
                            id: existing.id,
                            url: url.clone(),
                            metadata,
                        });
                        latest.insert(url, Some(existing));
                    }
                    None => {
                        debug!(url = %url, "dropping metadata update for vanished asset");
                        latest.insert(url, None);
                    }
                },
            }
        }

        Ok(rebased)
    }
}

/// Returns a creation date that sorts after `previous`.
fn creation_after(previous: Option<&AssetRecord>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(previous) if previous.creation_date >= now => {
            previous.creation_date + Duration::microseconds(1)
        }
        _ => now,
    }
}

/// Returns the metadata of `incoming` that is present and differs from
/// `existing`.
pub fn changed_metadata(existing: &AssetRecord, incoming: &AssetRecord) -> AssetMetadata {
    AssetMetadata {
        mime_type: incoming
            .mime_type
            .clone()
            .filter(|mime| existing.mime_type.as_ref() != Some(mime)),
        last_modified: incoming
            .last_modified
            .filter(|date| existing.last_modified != Some(*date)),
        last_verified: incoming
            .last_verified
            .filter(|date| existing.last_verified != Some(*date)),
    }
}
