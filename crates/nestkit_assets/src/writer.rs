//! Completion handling and coalesced asset commits.
//!
//! Every finished transfer is staged into one shared [`WriteContext`]:
//!
//! | Outcome            | Effect                                                 |
//! |--------------------|--------------------------------------------------------|
//! | 2xx, same hash     | metadata update of the latest row (no new bytes)       |
//! | 2xx, new hash      | new row with the body, hash, mime type, dates          |
//! | 304                | `last_verified` of the latest row                      |
//! | other status       | logged, nothing staged                                 |
//! | transport failure  | logged, nothing staged                                 |
//!
//! Staged changes are committed together by [`AssetWriter::save`], which
//! the manager calls once a group of completions has settled or memory
//! pressure forces an early flush.

use crate::error::AssetResult;
use crate::http_date::parse_http_date;
use crate::transfer::{TransferCompletion, TransferOutcome, TransferResponse};
use chrono::Utc;
use nestkit_core::{
    changed_metadata, with_extended_background_execution, AssetMetadata, AssetRecord, AssetStore,
    ContentHash, EntityKind, HistoryToken, LifecycleHost, ObjectId, WriteContext,
};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a completion staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDisposition {
    /// A new row with new bytes.
    Inserted,
    /// Changed metadata on the latest row.
    MetadataUpdated,
    /// Same bytes and metadata as the latest row.
    Unchanged,
    /// The origin confirmed the latest row.
    Revalidated,
    /// The response carried nothing to store.
    Discarded,
    /// The transfer failed.
    Failed,
}

/// Writer counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Rows inserted.
    pub inserted: u64,
    /// Metadata updates staged on hash match.
    pub metadata_updates: u64,
    /// 304 revalidations staged.
    pub revalidated: u64,
    /// Responses discarded.
    pub discarded: u64,
    /// Transport failures.
    pub failed: u64,
    /// Commits that wrote at least one mutation.
    pub commits: u64,
}

/// Stages completions and commits them in batches.
pub struct AssetWriter {
    context: Mutex<WriteContext>,
    host: Arc<dyn LifecycleHost>,
    stats: SyncMutex<WriterStats>,
}

impl AssetWriter {
    /// Creates a writer over `store`.
    pub fn new(store: Arc<dyn AssetStore>, host: Arc<dyn LifecycleHost>) -> Self {
        Self {
            context: Mutex::new(WriteContext::new(store)),
            host,
            stats: SyncMutex::new(WriterStats::default()),
        }
    }

    /// Returns a copy of the counters.
    pub fn stats(&self) -> WriterStats {
        self.stats.lock().clone()
    }

    /// Returns the number of staged mutations.
    pub async fn pending_len(&self) -> usize {
        self.context.lock().await.pending_len()
    }

    /// Stages the effect of one finished transfer.
    pub async fn handle(&self, completion: &TransferCompletion) -> AssetResult<CompletionDisposition> {
        let url = completion.request.url.as_str();
        let disposition = match &completion.outcome {
            TransferOutcome::Failed(message) => {
                warn!(url, transfer = %completion.id, error = %message, "transfer failed");
                CompletionDisposition::Failed
            }
            TransferOutcome::Response(response) => match response.status {
                200..=299 => self.handle_body(url, response).await?,
                304 => self.handle_not_modified(url, response).await?,
                status => {
                    warn!(url, status, "discarding response");
                    CompletionDisposition::Discarded
                }
            },
        };

        let mut stats = self.stats.lock();
        match disposition {
            CompletionDisposition::Inserted => stats.inserted += 1,
            CompletionDisposition::MetadataUpdated => stats.metadata_updates += 1,
            CompletionDisposition::Revalidated => stats.revalidated += 1,
            CompletionDisposition::Discarded => stats.discarded += 1,
            CompletionDisposition::Failed => stats.failed += 1,
            CompletionDisposition::Unchanged => {}
        }
        Ok(disposition)
    }

    async fn handle_body(
        &self,
        url: &str,
        response: &TransferResponse,
    ) -> AssetResult<CompletionDisposition> {
        let Some(body) = &response.body else {
            warn!(url, status = response.status, "successful response without a body");
            return Ok(CompletionDisposition::Discarded);
        };
        let data = body.read().await?;
        let incoming = AssetRecord {
            id: ObjectId::new(EntityKind::DataAsset),
            url: url.to_string(),
            content_hash: ContentHash::of(&data),
            mime_type: response.mime_type(),
            data,
            last_modified: response.header("last-modified").and_then(parse_http_date),
            last_verified: Some(response.response_end),
            // Restamped by the context if the row is inserted.
            creation_date: Utc::now(),
        };

        let mut context = self.context.lock().await;
        match context.latest_asset(url)? {
            Some(existing) if existing.content_hash == incoming.content_hash => {
                let metadata = changed_metadata(&existing, &incoming);
                if metadata.is_empty() {
                    debug!(url, "asset unchanged");
                    return Ok(CompletionDisposition::Unchanged);
                }
                debug!(url, hash = %incoming.content_hash, "asset bytes unchanged; updating metadata");
                context.update_metadata(&existing, metadata);
                Ok(CompletionDisposition::MetadataUpdated)
            }
            _ => {
                debug!(url, bytes = incoming.data.len(), hash = %incoming.content_hash, "staging new asset");
                context.insert(incoming)?;
                Ok(CompletionDisposition::Inserted)
            }
        }
    }

    async fn handle_not_modified(
        &self,
        url: &str,
        response: &TransferResponse,
    ) -> AssetResult<CompletionDisposition> {
        let mut context = self.context.lock().await;
        let Some(existing) = context.latest_asset(url)? else {
            warn!(url, "not modified, but nothing is cached");
            return Ok(CompletionDisposition::Discarded);
        };
        context.update_metadata(
            &existing,
            AssetMetadata {
                last_verified: Some(response.response_end),
                ..AssetMetadata::default()
            },
        );
        Ok(CompletionDisposition::Revalidated)
    }

    /// Commits everything staged as one transaction.
    ///
    /// Runs under a background-execution extension. If the extension expires
    /// first, staged changes stay in the context for the next save.
    pub async fn save(&self) -> AssetResult<Option<HistoryToken>> {
        let committed = with_extended_background_execution(
            self.host.as_ref(),
            "asset-commit",
            async {
                let mut context = self.context.lock().await;
                let mutations = context.pending_len();
                context.save().map(|token| (token, mutations))
            },
        )
        .await??;

        match committed {
            (Some(token), mutations) => {
                info!(%token, mutations, "assets committed");
                self.stats.lock().commits += 1;
                Ok(Some(token))
            }
            (None, _) => Ok(None),
        }
    }
}
