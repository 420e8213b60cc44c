//! Download scheduling.
//!
//! A scheduling pass turns [`DownloadRequest`]s into transfers:
//!
//! 1. Read the latest row per url. Rows verified within the cache
//!    expiration contribute their `Last-Modified` as `If-Modified-Since`;
//!    stale rows contribute nothing, forcing a full fetch.
//! 2. Rebuild the in-flight index from the session's live transfers.
//! 3. Skip requests whose normalized key is already in flight.
//! 4. Start the rest with the configured network policy and size hints.
//!
//! Passes are serialized on the index lock, so two concurrent passes cannot
//! both start the same request.

use crate::config::AssetCacheConfig;
use crate::error::AssetResult;
use crate::http_date::format_http_date;
use crate::index::PendingTransferIndex;
use crate::request::{DownloadRequest, TransferRequest, IF_MODIFIED_SINCE};
use crate::transfer::{TransferId, TransferSession};
use chrono::{DateTime, Utc};
use nestkit_core::AssetStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Transfers started by this pass.
    pub issued: Vec<TransferId>,
    /// Requests skipped because an equivalent transfer was live.
    pub skipped_in_flight: usize,
    /// Requests the session refused.
    pub failed: usize,
    /// Requests not considered because the pass was cancelled.
    pub cancelled: usize,
}

/// Issues conditional, de-duplicated downloads.
pub struct DownloadScheduler {
    store: Arc<dyn AssetStore>,
    session: Arc<dyn TransferSession>,
    config: AssetCacheConfig,
    index: Arc<Mutex<PendingTransferIndex>>,
}

impl DownloadScheduler {
    /// Creates a scheduler.
    pub fn new(
        store: Arc<dyn AssetStore>,
        session: Arc<dyn TransferSession>,
        config: AssetCacheConfig,
        index: Arc<Mutex<PendingTransferIndex>>,
    ) -> Self {
        Self {
            store,
            session,
            config,
            index,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AssetCacheConfig {
        &self.config
    }

    /// Runs one scheduling pass over `requests`.
    ///
    /// Completions arrive on the session's channel, not here.
    pub async fn download(
        &self,
        requests: &[DownloadRequest],
        cancel: &CancellationToken,
    ) -> AssetResult<ScheduleReport> {
        let mut report = ScheduleReport::default();
        if requests.is_empty() {
            return Ok(report);
        }

        let conditions = self.conditional_dates(requests, Utc::now());
        let snapshots = self.session.tasks().await?;

        let mut index = self.index.lock().await;
        index.rebuild(&snapshots);

        for (position, request) in requests.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = requests.len() - position;
                debug!(remaining = report.cancelled, "download scheduling cancelled");
                break;
            }

            let transfer = self.transfer_request(request, conditions.get(&request.url).copied());
            let key = transfer.key();
            if index.contains(&key) {
                debug!(request = %key, "transfer already in flight");
                report.skipped_in_flight += 1;
                continue;
            }

            match self.session.start(transfer).await {
                Ok(id) => {
                    debug!(request = %key, transfer = %id, "transfer started");
                    index.insert(key, id);
                    report.issued.push(id);
                }
                Err(e) => {
                    warn!(request = %key, error = %e, "failed to start transfer");
                    report.failed += 1;
                }
            }
        }

        info!(
            issued = report.issued.len(),
            skipped = report.skipped_in_flight,
            failed = report.failed,
            "download pass finished"
        );
        Ok(report)
    }

    /// Returns `Last-Modified` per url for rows still within the expiration.
    ///
    /// A failed read only costs the conditional headers.
    fn conditional_dates(
        &self,
        requests: &[DownloadRequest],
        now: DateTime<Utc>,
    ) -> HashMap<String, DateTime<Utc>> {
        let urls: Vec<String> = requests.iter().map(|request| request.url.clone()).collect();
        let latest = match self.store.latest_assets(&urls) {
            Ok(latest) => latest,
            Err(e) => {
                warn!(error = %e, "failed to read cached assets; downloading unconditionally");
                return HashMap::new();
            }
        };

        let window = self.config.expiration_delta();
        latest
            .into_iter()
            .filter(|record| record.is_fresh(now, window))
            .filter_map(|record| record.last_modified.map(|date| (record.url, date)))
            .collect()
    }

    fn transfer_request(
        &self,
        request: &DownloadRequest,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> TransferRequest {
        let mut transfer = TransferRequest::get(request.url.clone());
        if let Some(date) = if_modified_since {
            transfer.set_header(IF_MODIFIED_SINCE, format_http_date(date));
        }
        transfer.allows_expensive_network_access = self.config.allows_expensive_network_access;
        transfer.allows_constrained_network_access = self.config.allows_constrained_network_access;
        transfer.priority = request.priority;
        transfer.expected_bytes_to_send = self.config.expected_bytes_to_send;
        transfer.expected_bytes_to_receive = request.expected_size;
        transfer
    }
}
