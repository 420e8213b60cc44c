//! Asset cache front door.
//!
//! [`AssetManager`] owns the scheduler, the writer and two background
//! tasks:
//!
//! - the completion loop, which hands each finished transfer to the writer
//!   inside a [`CompletionGroup`] and commits once the group settles;
//! - the memory-pressure listener, which commits early whenever the host
//!   reports pressure.
//!
//! Both stop on [`AssetManager::invalidate`]. Handlers registered with
//! [`AssetManager::handle_background_session_events`] travel through the
//! completion loop, so they observe every completion delivered before them.

use crate::config::AssetCacheConfig;
use crate::error::AssetResult;
use crate::group::{CompletionGroup, SettleStep, Settlement};
use crate::index::PendingTransferIndex;
use crate::request::DownloadRequest;
use crate::scheduler::{DownloadScheduler, ScheduleReport};
use crate::transfer::{TransferCompletion, TransferSession};
use crate::writer::{AssetWriter, WriterStats};
use nestkit_core::{AssetStore, HistoryToken, LifecycleHost};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Memory pressure reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Pressure returned to normal.
    Normal,
    /// The host is low on memory.
    Warning,
    /// The host is about to terminate processes.
    Critical,
}

impl MemoryPressure {
    /// Returns true if staged writes should be flushed.
    pub fn requires_flush(self) -> bool {
        self >= Self::Warning
    }
}

type EventsHandler = Box<dyn FnOnce() + Send>;

struct Shared {
    writer: AssetWriter,
    index: Arc<Mutex<PendingTransferIndex>>,
    group: CompletionGroup,
    events_handler: SyncMutex<Option<EventsHandler>>,
    settled: watch::Sender<u64>,
}

impl Shared {
    async fn handle(&self, completion: TransferCompletion) {
        self.index.lock().await.remove_transfer(completion.id);
        match self.writer.handle(&completion).await {
            Ok(disposition) => {
                debug!(url = %completion.request.url, ?disposition, "completion handled");
            }
            Err(e) => {
                warn!(url = %completion.request.url, error = %e, "failed to handle completion");
            }
        }
    }

    fn register_events_handler(&self, handler: EventsHandler) {
        *self.events_handler.lock() = Some(handler);
        if self.group.is_idle() {
            self.finish_events();
        }
    }

    /// Commits staged writes once a group of completions has settled.
    ///
    /// The group stays busy until the commit is done, so a handler
    /// registered meanwhile waits for it.
    async fn settle(&self, mut settlement: Settlement) {
        loop {
            self.flush("completions settled").await;
            match settlement.flushed() {
                SettleStep::Again => continue,
                SettleStep::Idle => {
                    self.finish_events();
                    break;
                }
                SettleStep::Busy => break,
            }
        }
        self.settled.send_modify(|count| *count += 1);
    }

    async fn flush(&self, trigger: &str) -> Option<HistoryToken> {
        match self.writer.save().await {
            Ok(token) => token,
            Err(e) => {
                warn!(trigger, error = %e, "asset commit failed");
                None
            }
        }
    }

    fn finish_events(&self) {
        let handler = self.events_handler.lock().take();
        if let Some(handler) = handler {
            debug!("background session events finished");
            handler();
        }
    }
}

/// Downloads assets and stores them de-duplicated by content hash.
pub struct AssetManager {
    scheduler: DownloadScheduler,
    session: Arc<dyn TransferSession>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<EventsHandler>,
    shutdown: CancellationToken,
}

impl AssetManager {
    /// Creates a manager and spawns its background tasks.
    ///
    /// `completions` is the session's completion channel. `pressure`, if
    /// given, is the host's memory-pressure feed. Must be called inside a
    /// tokio runtime.
    pub fn spawn(
        store: Arc<dyn AssetStore>,
        session: Arc<dyn TransferSession>,
        completions: mpsc::UnboundedReceiver<TransferCompletion>,
        pressure: Option<broadcast::Receiver<MemoryPressure>>,
        host: Arc<dyn LifecycleHost>,
        config: AssetCacheConfig,
    ) -> Arc<Self> {
        let index = Arc::new(Mutex::new(PendingTransferIndex::new()));
        let (settled, _) = watch::channel(0);
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            writer: AssetWriter::new(Arc::clone(&store), host),
            index: Arc::clone(&index),
            group: CompletionGroup::new(),
            events_handler: SyncMutex::new(None),
            settled,
        });
        let manager = Arc::new(Self {
            scheduler: DownloadScheduler::new(store, Arc::clone(&session), config, index),
            session,
            shared: Arc::clone(&shared),
            events,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(completion_loop(
            Arc::clone(&shared),
            completions,
            events_rx,
            manager.shutdown.clone(),
        ));
        if let Some(pressure) = pressure {
            tokio::spawn(pressure_loop(shared, pressure, manager.shutdown.clone()));
        }
        info!(session = %manager.scheduler.config().session_identifier, "asset manager started");
        manager
    }

    /// Schedules downloads. Returns once transfers are issued.
    pub async fn download(
        &self,
        requests: &[DownloadRequest],
        cancel: &CancellationToken,
    ) -> AssetResult<ScheduleReport> {
        self.scheduler.download(requests, cancel).await
    }

    /// Commits staged writes now.
    pub async fn flush(&self) -> AssetResult<Option<HistoryToken>> {
        self.shared.writer.save().await
    }

    /// Registers the host's handler for finished background session events.
    ///
    /// The handler runs once, after every completion delivered so far has
    /// been handled and committed. A later registration replaces an earlier
    /// one that has not run yet.
    pub fn handle_background_session_events(&self, handler: impl FnOnce() + Send + 'static) {
        if self.events.send(Box::new(handler)).is_err() {
            debug!("asset manager stopped; dropping background events handler");
        }
    }

    /// Cancels every transfer and stops the background tasks.
    pub fn invalidate(&self) {
        info!("invalidating asset manager");
        self.session.invalidate_and_cancel();
        self.shutdown.cancel();
    }

    /// Returns true once [`Self::invalidate`] was called.
    pub fn is_invalidated(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Returns the number of completions being handled.
    pub fn completions_in_flight(&self) -> usize {
        self.shared.group.active()
    }

    /// Returns the number of transfers known to be live.
    pub async fn transfers_in_flight(&self) -> usize {
        self.shared.index.lock().await.len()
    }

    /// Returns a receiver that changes every time a completion group settles.
    pub fn settled(&self) -> watch::Receiver<u64> {
        self.shared.settled.subscribe()
    }

    /// Returns the writer.
    pub fn writer(&self) -> &AssetWriter {
        &self.shared.writer
    }

    /// Returns the writer counters.
    pub fn stats(&self) -> WriterStats {
        self.shared.writer.stats()
    }
}

async fn completion_loop(
    shared: Arc<Shared>,
    mut completions: mpsc::UnboundedReceiver<TransferCompletion>,
    mut events: mpsc::UnboundedReceiver<EventsHandler>,
    shutdown: CancellationToken,
) {
    loop {
        // Completions first, so a handler sees everything queued before it.
        let completion = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            completion = completions.recv() => match completion {
                Some(completion) => completion,
                None => break,
            },
            Some(handler) = events.recv() => {
                shared.register_events_handler(handler);
                continue;
            }
        };

        let ticket = shared.group.enter();
        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            shared.handle(completion).await;
            if let Some(settlement) = ticket.leave() {
                shared.settle(settlement).await;
            }
        });
    }
    debug!("completion loop stopped");
}

async fn pressure_loop(
    shared: Arc<Shared>,
    mut pressure: broadcast::Receiver<MemoryPressure>,
    shutdown: CancellationToken,
) {
    loop {
        let level = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            level = pressure.recv() => match level {
                Ok(level) => level,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "memory pressure events lagged");
                    MemoryPressure::Warning
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if level.requires_flush() {
            info!(?level, "memory pressure; flushing staged assets");
            shared.flush("memory pressure").await;
        }
    }
    debug!("memory pressure listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::MockTransferSession;
    use nestkit_core::{ForegroundHost, MemoryStore};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[test]
    fn pressure_levels() {
        assert!(!MemoryPressure::Normal.requires_flush());
        assert!(MemoryPressure::Warning.requires_flush());
        assert!(MemoryPressure::Critical.requires_flush());
    }

    #[tokio::test]
    async fn events_handler_runs_immediately_when_idle() {
        let (session, completions) = MockTransferSession::new();
        let manager = AssetManager::spawn(
            Arc::new(MemoryStore::new()),
            Arc::new(session),
            completions,
            None,
            Arc::new(ForegroundHost),
            AssetCacheConfig::default(),
        );
        let (done, finished) = oneshot::channel();
        manager.handle_background_session_events(move || {
            let _ = done.send(());
        });
        tokio::time::timeout(Duration::from_secs(1), finished)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn invalidate_stops_new_transfers() {
        let (session, completions) = MockTransferSession::new();
        let session = Arc::new(session);
        let manager = AssetManager::spawn(
            Arc::new(MemoryStore::new()),
            session.clone(),
            completions,
            None,
            Arc::new(ForegroundHost),
            AssetCacheConfig::default(),
        );
        manager
            .download(&[DownloadRequest::new("https://a/1.png")], &CancellationToken::new())
            .await
            .unwrap();

        manager.invalidate();
        assert!(manager.is_invalidated());
        assert!(session.is_invalidated());
        assert_eq!(session.live_count(), 0);

        let report = manager
            .download(&[DownloadRequest::new("https://a/2.png")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
    }
}
