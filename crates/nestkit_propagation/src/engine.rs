//! Propagation engine.

use crate::collaborators::{CleanupRoutines, NotificationCenter, SessionRegistry};
use crate::config::{CursorAdvance, PropagationConfig};
use crate::consumers::{CleanupConsumer, CleanupTarget, Consumer, CredentialConsumer, NotificationConsumer};
use crate::error::{PropagationError, PropagationResult};
use crate::reader::ChangeLogReader;
use crate::router::{ChangeBatch, ChangeRouter, DispatchReport};
use chrono::{DateTime, Utc};
use nestkit_core::{
    with_extended_background_execution, ChangeLog, CursorStore, HistoryToken, LifecycleHost,
    StoreChanged, Store,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationState {
    /// No cycle running.
    Idle,
    /// Reading history.
    Reading,
    /// Consumers are running.
    Dispatching,
    /// The last cycle failed.
    Error,
}

impl PropagationState {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Reading | Self::Dispatching)
    }
}

/// Statistics about propagation cycles.
#[derive(Debug, Clone, Default)]
pub struct PropagationStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Transactions read.
    pub transactions_read: u64,
    /// De-duplicated records dispatched.
    pub records_dispatched: u64,
    /// Consumer failures logged.
    pub consumer_failures: u64,
    /// Times the cursor was unusable and reset to the tip.
    pub cursor_resets: u64,
    /// When the last cycle finished.
    pub last_cycle: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one propagation cycle.
#[derive(Debug)]
pub struct CycleResult {
    /// Transactions read.
    pub transactions: usize,
    /// De-duplicated records dispatched.
    pub records: usize,
    /// Cursor persisted by this cycle, if it moved.
    pub cursor: Option<HistoryToken>,
    /// True if the persisted cursor was unusable.
    pub reset: bool,
    /// Consumer outcomes.
    pub dispatch: DispatchReport,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Reads committed changes and fans them out to consumers.
///
/// Cycles are serialized: a trigger that arrives while a cycle runs waits
/// for it and then reads from the cursor that cycle left behind.
pub struct PropagationEngine {
    config: PropagationConfig,
    reader: ChangeLogReader,
    router: ChangeRouter,
    host: Arc<dyn LifecycleHost>,
    cycle: Mutex<()>,
    state: RwLock<PropagationState>,
    stats: RwLock<PropagationStats>,
}

impl PropagationEngine {
    /// Creates an engine with no consumers.
    pub fn new(
        config: PropagationConfig,
        log: Arc<dyn ChangeLog>,
        cursors: Arc<dyn CursorStore>,
        host: Arc<dyn LifecycleHost>,
    ) -> Self {
        Self {
            config,
            reader: ChangeLogReader::new(log, cursors),
            router: ChangeRouter::new(),
            host,
            cycle: Mutex::new(()),
            state: RwLock::new(PropagationState::Idle),
            stats: RwLock::new(PropagationStats::default()),
        }
    }

    /// Registers a consumer.
    pub fn with_consumer(mut self, consumer: Arc<dyn Consumer>) -> Self {
        self.router = self.router.with_consumer(consumer);
        self
    }

    /// Registers the notification, credential and cleanup consumers.
    pub fn with_standard_consumers(
        self,
        store: Arc<dyn Store>,
        center: Arc<dyn NotificationCenter>,
        sessions: Arc<SessionRegistry>,
        cleanup: Arc<dyn CleanupRoutines>,
    ) -> Self {
        let notification = NotificationConsumer::new(Arc::clone(&store), center, &self.config);
        let mut engine = self
            .with_consumer(Arc::new(notification))
            .with_consumer(Arc::new(CredentialConsumer::new(store, sessions)));
        for target in CleanupTarget::ALL {
            engine = engine.with_consumer(Arc::new(CleanupConsumer::new(target, Arc::clone(&cleanup))));
        }
        engine
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Returns the reader.
    pub fn reader(&self) -> &ChangeLogReader {
        &self.reader
    }

    /// Returns the registered consumer names in launch order.
    pub fn consumer_names(&self) -> Vec<&'static str> {
        self.router.consumer_names()
    }

    /// Gets the current state.
    pub fn state(&self) -> PropagationState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> PropagationStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: PropagationState) {
        *self.state.write() = state;
    }

    /// Runs one cycle under a background execution extension.
    ///
    /// Consumer failures are logged and reported in the result; only read,
    /// cursor and expiry errors fail the cycle.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> PropagationResult<CycleResult> {
        let _serial = self.cycle.lock().await;
        let outcome = with_extended_background_execution(
            self.host.as_ref(),
            "propagation-cycle",
            self.cycle_inner(cancel),
        )
        .await
        .map_err(PropagationError::from)
        .and_then(|result| result);

        match &outcome {
            Ok(result) => {
                self.set_state(PropagationState::Idle);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.transactions_read += result.transactions as u64;
                stats.records_dispatched += result.records as u64;
                stats.consumer_failures += result.dispatch.failures() as u64;
                stats.cursor_resets += u64::from(result.reset);
                stats.last_cycle = Some(Utc::now());
            }
            Err(e) => {
                error!(error = %e, "propagation cycle failed");
                self.set_state(PropagationState::Error);
                self.stats.write().last_error = Some(e.to_string());
            }
        }
        outcome
    }

    async fn cycle_inner(&self, cancel: &CancellationToken) -> PropagationResult<CycleResult> {
        let start = Instant::now();

        self.set_state(PropagationState::Reading);
        let batch = self.reader.read()?;
        if batch.is_empty() {
            return Ok(CycleResult {
                transactions: 0,
                records: 0,
                cursor: None,
                reset: batch.reset,
                dispatch: DispatchReport::default(),
                duration: start.elapsed(),
            });
        }

        let mut cursor = None;
        if self.config.cursor_advance == CursorAdvance::BeforeConsumers {
            cursor = self.reader.advance(&batch)?;
        }

        let changes = ChangeBatch::from_transactions(&batch.transactions);
        let records = changes.len();
        info!(
            transactions = batch.transactions.len(),
            records,
            "dispatching changes"
        );

        self.set_state(PropagationState::Dispatching);
        let dispatch = self.router.dispatch(changes, cancel).await;

        if self.config.cursor_advance == CursorAdvance::AfterConsumers {
            if cancel.is_cancelled() {
                // Re-deliver the whole batch next time.
                debug!("cycle cancelled, cursor left in place");
            } else {
                cursor = self.reader.advance(&batch)?;
            }
        }

        Ok(CycleResult {
            transactions: batch.transactions.len(),
            records,
            cursor,
            reset: batch.reset,
            dispatch,
            duration: start.elapsed(),
        })
    }

    /// Runs a cycle for every store-changed notification until `cancel`
    /// fires or the notifier closes.
    ///
    /// The notification payload is ignored; every cycle re-reads from the
    /// persisted cursor.
    pub async fn run(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<StoreChanged>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = changes.recv() => event,
            };

            match event {
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "coalescing store-changed notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }

            // Every buffered trigger is covered by the cycle below.
            while changes.try_recv().is_ok() {}

            if let Err(e) = self.run_cycle(&cancel).await {
                warn!(error = %e, "propagation cycle did not complete");
            }
        }
        debug!("propagation loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::ConsumerReport;
    use async_trait::async_trait;
    use nestkit_core::{
        decode_cursor, ChangeRecord, EntityKind, ForegroundHost, MemoryCursorStore,
        MemoryHistory, ObjectId,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cancels `token` once its first user has been cleansed.
    struct CancellingCleanup {
        token: CancellationToken,
        users: parking_lot::Mutex<Vec<ObjectId>>,
    }

    impl CancellingCleanup {
        fn new(token: &CancellationToken) -> Arc<Self> {
            Arc::new(Self {
                token: token.clone(),
                users: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn users(&self) -> Vec<ObjectId> {
            self.users.lock().clone()
        }
    }

    #[async_trait]
    impl crate::CleanupRoutines for CancellingCleanup {
        async fn cleanse_account(&self, _account: ObjectId) -> PropagationResult<()> {
            Ok(())
        }

        async fn cleanse_user(&self, user: ObjectId) -> PropagationResult<()> {
            self.users.lock().push(user);
            self.token.cancel();
            Ok(())
        }

        async fn cleanse_data_asset(&self, _asset: ObjectId) -> PropagationResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counting {
        batches: AtomicUsize,
        cursor_seen: parking_lot::Mutex<Vec<Option<HistoryToken>>>,
        cursors: Option<Arc<MemoryCursorStore>>,
    }

    #[async_trait]
    impl Consumer for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn priority(&self) -> crate::ConsumerPriority {
            crate::ConsumerPriority::High
        }

        async fn consume(
            &self,
            batch: Arc<ChangeBatch>,
            _cancel: CancellationToken,
        ) -> PropagationResult<ConsumerReport> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            if let Some(cursors) = &self.cursors {
                let seen = cursors
                    .load()
                    .unwrap()
                    .map(|blob| decode_cursor(&blob).unwrap());
                self.cursor_seen.lock().push(seen);
            }
            Ok(ConsumerReport {
                handled: batch.len(),
                ..ConsumerReport::default()
            })
        }
    }

    fn insert() -> Vec<ChangeRecord> {
        vec![ChangeRecord::insert(ObjectId::new(EntityKind::User))]
    }

    fn engine(
        config: PropagationConfig,
        history: &Arc<MemoryHistory>,
        cursors: &Arc<MemoryCursorStore>,
        consumer: Arc<Counting>,
    ) -> PropagationEngine {
        PropagationEngine::new(config, history.clone(), cursors.clone(), Arc::new(ForegroundHost))
            .with_consumer(consumer)
    }

    #[tokio::test]
    async fn first_cycle_captures_tip_then_reads() {
        let history = Arc::new(MemoryHistory::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let counting = Arc::new(Counting::default());
        let engine = engine(PropagationConfig::default(), &history, &cursors, counting.clone());
        let cancel = CancellationToken::new();

        let tip = history.append(None, insert());
        let first = engine.run_cycle(&cancel).await.unwrap();
        assert_eq!(first.transactions, 0);
        assert_eq!(engine.reader().load_cursor().unwrap(), Some(tip));

        let next = history.append(None, insert());
        let second = engine.run_cycle(&cancel).await.unwrap();
        assert_eq!(second.transactions, 1);
        assert_eq!(second.cursor, Some(next));
        assert_eq!(counting.batches.load(Ordering::SeqCst), 1);

        let third = engine.run_cycle(&cancel).await.unwrap();
        assert_eq!(third.transactions, 0);
        assert_eq!(engine.stats().cycles_completed, 3);
        assert_eq!(engine.state(), PropagationState::Idle);
    }

    #[tokio::test]
    async fn cursor_advance_policies() {
        for (advance, expect_advanced_before) in [
            (CursorAdvance::BeforeConsumers, true),
            (CursorAdvance::AfterConsumers, false),
        ] {
            let history = Arc::new(MemoryHistory::new());
            let cursors = Arc::new(MemoryCursorStore::new());
            let counting = Arc::new(Counting {
                cursors: Some(cursors.clone()),
                ..Counting::default()
            });
            let engine = engine(
                PropagationConfig::new().with_cursor_advance(advance),
                &history,
                &cursors,
                counting.clone(),
            );
            let cancel = CancellationToken::new();

            let tip = history.append(None, insert());
            engine.run_cycle(&cancel).await.unwrap();
            let next = history.append(None, insert());
            engine.run_cycle(&cancel).await.unwrap();

            let seen = counting.cursor_seen.lock().clone();
            let expected = if expect_advanced_before { next } else { tip };
            assert_eq!(seen, vec![Some(expected)]);
            assert_eq!(engine.reader().load_cursor().unwrap(), Some(next));
        }
    }

    fn three_users() -> Vec<ChangeRecord> {
        (0..3)
            .map(|_| ChangeRecord::insert(ObjectId::new(EntityKind::User)))
            .collect()
    }

    fn cleanup_engine(
        advance: CursorAdvance,
        history: &Arc<MemoryHistory>,
        cursors: &Arc<MemoryCursorStore>,
        routines: Arc<CancellingCleanup>,
    ) -> PropagationEngine {
        PropagationEngine::new(
            PropagationConfig::new().with_cursor_advance(advance),
            history.clone(),
            cursors.clone(),
            Arc::new(ForegroundHost),
        )
        .with_consumer(Arc::new(CleanupConsumer::new(CleanupTarget::User, routines)))
    }

    #[tokio::test]
    async fn consumer_stops_between_identifiers_when_cancelled() {
        let history = Arc::new(MemoryHistory::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let cancel = CancellationToken::new();
        let routines = CancellingCleanup::new(&cancel);
        let engine = cleanup_engine(
            CursorAdvance::AfterConsumers,
            &history,
            &cursors,
            routines.clone(),
        );

        history.append(None, insert());
        engine.run_cycle(&CancellationToken::new()).await.unwrap();
        history.append(None, three_users());
        let result = engine.run_cycle(&cancel).await.unwrap();

        assert_eq!(routines.users().len(), 1);
        let outcome = result.dispatch.outcome("cleanup-user").unwrap();
        assert!(matches!(outcome.result, Err(PropagationError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_after_consumers_cycle_redelivers_batch() {
        let history = Arc::new(MemoryHistory::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let cancel = CancellationToken::new();
        let routines = CancellingCleanup::new(&cancel);
        let engine = cleanup_engine(
            CursorAdvance::AfterConsumers,
            &history,
            &cursors,
            routines.clone(),
        );

        let tip = history.append(None, insert());
        engine.run_cycle(&CancellationToken::new()).await.unwrap();
        let next = history.append(None, three_users());

        let cancelled = engine.run_cycle(&cancel).await.unwrap();
        assert_eq!(cancelled.transactions, 1);
        assert_eq!(cancelled.cursor, None);
        assert_eq!(engine.reader().load_cursor().unwrap(), Some(tip));

        let retried = engine.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(retried.transactions, 1);
        assert_eq!(retried.records, 3);
        assert_eq!(retried.cursor, Some(next));
        assert_eq!(routines.users().len(), 4);
    }

    #[tokio::test]
    async fn cancelled_before_consumers_cycle_keeps_cursor() {
        let history = Arc::new(MemoryHistory::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let cancel = CancellationToken::new();
        let routines = CancellingCleanup::new(&cancel);
        let engine = cleanup_engine(
            CursorAdvance::BeforeConsumers,
            &history,
            &cursors,
            routines.clone(),
        );

        history.append(None, insert());
        engine.run_cycle(&CancellationToken::new()).await.unwrap();
        let next = history.append(None, three_users());

        let cancelled = engine.run_cycle(&cancel).await.unwrap();
        assert_eq!(cancelled.cursor, Some(next));
        assert_eq!(routines.users().len(), 1);
        assert_eq!(engine.reader().load_cursor().unwrap(), Some(next));

        let after = engine.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(after.transactions, 0);
        assert_eq!(routines.users().len(), 1);
    }

    #[tokio::test]
    async fn run_loop_reacts_to_notifications() {
        let history = Arc::new(MemoryHistory::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let counting = Arc::new(Counting::default());
        let engine = Arc::new(engine(
            PropagationConfig::default(),
            &history,
            &cursors,
            counting.clone(),
        ));
        let cancel = CancellationToken::new();

        history.append(None, insert());
        engine.run_cycle(&cancel).await.unwrap();

        let task = tokio::spawn(Arc::clone(&engine).run(history.subscribe(), cancel.clone()));
        history.append(None, insert());

        for _ in 0..200 {
            if counting.batches.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(counting.batches.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
