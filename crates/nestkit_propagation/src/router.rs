//! Change routing.
//!
//! The router flattens a batch of transactions into one ordered record
//! sequence, de-duplicates it per (entity, change kind), and runs every
//! registered consumer concurrently. A failing or panicking consumer is
//! logged and does not affect its siblings.

use crate::consumers::{Consumer, ConsumerPriority, ConsumerReport};
use crate::error::PropagationError;
use futures::FutureExt;
use nestkit_core::{ChangeKind, ChangeRecord, EntityKind, ObjectId, Transaction};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

/// De-duplicated records of one propagation cycle, in log order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    records: Vec<ChangeRecord>,
}

impl ChangeBatch {
    /// Flattens and de-duplicates `transactions`.
    ///
    /// The first occurrence of each (entity, change kind, identifier) is
    /// kept.
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        Self::from_records(transactions.iter().flat_map(|txn| txn.changes.iter().copied()))
    }

    /// De-duplicates an ordered record sequence.
    pub fn from_records(records: impl IntoIterator<Item = ChangeRecord>) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|record| seen.insert((record.change_kind, record.object_id)))
            .collect();
        Self { records }
    }

    /// Returns all records, in order.
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Returns the records of one entity kind, in order.
    pub fn records_for(&self, entity: EntityKind) -> impl Iterator<Item = &ChangeRecord> {
        self.records
            .iter()
            .filter(move |record| record.entity() == entity)
    }

    /// Returns the identifiers of one entity kind with one change kind.
    pub fn ids(&self, entity: EntityKind, change_kind: ChangeKind) -> Vec<ObjectId> {
        self.records_for(entity)
            .filter(|record| record.change_kind == change_kind)
            .map(|record| record.object_id)
            .collect()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of one consumer in a dispatch.
#[derive(Debug)]
pub struct ConsumerOutcome {
    /// Consumer name.
    pub consumer: &'static str,
    /// Consumer priority.
    pub priority: ConsumerPriority,
    /// Report, or the failure that was logged.
    pub result: Result<ConsumerReport, PropagationError>,
}

/// Outcomes of every consumer for one batch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// One entry per consumer, in completion order.
    pub outcomes: Vec<ConsumerOutcome>,
}

impl DispatchReport {
    /// Returns the number of consumers that failed.
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .count()
    }

    /// Returns the outcome of the named consumer.
    pub fn outcome(&self, consumer: &str) -> Option<&ConsumerOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.consumer == consumer)
    }
}

/// Fans batches out to a fixed set of consumers.
#[derive(Default)]
pub struct ChangeRouter {
    consumers: Vec<Arc<dyn Consumer>>,
}

impl ChangeRouter {
    /// Creates a router with no consumers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a consumer.
    pub fn with_consumer(mut self, consumer: Arc<dyn Consumer>) -> Self {
        self.consumers.push(consumer);
        // Stable: equal priorities keep registration order.
        self.consumers
            .sort_by_key(|consumer| std::cmp::Reverse(consumer.priority()));
        self
    }

    /// Returns the registered consumer names in launch order.
    pub fn consumer_names(&self) -> Vec<&'static str> {
        self.consumers.iter().map(|consumer| consumer.name()).collect()
    }

    /// Runs every consumer on `batch` and waits for all of them.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn dispatch(&self, batch: ChangeBatch, cancel: &CancellationToken) -> DispatchReport {
        let batch = Arc::new(batch);
        let mut tasks = JoinSet::new();

        for consumer in &self.consumers {
            let consumer = Arc::clone(consumer);
            let batch = Arc::clone(&batch);
            let cancel = cancel.child_token();
            let name = consumer.name();
            let priority = consumer.priority();
            let span = info_span!("consumer", consumer = name, %priority);

            tasks.spawn(
                async move {
                    let result = AssertUnwindSafe(consumer.consume(batch, cancel))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(PropagationError::consumer(name, "panicked")));
                    ConsumerOutcome {
                        consumer: name,
                        priority,
                        result,
                    }
                }
                .instrument(span),
            );
        }

        let mut report = DispatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    match &outcome.result {
                        Ok(summary) => debug!(
                            consumer = outcome.consumer,
                            handled = summary.handled,
                            skipped = summary.skipped,
                            failed = summary.failed,
                            "consumer finished"
                        ),
                        Err(PropagationError::Cancelled) => {
                            debug!(consumer = outcome.consumer, "consumer cancelled");
                        }
                        Err(e) => error!(consumer = outcome.consumer, error = %e, "consumer failed"),
                    }
                    report.outcomes.push(outcome);
                }
                // Only reachable if the runtime is shutting down.
                Err(e) => warn!(error = %e, "consumer task aborted"),
            }
        }
        report
    }
}
