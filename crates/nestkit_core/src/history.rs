//! Persistent change history.
//!
//! Every committed mutation set of the store is appended as one
//! [`Transaction`]. Readers keep a cursor and ask for everything after it:
//!
//! ```rust
//! use nestkit_core::{ChangeLog, ChangeRecord, EntityKind, MemoryHistory, ObjectId};
//!
//! let history = MemoryHistory::new();
//! let token = history.append(None, vec![ChangeRecord::insert(ObjectId::new(EntityKind::User))]);
//!
//! assert_eq!(history.current_token().unwrap(), Some(token));
//! assert!(history.transactions_after(token).unwrap().is_empty());
//! ```

use crate::config::HistoryConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::{ChangeRecord, HistoryToken, StoreChanged, Transaction};
use parking_lot::RwLock;
use std::collections::VecDeque;
use tokio::sync::broadcast;

/// Read side of the change history.
pub trait ChangeLog: Send + Sync {
    /// Returns the token of the newest transaction, or `None` if the history
    /// has never been written.
    fn current_token(&self) -> CoreResult<Option<HistoryToken>>;

    /// Returns all transactions strictly after `cursor`, in commit order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogUnavailable`] if transactions after `cursor`
    /// have already been truncated.
    fn transactions_after(&self, cursor: HistoryToken) -> CoreResult<Vec<Transaction>>;
}

struct HistoryState {
    transactions: VecDeque<Transaction>,
    next_token: HistoryToken,
    /// Highest token ever dropped by truncation.
    truncated_through: Option<HistoryToken>,
}

/// An in-process, append-only change history.
///
/// The history:
/// - Assigns strictly increasing tokens
/// - Keeps a bounded window of transactions
/// - Broadcasts a [`StoreChanged`] hint after each append
pub struct MemoryHistory {
    state: RwLock<HistoryState>,
    max_history: usize,
    notifier: broadcast::Sender<StoreChanged>,
}

impl MemoryHistory {
    /// Creates a history with default configuration.
    pub fn new() -> Self {
        Self::with_config(HistoryConfig::default())
    }

    /// Creates a history with the given configuration.
    pub fn with_config(config: HistoryConfig) -> Self {
        let (notifier, _) = broadcast::channel(config.notifier_capacity.max(1));
        Self {
            state: RwLock::new(HistoryState {
                transactions: VecDeque::new(),
                next_token: HistoryToken::new(1),
                truncated_through: None,
            }),
            max_history: config.max_history.max(1),
            notifier,
        }
    }

    /// Subscribes to store-changed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChanged> {
        self.notifier.subscribe()
    }

    /// Appends a transaction and returns its token.
    ///
    /// Empty change sets are still recorded so that the token advances.
    pub fn append(&self, author: Option<String>, changes: Vec<ChangeRecord>) -> HistoryToken {
        let token = {
            let mut state = self.state.write();
            let token = state.next_token;
            state.next_token = token.next();
            state.transactions.push_back(Transaction {
                token,
                author,
                changes,
            });

            while state.transactions.len() > self.max_history {
                if let Some(dropped) = state.transactions.pop_front() {
                    state.truncated_through = Some(dropped.token);
                }
            }
            token
        };

        // No receivers is fine; the history is still durable.
        let _ = self.notifier.send(StoreChanged { since: Some(token) });
        token
    }

    /// Drops transactions older than `token`.
    pub fn truncate_before(&self, token: HistoryToken) {
        let mut state = self.state.write();
        while state
            .transactions
            .front()
            .is_some_and(|txn| txn.token < token)
        {
            if let Some(dropped) = state.transactions.pop_front() {
                state.truncated_through = Some(dropped.token);
            }
        }
    }

    /// Returns the number of retained transactions.
    pub fn len(&self) -> usize {
        self.state.read().transactions.len()
    }

    /// Returns true if no transactions are retained.
    pub fn is_empty(&self) -> bool {
        self.state.read().transactions.is_empty()
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeLog for MemoryHistory {
    fn current_token(&self) -> CoreResult<Option<HistoryToken>> {
        let state = self.state.read();
        if state.next_token == HistoryToken::new(1) {
            Ok(None)
        } else {
            Ok(Some(HistoryToken::new(state.next_token.as_u64() - 1)))
        }
    }

    fn transactions_after(&self, cursor: HistoryToken) -> CoreResult<Vec<Transaction>> {
        let state = self.state.read();
        if let Some(truncated) = state.truncated_through {
            if cursor < truncated {
                return Err(CoreError::LogUnavailable {
                    cursor,
                    oldest: truncated.next(),
                });
            }
        }

        Ok(state
            .transactions
            .iter()
            .filter(|txn| txn.token > cursor)
            .cloned()
            .collect())
    }
}
