//! In-flight transfer index.

use crate::request::RequestKey;
use crate::transfer::{TransferId, TransferSnapshot};
use std::collections::HashMap;

/// Live transfers keyed by normalized request.
///
/// Rebuilt from the session's backlog on every scheduling pass, since the
/// session may carry transfers started by an earlier process.
#[derive(Debug, Default)]
pub struct PendingTransferIndex {
    by_key: HashMap<RequestKey, TransferId>,
}

impl PendingTransferIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the index with the live transfers among `snapshots`.
    pub fn rebuild(&mut self, snapshots: &[TransferSnapshot]) {
        self.by_key = snapshots
            .iter()
            .filter(|snapshot| snapshot.state.is_live())
            .map(|snapshot| (snapshot.request.key(), snapshot.id))
            .collect();
    }

    /// Returns true if an equivalent request is in flight.
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Records a newly started transfer.
    pub fn insert(&mut self, key: RequestKey, id: TransferId) {
        self.by_key.insert(key, id);
    }

    /// Forgets a finished transfer.
    pub fn remove_transfer(&mut self, id: TransferId) -> bool {
        let before = self.by_key.len();
        self.by_key.retain(|_, live| *live != id);
        self.by_key.len() != before
    }

    /// Returns the number of live transfers.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
