//! Change log reader.

use crate::error::PropagationResult;
use nestkit_core::{decode_cursor, encode_cursor, ChangeLog, CursorStore, HistoryToken, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transactions read in one cycle.
#[derive(Debug, Clone, Default)]
pub struct ReadBatch {
    /// The cursor the batch was read after, if there was one.
    pub cursor: Option<HistoryToken>,
    /// Transactions strictly after `cursor`, in commit order.
    pub transactions: Vec<Transaction>,
    /// True if the persisted cursor was unusable and the tip was captured
    /// instead.
    pub reset: bool,
}

impl ReadBatch {
    /// Returns the token to persist once the batch is handled.
    pub fn next_cursor(&self) -> Option<HistoryToken> {
        self.transactions.last().map(|txn| txn.token)
    }

    /// Returns true if there is nothing to dispatch.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Reads history after the persisted cursor.
///
/// A missing cursor means "never processed": the reader captures the current
/// tip and returns nothing, so existing state is not replayed as new.
pub struct ChangeLogReader {
    log: Arc<dyn ChangeLog>,
    cursors: Arc<dyn CursorStore>,
}

impl ChangeLogReader {
    /// Creates a reader.
    pub fn new(log: Arc<dyn ChangeLog>, cursors: Arc<dyn CursorStore>) -> Self {
        Self { log, cursors }
    }

    /// Loads and decodes the persisted cursor.
    pub fn load_cursor(&self) -> PropagationResult<Option<HistoryToken>> {
        match self.cursors.load()? {
            Some(blob) => Ok(Some(decode_cursor(&blob)?)),
            None => Ok(None),
        }
    }

    /// Returns all transactions strictly after `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PropagationError::LogUnavailable`] if the history no longer
    /// reaches back to `cursor`.
    pub fn fetch(&self, cursor: HistoryToken) -> PropagationResult<Vec<Transaction>> {
        Ok(self.log.transactions_after(cursor)?)
    }

    /// Reads the next batch, recovering from unusable cursors.
    pub fn read(&self) -> PropagationResult<ReadBatch> {
        let cursor = match self.load_cursor() {
            Ok(cursor) => cursor,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "persisted cursor unusable, treating as absent");
                return self.capture_tip(true);
            }
            Err(e) => return Err(e),
        };

        let Some(cursor) = cursor else {
            return self.capture_tip(false);
        };

        match self.fetch(cursor) {
            Ok(transactions) => {
                debug!(%cursor, count = transactions.len(), "read history");
                Ok(ReadBatch {
                    cursor: Some(cursor),
                    transactions,
                    reset: false,
                })
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "history truncated past cursor, treating as absent");
                self.capture_tip(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Persists the batch's last token if it moves the cursor forward.
    ///
    /// Returns the persisted token, if any.
    pub fn advance(&self, batch: &ReadBatch) -> PropagationResult<Option<HistoryToken>> {
        let Some(next) = batch.next_cursor() else {
            return Ok(None);
        };
        self.advance_to(next)
    }

    /// Persists `token` unless the stored cursor is already at or past it.
    pub fn advance_to(&self, token: HistoryToken) -> PropagationResult<Option<HistoryToken>> {
        let current = self.load_cursor().unwrap_or(None);
        if current.is_some_and(|current| current >= token) {
            debug!(%token, "cursor already advanced");
            return Ok(None);
        }
        self.cursors.save(&encode_cursor(token)?)?;
        debug!(%token, "cursor advanced");
        Ok(Some(token))
    }

    fn capture_tip(&self, reset: bool) -> PropagationResult<ReadBatch> {
        match self.log.current_token()? {
            Some(tip) => {
                self.cursors.save(&encode_cursor(tip)?)?;
                info!(%tip, reset, "captured history tip as cursor");
            }
            None if reset => {
                self.cursors.clear()?;
            }
            None => {}
        }
        Ok(ReadBatch {
            cursor: None,
            transactions: Vec::new(),
            reset,
        })
    }
}
