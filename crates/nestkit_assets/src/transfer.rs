//! Transfer layer abstraction.
//!
//! A [`TransferSession`] issues requests and reports each finished transfer
//! once on its completion channel. Sessions may outlive the process (a
//! platform background session), so the set of live transfers is read back
//! from the session rather than remembered locally.

use crate::error::{AssetError, AssetResult};
use crate::request::TransferRequest;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Session-assigned transfer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer:{}", self.0)
    }
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Transferring.
    Running,
    /// Paused by the session; will resume.
    Suspended,
    /// Being cancelled.
    Canceling,
    /// Finished.
    Completed,
}

impl TransferState {
    /// Returns true if the transfer will still produce a completion.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }
}

/// A transfer as reported by the session.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    /// Identifier.
    pub id: TransferId,
    /// The request as originally issued.
    pub request: TransferRequest,
    /// Current state.
    pub state: TransferState,
}

/// Where a downloaded body lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyLocation {
    /// A file owned by the session until the completion is handled.
    File(PathBuf),
    /// An in-memory body.
    Memory(Bytes),
}

impl BodyLocation {
    /// Reads the whole body.
    pub async fn read(&self) -> AssetResult<Bytes> {
        match self {
            Self::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            Self::Memory(bytes) => Ok(bytes.clone()),
        }
    }
}

/// An HTTP response to a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResponse {
    /// Status code.
    pub status: u16,
    /// Headers, keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// Body, if the session downloaded one.
    pub body: Option<BodyLocation>,
    /// When the last response byte arrived.
    pub response_end: DateTime<Utc>,
}

impl TransferResponse {
    /// Returns a header value; names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the mime type from `Content-Type`, without parameters.
    pub fn mime_type(&self) -> Option<String> {
        self.header("content-type")
            .and_then(|value| value.split(';').next())
            .map(|mime| mime.trim().to_ascii_lowercase())
            .filter(|mime| !mime.is_empty())
    }
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The origin answered.
    Response(TransferResponse),
    /// The transfer failed before a response arrived.
    Failed(String),
}

/// A finished transfer.
#[derive(Debug, Clone)]
pub struct TransferCompletion {
    /// Identifier.
    pub id: TransferId,
    /// The request as originally issued.
    pub request: TransferRequest,
    /// Outcome.
    pub outcome: TransferOutcome,
}

/// Issues transfers and reports their completions.
#[async_trait]
pub trait TransferSession: Send + Sync {
    /// Returns every transfer the session knows about.
    async fn tasks(&self) -> AssetResult<Vec<TransferSnapshot>>;

    /// Starts a transfer.
    async fn start(&self, request: TransferRequest) -> AssetResult<TransferId>;

    /// Cancels every transfer and refuses new ones.
    fn invalidate_and_cancel(&self);
}

/// An in-process transfer session driven by the caller.
///
/// Started transfers stay `Running` until the test completes them with one
/// of the `respond*`/`fail` methods, which emits the completion.
pub struct MockTransferSession {
    next_id: AtomicU64,
    transfers: Mutex<HashMap<TransferId, TransferSnapshot>>,
    started: Mutex<Vec<TransferId>>,
    invalidated: AtomicBool,
    completions: mpsc::UnboundedSender<TransferCompletion>,
}

impl MockTransferSession {
    /// Creates a session and the receiving end of its completions.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferCompletion>) {
        let (completions, receiver) = mpsc::unbounded_channel();
        let session = Self {
            next_id: AtomicU64::new(1),
            transfers: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            invalidated: AtomicBool::new(false),
            completions,
        };
        (session, receiver)
    }

    /// Returns every transfer started so far, in start order.
    pub fn started(&self) -> Vec<TransferSnapshot> {
        let transfers = self.transfers.lock();
        self.started
            .lock()
            .iter()
            .filter_map(|id| transfers.get(id).cloned())
            .collect()
    }

    /// Returns the number of live transfers.
    pub fn live_count(&self) -> usize {
        self.transfers
            .lock()
            .values()
            .filter(|transfer| transfer.state.is_live())
            .count()
    }

    /// Returns true once the session was invalidated.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// Adds a transfer left over from an earlier process.
    pub fn adopt(&self, request: TransferRequest, state: TransferState) -> TransferId {
        let id = TransferId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.transfers
            .lock()
            .insert(id, TransferSnapshot { id, request, state });
        id
    }

    /// Suspends a running transfer.
    pub fn suspend(&self, id: TransferId) {
        if let Some(transfer) = self.transfers.lock().get_mut(&id) {
            transfer.state = TransferState::Suspended;
        }
    }

    /// Completes a transfer with a response carrying `body` in memory.
    ///
    /// Returns false if the transfer is unknown or no longer live.
    pub fn respond(
        &self,
        id: TransferId,
        status: u16,
        headers: &[(&str, &str)],
        body: impl Into<Bytes>,
    ) -> bool {
        self.respond_with(id, status, headers, Some(BodyLocation::Memory(body.into())))
    }

    /// Completes a transfer with a response.
    pub fn respond_with(
        &self,
        id: TransferId,
        status: u16,
        headers: &[(&str, &str)],
        body: Option<BodyLocation>,
    ) -> bool {
        let headers = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), (*value).to_string()))
            .collect();
        self.finish(
            id,
            TransferOutcome::Response(TransferResponse {
                status,
                headers,
                body,
                response_end: Utc::now(),
            }),
        )
    }

    /// Completes a transfer with `304 Not Modified`.
    pub fn respond_not_modified(&self, id: TransferId) -> bool {
        self.respond_with(id, 304, &[], None)
    }

    /// Fails a transfer.
    pub fn fail(&self, id: TransferId, message: impl Into<String>) -> bool {
        self.finish(id, TransferOutcome::Failed(message.into()))
    }

    fn finish(&self, id: TransferId, outcome: TransferOutcome) -> bool {
        let request = {
            let mut transfers = self.transfers.lock();
            let Some(transfer) = transfers.get_mut(&id) else {
                return false;
            };
            if !transfer.state.is_live() {
                return false;
            }
            transfer.state = TransferState::Completed;
            transfer.request.clone()
        };
        // A dropped receiver only means nobody is listening any more.
        let _ = self.completions.send(TransferCompletion {
            id,
            request,
            outcome,
        });
        true
    }
}

#[async_trait]
impl TransferSession for MockTransferSession {
    async fn tasks(&self) -> AssetResult<Vec<TransferSnapshot>> {
        Ok(self.transfers.lock().values().cloned().collect())
    }

    async fn start(&self, request: TransferRequest) -> AssetResult<TransferId> {
        if self.is_invalidated() {
            return Err(AssetError::Invalidated);
        }
        let id = self.adopt(request, TransferState::Running);
        self.started.lock().push(id);
        Ok(id)
    }

    fn invalidate_and_cancel(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
        for transfer in self.transfers.lock().values_mut() {
            if transfer.state.is_live() {
                transfer.state = TransferState::Canceling;
            }
        }
    }
}
