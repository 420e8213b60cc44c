//! External collaborators the consumers talk to.
//!
//! The traits here are the only way consumers reach outside the store. Each
//! comes with a small in-process implementation usable in tests and in
//! headless deployments.

use crate::error::PropagationResult;
use crate::notification::NotificationRequest;
use async_trait::async_trait;
use nestkit_core::{Credential, ObjectId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Delivers and withdraws user notifications.
#[async_trait]
pub trait NotificationCenter: Send + Sync {
    /// Delivers `request` immediately.
    async fn schedule(&self, request: NotificationRequest) -> PropagationResult<()>;

    /// Removes pending and delivered notifications with any of `identifiers`.
    async fn withdraw(&self, identifiers: &[String]) -> PropagationResult<()>;
}

/// A notification center that keeps everything in memory.
///
/// Requests without a trigger are delivered on schedule, so this center
/// never holds pending requests; `pending` exists so withdrawals can be
/// observed the same way as on a real center.
#[derive(Debug, Default)]
pub struct MemoryNotificationCenter {
    pending: Mutex<BTreeMap<String, NotificationRequest>>,
    delivered: Mutex<BTreeMap<String, NotificationRequest>>,
    withdrawn: Mutex<Vec<String>>,
}

impl MemoryNotificationCenter {
    /// Creates an empty center.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delivered notifications, ordered by identifier.
    pub fn delivered(&self) -> Vec<NotificationRequest> {
        self.delivered.lock().values().cloned().collect()
    }

    /// Returns the delivered notification with `identifier`.
    pub fn delivered_with(&self, identifier: &str) -> Option<NotificationRequest> {
        self.delivered.lock().get(identifier).cloned()
    }

    /// Returns every identifier ever withdrawn, in order.
    pub fn withdrawn(&self) -> Vec<String> {
        self.withdrawn.lock().clone()
    }

    /// Returns the number of pending notifications.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl NotificationCenter for MemoryNotificationCenter {
    async fn schedule(&self, request: NotificationRequest) -> PropagationResult<()> {
        self.pending.lock().remove(&request.identifier);
        self.delivered
            .lock()
            .insert(request.identifier.clone(), request);
        Ok(())
    }

    async fn withdraw(&self, identifiers: &[String]) -> PropagationResult<()> {
        let mut pending = self.pending.lock();
        let mut delivered = self.delivered.lock();
        for identifier in identifiers {
            pending.remove(identifier);
            delivered.remove(identifier);
        }
        self.withdrawn.lock().extend(identifiers.iter().cloned());
        Ok(())
    }
}

/// A live network session bound to one account.
#[async_trait]
pub trait SessionActor: Send + Sync {
    /// Replaces the credential used for subsequent remote calls.
    async fn update_credential(&self, credential: Option<Credential>);
}

/// Live session actors, by account.
///
/// Passed explicitly to whoever needs it; lookups never create actors.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ObjectId, Arc<dyn SessionActor>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the live actor for `account`, replacing any previous one.
    pub fn register(&self, account: ObjectId, actor: Arc<dyn SessionActor>) {
        self.sessions.write().insert(account, actor);
    }

    /// Removes the actor for `account`.
    pub fn remove(&self, account: &ObjectId) -> Option<Arc<dyn SessionActor>> {
        self.sessions.write().remove(account)
    }

    /// Returns the live actor for `account`, if any.
    pub fn get(&self, account: &ObjectId) -> Option<Arc<dyn SessionActor>> {
        self.sessions.read().get(account).cloned()
    }

    /// Returns the number of live actors.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if no actor is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// A session actor that only holds its credential.
#[derive(Debug, Default)]
pub struct CredentialSession {
    credential: RwLock<Option<Credential>>,
    updates: std::sync::atomic::AtomicUsize,
}

impl CredentialSession {
    /// Creates a session with an initial credential.
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            credential: RwLock::new(credential),
            updates: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Returns the current credential.
    pub fn credential(&self) -> Option<Credential> {
        self.credential.read().clone()
    }

    /// Returns how many times the credential was replaced.
    pub fn updates(&self) -> usize {
        self.updates.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionActor for CredentialSession {
    async fn update_credential(&self, credential: Option<Credential>) {
        *self.credential.write() = credential;
        self.updates
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Storage maintenance routines run for newly inserted objects.
#[async_trait]
pub trait CleanupRoutines: Send + Sync {
    /// Merges duplicate accounts for the same remote identity.
    async fn cleanse_account(&self, account: ObjectId) -> PropagationResult<()>;

    /// Reaps users no account tracks any more.
    async fn cleanse_user(&self, user: ObjectId) -> PropagationResult<()>;

    /// Reaps data assets nothing references any more.
    async fn cleanse_data_asset(&self, asset: ObjectId) -> PropagationResult<()>;
}
