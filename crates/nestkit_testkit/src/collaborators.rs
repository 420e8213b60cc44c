//! Recording collaborators.

use async_trait::async_trait;
use nestkit_core::ObjectId;
use nestkit_propagation::{
    CleanupRoutines, CleanupTarget, NotificationCenter, NotificationRequest, PropagationError,
    PropagationResult,
};
use parking_lot::Mutex;
use std::collections::HashSet;

/// Cleanup routines that record every call and fail on request.
#[derive(Default)]
pub struct RecordingCleanup {
    calls: Mutex<Vec<(CleanupTarget, ObjectId)>>,
    failing: Mutex<HashSet<CleanupTarget>>,
}

impl RecordingCleanup {
    /// Creates a recorder where every routine succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the routine for `target` fail from now on.
    pub fn fail(&self, target: CleanupTarget) {
        self.failing.lock().insert(target);
    }

    /// Returns every call in order.
    pub fn calls(&self) -> Vec<(CleanupTarget, ObjectId)> {
        self.calls.lock().clone()
    }

    /// Returns the ids passed to the routine for `target`.
    pub fn calls_for(&self, target: CleanupTarget) -> Vec<ObjectId> {
        self.calls
            .lock()
            .iter()
            .filter(|(called, _)| *called == target)
            .map(|(_, id)| *id)
            .collect()
    }

    fn record(&self, target: CleanupTarget, id: ObjectId) -> PropagationResult<()> {
        self.calls.lock().push((target, id));
        if self.failing.lock().contains(&target) {
            return Err(PropagationError::external(format!("{target:?} cleanup failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl CleanupRoutines for RecordingCleanup {
    async fn cleanse_account(&self, account: ObjectId) -> PropagationResult<()> {
        self.record(CleanupTarget::Account, account)
    }

    async fn cleanse_user(&self, user: ObjectId) -> PropagationResult<()> {
        self.record(CleanupTarget::User, user)
    }

    async fn cleanse_data_asset(&self, asset: ObjectId) -> PropagationResult<()> {
        self.record(CleanupTarget::DataAsset, asset)
    }
}

/// A notification center that refuses every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableNotificationCenter;

#[async_trait]
impl NotificationCenter for UnavailableNotificationCenter {
    async fn schedule(&self, request: NotificationRequest) -> PropagationResult<()> {
        Err(PropagationError::external(format!(
            "notifications unavailable; dropped {}",
            request.identifier
        )))
    }

    async fn withdraw(&self, _identifiers: &[String]) -> PropagationResult<()> {
        Err(PropagationError::external("notifications unavailable"))
    }
}
