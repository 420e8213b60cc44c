//! Background execution guard.
//!
//! Long operations (a propagation cycle, an asset commit) ask the hosting
//! process for extra run time before they start. The host hands back an
//! [`ExtensionGrant`] whose token fires when the budget runs out or the host
//! revokes it. [`with_extended_background_execution`] races the operation
//! against that token; an expired operation is dropped at its next
//! suspension point and must be safe to retry on the next trigger.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The host revoked the extension before the operation finished.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("background execution expired: {reason}")]
pub struct ExecutionExpired {
    /// The reason the extension was requested with.
    pub reason: String,
}

/// A granted extension of process run time.
///
/// Dropping the grant tells the host the work is done.
pub struct ExtensionGrant {
    expired: CancellationToken,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ExtensionGrant {
    /// Creates a grant that expires when `expired` is cancelled.
    pub fn new(expired: CancellationToken) -> Self {
        Self {
            expired,
            release: None,
        }
    }

    /// Registers a callback run when the grant is dropped.
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Returns the expiration token.
    pub fn expiration(&self) -> &CancellationToken {
        &self.expired
    }

    /// Returns true if the grant has expired.
    pub fn is_expired(&self) -> bool {
        self.expired.is_cancelled()
    }
}

impl Drop for ExtensionGrant {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Process lifecycle notifier that grants run-time extensions.
pub trait LifecycleHost: Send + Sync {
    /// Requests extra run time for the operation named `reason`.
    fn begin_extension(&self, reason: &str) -> ExtensionGrant;
}

/// A host that is always in the foreground; grants never expire.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForegroundHost;

impl LifecycleHost for ForegroundHost {
    fn begin_extension(&self, _reason: &str) -> ExtensionGrant {
        ExtensionGrant::new(CancellationToken::new())
    }
}

/// A host that expires every grant after a fixed budget, and can revoke all
/// outstanding grants at once (process suspension).
///
/// Must be used inside a tokio runtime when a budget is set.
#[derive(Clone, Default)]
pub struct BudgetHost {
    budget: Option<Duration>,
    inner: Arc<BudgetHostInner>,
}

#[derive(Default)]
struct BudgetHostInner {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, CancellationToken>>,
}

impl BudgetHost {
    /// Creates a host with the given per-grant budget.
    pub fn new(budget: Duration) -> Self {
        Self {
            budget: Some(budget),
            inner: Arc::default(),
        }
    }

    /// Creates a host with no budget; grants expire only on [`Self::suspend`].
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Returns the number of outstanding grants.
    pub fn active_grants(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Expires every outstanding grant.
    pub fn suspend(&self) {
        let active: Vec<_> = self.inner.active.lock().drain().collect();
        if !active.is_empty() {
            warn!(grants = active.len(), "revoking background execution");
        }
        for (_, token) in active {
            token.cancel();
        }
    }
}

impl LifecycleHost for BudgetHost {
    fn begin_extension(&self, reason: &str) -> ExtensionGrant {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.inner.active.lock().insert(id, token.clone());
        debug!(id, reason, "background execution granted");

        if let Some(budget) = self.budget {
            let timer = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = timer.cancelled() => {}
                    () = tokio::time::sleep(budget) => timer.cancel(),
                }
            });
        }

        let inner = Arc::clone(&self.inner);
        let released = token.clone();
        ExtensionGrant::new(token).on_release(move || {
            inner.active.lock().remove(&id);
            // Stops the budget timer.
            released.cancel();
        })
    }
}

/// Runs `operation` under a run-time extension from `host`.
///
/// Returns [`ExecutionExpired`] if the grant expires first; `operation` is
/// dropped at that point.
pub async fn with_extended_background_execution<F, T>(
    host: &dyn LifecycleHost,
    reason: &str,
    operation: F,
) -> Result<T, ExecutionExpired>
where
    F: Future<Output = T>,
{
    let grant = host.begin_extension(reason);
    let expiration = grant.expiration().clone();

    tokio::select! {
        biased;
        output = operation => Ok(output),
        () = expiration.cancelled() => {
            warn!(reason, "background execution expired before completion");
            Err(ExecutionExpired {
                reason: reason.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_foreground() {
        let value = with_extended_background_execution(&ForegroundHost, "test", async { 7 })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn expires_after_budget() {
        let host = BudgetHost::new(Duration::from_millis(10));
        let result = with_extended_background_execution(&host, "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        assert_eq!(
            result,
            Err(ExecutionExpired {
                reason: "slow".into()
            })
        );
        assert_eq!(host.active_grants(), 0);
    }

    #[tokio::test]
    async fn suspend_revokes_outstanding_grants() {
        let host = BudgetHost::unbounded();
        let suspender = host.clone();
        let handle = tokio::spawn(async move {
            with_extended_background_execution(&host, "cycle", std::future::pending::<()>()).await
        });

        while suspender.active_grants() == 0 {
            tokio::task::yield_now().await;
        }
        suspender.suspend();

        assert!(handle.await.unwrap().is_err());
    }

    #[test]
    fn release_runs_on_drop() {
        let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let grant = ExtensionGrant::new(CancellationToken::new())
            .on_release(move || flag.store(true, Ordering::SeqCst));
        drop(grant);
        assert!(released.load(Ordering::SeqCst));
    }
}
