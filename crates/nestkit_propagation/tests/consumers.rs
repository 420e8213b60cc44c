//! End-to-end consumer behaviour over an in-memory store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use nestkit_core::{
    Account, Credential, EntityKind, ForegroundHost, MemoryCursorStore, MemoryStore, ObjectId,
    Preferences, User, UserDetail,
};
use nestkit_propagation::{
    CleanupRoutines, CredentialSession, InterruptionLevel, MemoryNotificationCenter,
    NotificationSound, PropagationConfig, PropagationEngine, PropagationError, PropagationResult,
    SessionRegistry,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingCleanup {
    calls: Mutex<Vec<(&'static str, ObjectId)>>,
    fail_users: bool,
}

#[async_trait]
impl CleanupRoutines for RecordingCleanup {
    async fn cleanse_account(&self, account: ObjectId) -> PropagationResult<()> {
        self.calls.lock().push(("account", account));
        Ok(())
    }

    async fn cleanse_user(&self, user: ObjectId) -> PropagationResult<()> {
        self.calls.lock().push(("user", user));
        if self.fail_users {
            return Err(PropagationError::external("user cleanup failed"));
        }
        Ok(())
    }

    async fn cleanse_data_asset(&self, asset: ObjectId) -> PropagationResult<()> {
        self.calls.lock().push(("data-asset", asset));
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    center: Arc<MemoryNotificationCenter>,
    sessions: Arc<SessionRegistry>,
    cleanup: Arc<RecordingCleanup>,
    engine: PropagationEngine,
    account: ObjectId,
    user: ObjectId,
}

impl Harness {
    fn new() -> Self {
        Self::with_cleanup(RecordingCleanup::default())
    }

    fn with_cleanup(cleanup: RecordingCleanup) -> Self {
        let store = Arc::new(MemoryStore::new());
        let center = Arc::new(MemoryNotificationCenter::new());
        let sessions = Arc::new(SessionRegistry::new());
        let cleanup = Arc::new(cleanup);

        let account = ObjectId::new(EntityKind::Account);
        let user = ObjectId::new(EntityKind::User);
        store
            .write("setup", |w| {
                w.insert_account(Account {
                    id: account,
                    user_remote_id: Some("783214".into()),
                    credential: None,
                    creation_date: Utc::now(),
                });
                w.insert_user(User {
                    id: user,
                    remote_id: Some("783214".into()),
                    accounts: vec![account],
                    creation_date: Utc::now(),
                });
                w.assign_record_key(&account, "account-record");
                Ok(())
            })
            .unwrap();

        let engine = PropagationEngine::new(
            PropagationConfig::default(),
            store.history(),
            Arc::new(MemoryCursorStore::new()),
            Arc::new(ForegroundHost),
        )
        .with_standard_consumers(
            store.clone(),
            center.clone(),
            sessions.clone(),
            cleanup.clone(),
        );

        Self {
            store,
            center,
            sessions,
            cleanup,
            engine,
            account,
            user,
        }
    }

    async fn cycle(&self) -> nestkit_propagation::CycleResult {
        self.engine.run_cycle(&CancellationToken::new()).await.unwrap()
    }

    fn snapshot(&self, age: Duration, following: &[&str]) -> UserDetail {
        let mut detail = UserDetail::new(self.user, Utc::now() - age);
        detail.name = Some("Jaehong".into());
        detail.username = Some("jaehong".into());
        detail.following_user_ids = Some(following.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>());
        detail
    }

    fn insert(&self, detail: UserDetail) -> ObjectId {
        self.store
            .write("fetch", |w| Ok(w.insert_user_detail(detail)))
            .unwrap()
            .0
    }
}

#[tokio::test]
async fn relation_diff_schedules_notification() {
    let h = Harness::new();
    h.insert(h.snapshot(Duration::minutes(30), &["A", "B"]));
    h.cycle().await;

    let newest = h.insert(h.snapshot(Duration::zero(), &["A", "C"]));
    let result = h.cycle().await;
    assert_eq!(result.dispatch.failures(), 0);

    let delivered = h.center.delivered();
    assert_eq!(delivered.len(), 1);
    let request = &delivered[0];
    assert_eq!(request.identifier, newest.canonical());
    assert_eq!(request.content.title, "Jaehong");
    assert_eq!(request.content.subtitle.as_deref(), Some("@jaehong"));
    assert_eq!(request.content.body, "1 New Following(s), 1 New Unfollowing(s)");
    assert_eq!(request.content.thread_identifier, "account-record");
    assert_eq!(request.content.category_identifier, "NewAccountData");
    assert_eq!(request.content.sound, NotificationSound::Default);
    assert_eq!(request.content.interruption_level, InterruptionLevel::TimeSensitive);
}

#[tokio::test]
async fn identical_snapshots_withdraw() {
    let h = Harness::new();
    h.insert(h.snapshot(Duration::minutes(30), &["A"]));
    h.cycle().await;

    let newest = h.insert(h.snapshot(Duration::zero(), &["A"]));
    h.store
        .write("cloud", |w| {
            w.assign_record_key(&newest, "detail-record");
            Ok(())
        })
        .unwrap();
    h.cycle().await;

    assert!(h.center.delivered().is_empty());
    assert_eq!(
        h.center.withdrawn(),
        vec!["detail-record".to_string(), newest.canonical()]
    );
}

#[tokio::test]
async fn stale_and_first_snapshots_are_skipped() {
    // First snapshot of the user: nothing to diff against.
    let first = Harness::new();
    first.cycle().await;
    first.insert(first.snapshot(Duration::minutes(5), &["A"]));
    let result = first.cycle().await;
    let report = result.dispatch.outcome("notification").unwrap();
    assert_eq!(report.result.as_ref().unwrap().skipped, 1);

    // Backfilled snapshots outside the freshness window.
    let backfill = Harness::new();
    backfill.cycle().await;
    backfill.insert(backfill.snapshot(Duration::hours(3), &["A"]));
    backfill.insert(backfill.snapshot(Duration::hours(2), &["B"]));
    backfill.cycle().await;

    for h in [first, backfill] {
        assert!(h.center.delivered().is_empty());
        assert!(h.center.withdrawn().is_empty());
    }
}

#[tokio::test]
async fn disabled_preferences_suppress_lines() {
    let h = Harness::new();
    h.store
        .write("local", |w| {
            w.set_preferences(Preferences {
                notify_following_changes: false,
                ..Preferences::default()
            });
            Ok(())
        })
        .unwrap();
    h.insert(h.snapshot(Duration::minutes(30), &["A"]));
    h.cycle().await;

    let newest = h.insert(h.snapshot(Duration::zero(), &["B"]));
    h.cycle().await;

    assert!(h.center.delivered().is_empty());
    assert!(h.center.withdrawn().contains(&newest.canonical()));
}

#[tokio::test]
async fn deleted_snapshot_is_withdrawn() {
    let h = Harness::new();
    let detail = h.insert(h.snapshot(Duration::zero(), &[]));
    h.cycle().await;

    h.store
        .write("cloud", |w| w.delete_user_detail(&detail))
        .unwrap();
    h.cycle().await;

    assert_eq!(h.center.withdrawn(), vec![detail.canonical()]);
}

#[tokio::test]
async fn credential_reaches_live_session() {
    let h = Harness::new();
    h.cycle().await;

    let session = Arc::new(CredentialSession::new(None));
    h.sessions.register(h.account, session.clone());

    // An account with no live session is skipped without stopping the loop.
    let other = ObjectId::new(EntityKind::Account);
    let credential = Credential {
        token: "token".into(),
        token_secret: "secret".into(),
    };
    h.store
        .write("cloud", |w| {
            w.insert_account(Account {
                id: other,
                user_remote_id: None,
                credential: None,
                creation_date: Utc::now(),
            });
            Ok(())
        })
        .unwrap();
    h.cycle().await;

    h.store
        .write("cloud", |w| {
            w.update_account_credential(&other, None)?;
            w.update_account_credential(&h.account, Some(credential.clone()))
        })
        .unwrap();
    let result = h.cycle().await;

    assert_eq!(session.credential(), Some(credential));
    assert_eq!(session.updates(), 1);
    let report = result.dispatch.outcome("credential").unwrap();
    let report = report.result.as_ref().unwrap();
    assert_eq!((report.handled, report.skipped), (1, 1));
}

#[tokio::test]
async fn cleanup_runs_once_per_insert_and_isolates_failures() {
    let h = Harness::with_cleanup(RecordingCleanup {
        fail_users: true,
        ..RecordingCleanup::default()
    });
    h.cycle().await;

    let account = ObjectId::new(EntityKind::Account);
    let user = ObjectId::new(EntityKind::User);
    for _ in 0..2 {
        h.store
            .write("cloud", |w| {
                w.insert_account(Account {
                    id: account,
                    user_remote_id: None,
                    credential: None,
                    creation_date: Utc::now(),
                });
                w.insert_user(User {
                    id: user,
                    remote_id: None,
                    accounts: vec![account],
                    creation_date: Utc::now(),
                });
                Ok(())
            })
            .unwrap();
    }
    let result = h.cycle().await;

    let calls = h.cleanup.calls.lock().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls.contains(&("account", account)));
    assert!(calls.contains(&("user", user)));

    let user_report = result.dispatch.outcome("cleanup-user").unwrap();
    assert_eq!(user_report.result.as_ref().unwrap().failed, 1);
    assert_eq!(result.dispatch.failures(), 0);
}

#[tokio::test]
async fn cancelled_cycle_stops_every_consumer_and_keeps_cursor() {
    let h = Harness::new();
    h.insert(h.snapshot(Duration::minutes(30), &["A"]));
    h.cycle().await;

    let session = Arc::new(CredentialSession::new(None));
    h.sessions.register(h.account, session.clone());
    h.insert(h.snapshot(Duration::zero(), &["B"]));
    h.store
        .write("cloud", |w| {
            w.update_account_credential(
                &h.account,
                Some(Credential {
                    token: "token".into(),
                    token_secret: "secret".into(),
                }),
            )?;
            w.insert_user(User {
                id: ObjectId::new(EntityKind::User),
                remote_id: None,
                accounts: Vec::new(),
                creation_date: Utc::now(),
            });
            Ok(())
        })
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = h.engine.run_cycle(&cancel).await.unwrap();

    for consumer in ["notification", "credential", "cleanup-user"] {
        let outcome = result.dispatch.outcome(consumer).unwrap();
        assert!(
            matches!(outcome.result, Err(PropagationError::Cancelled)),
            "{consumer} kept running"
        );
    }
    assert!(h.center.delivered().is_empty());
    assert_eq!(session.updates(), 0);
    assert!(h.cleanup.calls.lock().is_empty());

    // The default policy advanced the cursor before dispatch; it stays.
    assert_eq!(h.cycle().await.transactions, 0);
}

#[tokio::test]
async fn standard_consumers_launch_in_priority_order() {
    let h = Harness::new();
    assert_eq!(
        h.engine.consumer_names(),
        vec![
            "notification",
            "credential",
            "cleanup-account",
            "cleanup-user",
            "cleanup-data-asset"
        ]
    );
}
