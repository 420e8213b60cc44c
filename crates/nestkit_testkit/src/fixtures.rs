//! Test fixtures and store helpers.
//!
//! Provides builders for snapshots, a seeded in-memory store, and fully
//! wired propagation and asset fixtures over it.

use crate::collaborators::RecordingCleanup;
use chrono::{DateTime, Duration, Utc};
use nestkit_assets::{AssetCacheConfig, AssetManager, MemoryPressure, MockTransferSession};
use nestkit_core::{
    Account, EntityKind, FileCursorStore, ForegroundHost, LifecycleHost, MemoryCursorStore,
    MemoryStore, ObjectId, Preferences, User, UserDetail,
};
use nestkit_propagation::{
    CycleResult, MemoryNotificationCenter, PropagationConfig, PropagationEngine, SessionRegistry,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Remote id used by [`TestStore::with_account`].
pub const DEFAULT_REMOTE_ID: &str = "783214";

/// Record key used by [`TestStore::with_account`].
pub const DEFAULT_ACCOUNT_RECORD_KEY: &str = "account-record";

/// An account and the user it tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeededAccount {
    /// The account.
    pub account: ObjectId,
    /// The account's own user.
    pub user: ObjectId,
}

/// An in-memory store with seeding helpers.
pub struct TestStore {
    /// The store.
    pub store: Arc<MemoryStore>,
}

impl TestStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Creates a store holding one account that tracks its own user.
    pub fn with_account() -> (Self, SeededAccount) {
        let store = Self::new();
        let seeded = store.seed_account(DEFAULT_REMOTE_ID, Some(DEFAULT_ACCOUNT_RECORD_KEY));
        (store, seeded)
    }

    /// Inserts an account and its user in one transaction.
    pub fn seed_account(&self, remote_id: &str, record_key: Option<&str>) -> SeededAccount {
        let account = ObjectId::new(EntityKind::Account);
        let user = ObjectId::new(EntityKind::User);
        self.store
            .write("setup", |w| {
                w.insert_account(Account {
                    id: account,
                    user_remote_id: Some(remote_id.to_string()),
                    credential: None,
                    creation_date: Utc::now(),
                });
                w.insert_user(User {
                    id: user,
                    remote_id: Some(remote_id.to_string()),
                    accounts: vec![account],
                    creation_date: Utc::now(),
                });
                if let Some(key) = record_key {
                    w.assign_record_key(&account, key);
                }
                Ok(())
            })
            .expect("Failed to seed account");
        SeededAccount { account, user }
    }

    /// Inserts a snapshot in its own transaction.
    pub fn insert_snapshot(&self, detail: UserDetail) -> ObjectId {
        self.store
            .write("fetch", |w| Ok(w.insert_user_detail(detail)))
            .expect("Failed to insert snapshot")
            .0
    }

    /// Stores preferences in their own transaction.
    pub fn set_preferences(&self, preferences: Preferences) {
        self.store
            .write("preferences", |w| {
                w.set_preferences(preferences);
                Ok(())
            })
            .expect("Failed to store preferences");
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = MemoryStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Builder for [`UserDetail`] snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    detail: UserDetail,
}

impl SnapshotBuilder {
    /// Starts a snapshot of `user` taken now.
    pub fn new(user: ObjectId) -> Self {
        Self {
            detail: UserDetail::new(user, Utc::now()),
        }
    }

    /// Sets when the snapshot was taken.
    pub fn taken_at(mut self, date: DateTime<Utc>) -> Self {
        self.detail.creation_date = date;
        self
    }

    /// Sets the snapshot age relative to now.
    pub fn aged(self, age: Duration) -> Self {
        self.taken_at(Utc::now() - age)
    }

    /// Sets the display name.
    pub fn name(mut self, name: &str) -> Self {
        self.detail.name = Some(name.to_string());
        self
    }

    /// Sets the handle.
    pub fn username(mut self, username: &str) -> Self {
        self.detail.username = Some(username.to_string());
        self
    }

    /// Sets the avatar url.
    pub fn profile_image(mut self, url: &str) -> Self {
        self.detail.profile_image_url = Some(url.to_string());
        self
    }

    /// Captures the following set.
    pub fn following(mut self, ids: &[&str]) -> Self {
        self.detail.following_user_ids = Some(id_set(ids));
        self
    }

    /// Captures the follower set.
    pub fn followers(mut self, ids: &[&str]) -> Self {
        self.detail.follower_user_ids = Some(id_set(ids));
        self
    }

    /// Captures the blocking set.
    pub fn blocking(mut self, ids: &[&str]) -> Self {
        self.detail.blocking_user_ids = Some(id_set(ids));
        self
    }

    /// Captures the muting set.
    pub fn muting(mut self, ids: &[&str]) -> Self {
        self.detail.muting_user_ids = Some(id_set(ids));
        self
    }

    /// Finishes the snapshot.
    pub fn build(self) -> UserDetail {
        self.detail
    }
}

fn id_set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// A propagation engine wired to in-memory collaborators.
pub struct PropagationFixture {
    /// The seeded store.
    pub store: TestStore,
    /// The seeded account.
    pub seeded: SeededAccount,
    /// Notification sink.
    pub center: Arc<MemoryNotificationCenter>,
    /// Live session registry.
    pub sessions: Arc<SessionRegistry>,
    /// Cleanup recorder.
    pub cleanup: Arc<RecordingCleanup>,
    /// The engine.
    pub engine: Arc<PropagationEngine>,
}

impl PropagationFixture {
    /// Creates a fixture with default configuration.
    pub fn new() -> Self {
        Self::with_config(PropagationConfig::default())
    }

    /// Creates a fixture with the given configuration.
    pub fn with_config(config: PropagationConfig) -> Self {
        Self::over(TestStore::with_account(), config)
    }

    /// Creates a fixture over an already seeded store.
    pub fn over((store, seeded): (TestStore, SeededAccount), config: PropagationConfig) -> Self {
        let center = Arc::new(MemoryNotificationCenter::new());
        let sessions = Arc::new(SessionRegistry::new());
        let cleanup = Arc::new(RecordingCleanup::new());
        let engine = PropagationEngine::new(
            config,
            store.history(),
            Arc::new(MemoryCursorStore::new()),
            Arc::new(ForegroundHost),
        )
        .with_standard_consumers(
            store.store.clone(),
            center.clone(),
            sessions.clone(),
            cleanup.clone(),
        );

        Self {
            store,
            seeded,
            center,
            sessions,
            cleanup,
            engine: Arc::new(engine),
        }
    }

    /// Runs one cycle and panics on failure.
    pub async fn cycle(&self) -> CycleResult {
        self.engine
            .run_cycle(&CancellationToken::new())
            .await
            .expect("Propagation cycle failed")
    }

    /// Returns a snapshot builder for the seeded user.
    pub fn snapshot(&self) -> SnapshotBuilder {
        SnapshotBuilder::new(self.seeded.user)
    }
}

impl Default for PropagationFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// An asset manager over a mock transfer session.
pub struct AssetFixture {
    /// The mock session.
    pub session: Arc<MockTransferSession>,
    /// The manager.
    pub manager: Arc<AssetManager>,
    /// Memory-pressure feed.
    pub pressure: broadcast::Sender<MemoryPressure>,
}

impl AssetFixture {
    /// Spawns a manager writing to `store`. Must run inside a tokio runtime.
    pub fn spawn(store: Arc<MemoryStore>) -> Self {
        Self::spawn_with(store, Arc::new(ForegroundHost), AssetCacheConfig::default())
    }

    /// Spawns a manager with an explicit host and configuration.
    pub fn spawn_with(
        store: Arc<MemoryStore>,
        host: Arc<dyn LifecycleHost>,
        config: AssetCacheConfig,
    ) -> Self {
        let (session, completions) = MockTransferSession::new();
        let session = Arc::new(session);
        let (pressure, pressure_rx) = broadcast::channel(8);
        let manager = AssetManager::spawn(
            store,
            session.clone(),
            completions,
            Some(pressure_rx),
            host,
            config,
        );
        Self {
            session,
            manager,
            pressure,
        }
    }
}

/// A file cursor store in a temporary directory.
pub struct TempCursorFile {
    /// The cursor store.
    pub cursors: Arc<FileCursorStore>,
    /// Path of the cursor file.
    pub path: PathBuf,
    _dir: TempDir,
}

impl TempCursorFile {
    /// Creates a cursor store whose file does not exist yet.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("propagation.cursor");
        Self {
            cursors: Arc::new(FileCursorStore::new(&path)),
            path,
            _dir: dir,
        }
    }

    /// Opens a second store over the same file, as a restarted process would.
    pub fn reopen(&self) -> Arc<FileCursorStore> {
        Arc::new(FileCursorStore::new(&self.path))
    }
}

impl Default for TempCursorFile {
    fn default() -> Self {
        Self::new()
    }
}
