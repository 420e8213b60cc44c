//! In-process reference store.

use crate::config::HistoryConfig;
use crate::error::{CoreError, CoreResult};
use crate::history::{ChangeLog, MemoryHistory};
use crate::models::{Account, AssetRecord, Credential, Preferences, User, UserDetail};
use crate::store::{AssetMutation, AssetStore, Store};
use crate::types::{ChangeRecord, EntityKind, HistoryToken, ObjectId, StoreChanged, Transaction};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const ASSET_WRITER_AUTHOR: &str = "asset-writer";

#[derive(Debug, Default, Clone)]
struct StoreState {
    accounts: HashMap<ObjectId, Account>,
    users: HashMap<ObjectId, User>,
    user_details: HashMap<ObjectId, UserDetail>,
    assets: Vec<AssetRecord>,
    preferences: Option<(Preferences, DateTime<Utc>)>,
    record_keys: HashMap<ObjectId, String>,
}

impl StoreState {
    fn latest_asset(&self, url: &str) -> Option<&AssetRecord> {
        self.assets
            .iter()
            .filter(|asset| asset.url == url)
            .max_by_key(|asset| asset.creation_date)
    }
}

/// Mutations of one store transaction.
///
/// Obtained from [`MemoryStore::write`]; every call records one change.
pub struct StoreWriter<'a> {
    state: &'a mut StoreState,
    changes: Vec<ChangeRecord>,
}

impl StoreWriter<'_> {
    /// Inserts an account.
    pub fn insert_account(&mut self, account: Account) -> ObjectId {
        let id = account.id;
        self.state.accounts.insert(id, account);
        self.changes.push(ChangeRecord::insert(id));
        id
    }

    /// Replaces an account's credential.
    pub fn update_account_credential(
        &mut self,
        id: &ObjectId,
        credential: Option<Credential>,
    ) -> CoreResult<()> {
        let account = self
            .state
            .accounts
            .get_mut(id)
            .ok_or(CoreError::ObjectNotFound(*id))?;
        account.credential = credential;
        self.changes.push(ChangeRecord::update(*id));
        Ok(())
    }

    /// Inserts a user.
    pub fn insert_user(&mut self, user: User) -> ObjectId {
        let id = user.id;
        self.state.users.insert(id, user);
        self.changes.push(ChangeRecord::insert(id));
        id
    }

    /// Inserts a snapshot.
    pub fn insert_user_detail(&mut self, detail: UserDetail) -> ObjectId {
        let id = detail.id;
        self.state.user_details.insert(id, detail);
        self.changes.push(ChangeRecord::insert(id));
        id
    }

    /// Records an update of an existing snapshot without changing it.
    pub fn touch_user_detail(&mut self, id: &ObjectId) -> CoreResult<()> {
        if !self.state.user_details.contains_key(id) {
            return Err(CoreError::ObjectNotFound(*id));
        }
        self.changes.push(ChangeRecord::update(*id));
        Ok(())
    }

    /// Deletes a snapshot.
    pub fn delete_user_detail(&mut self, id: &ObjectId) -> CoreResult<()> {
        self.state
            .user_details
            .remove(id)
            .ok_or(CoreError::ObjectNotFound(*id))?;
        self.changes.push(ChangeRecord::delete(*id));
        Ok(())
    }

    /// Replaces the preferences row.
    pub fn set_preferences(&mut self, preferences: Preferences) {
        self.state.preferences = Some((preferences, Utc::now()));
        self.changes.push(ChangeRecord::update(ObjectId::from_parts(
            EntityKind::Preferences,
            uuid::Uuid::nil(),
        )));
    }

    /// Assigns a storage record key to an object.
    pub fn assign_record_key(&mut self, id: &ObjectId, key: impl Into<String>) {
        self.state.record_keys.insert(*id, key.into());
    }
}

/// An in-memory store with an attached change history.
///
/// Every call to [`MemoryStore::write`] or [`AssetStore::commit_assets`]
/// appends exactly one transaction to the history, so downstream readers see
/// local and replicated writes alike.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    history: Arc<MemoryHistory>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_config(HistoryConfig::default())
    }

    /// Creates an empty store with the given history configuration.
    pub fn with_config(config: HistoryConfig) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            history: Arc::new(MemoryHistory::with_config(config)),
        }
    }

    /// Returns the attached history.
    pub fn history(&self) -> Arc<MemoryHistory> {
        Arc::clone(&self.history)
    }

    /// Subscribes to store-changed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChanged> {
        self.history.subscribe()
    }

    /// Runs `f` as one transaction authored by `author`.
    ///
    /// If `f` fails, no changes are kept and nothing is recorded.
    pub fn write<T>(
        &self,
        author: &str,
        f: impl FnOnce(&mut StoreWriter<'_>) -> CoreResult<T>,
    ) -> CoreResult<(T, HistoryToken)> {
        let mut state = self.state.write();
        let mut staged = state.clone();
        let mut writer = StoreWriter {
            state: &mut staged,
            changes: Vec::new(),
        };
        let value = f(&mut writer)?;
        let changes = writer.changes;
        *state = staged;
        // Append while holding the state lock so tokens follow commit order.
        let token = self.history.append(Some(author.to_string()), changes);
        Ok((value, token))
    }

    /// Returns the number of stored asset rows.
    pub fn asset_count(&self) -> usize {
        self.state.read().assets.len()
    }

    /// Returns every stored row for `url`, oldest first.
    pub fn assets_for_url(&self, url: &str) -> Vec<AssetRecord> {
        let mut rows: Vec<_> = self
            .state
            .read()
            .assets
            .iter()
            .filter(|asset| asset.url == url)
            .cloned()
            .collect();
        rows.sort_by_key(|asset| asset.creation_date);
        rows
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn account(&self, id: &ObjectId) -> CoreResult<Option<Account>> {
        Ok(self.state.read().accounts.get(id).cloned())
    }

    fn user(&self, id: &ObjectId) -> CoreResult<Option<User>> {
        Ok(self.state.read().users.get(id).cloned())
    }

    fn user_detail(&self, id: &ObjectId) -> CoreResult<Option<UserDetail>> {
        Ok(self.state.read().user_details.get(id).cloned())
    }

    fn user_details_for_user(&self, user_id: &ObjectId) -> CoreResult<Vec<UserDetail>> {
        let mut details: Vec<_> = self
            .state
            .read()
            .user_details
            .values()
            .filter(|detail| detail.user_id == *user_id)
            .cloned()
            .collect();
        details.sort_by(|a, b| {
            a.creation_date
                .cmp(&b.creation_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(details)
    }

    fn record_key(&self, id: &ObjectId) -> CoreResult<Option<String>> {
        Ok(self.state.read().record_keys.get(id).cloned())
    }

    fn preferences(&self) -> CoreResult<Preferences> {
        Ok(self
            .state
            .read()
            .preferences
            .map(|(preferences, _)| preferences)
            .unwrap_or_default())
    }
}

impl AssetStore for MemoryStore {
    fn latest_asset(&self, url: &str) -> CoreResult<Option<AssetRecord>> {
        Ok(self.state.read().latest_asset(url).cloned())
    }

    fn latest_assets(&self, urls: &[String]) -> CoreResult<Vec<AssetRecord>> {
        let state = self.state.read();
        Ok(urls
            .iter()
            .filter_map(|url| state.latest_asset(url).cloned())
            .collect())
    }

    fn commit_assets(&self, mutations: &[AssetMutation]) -> CoreResult<Option<HistoryToken>> {
        if mutations.is_empty() {
            return Ok(None);
        }

        let mut state = self.state.write();
        let mut assets = state.assets.clone();
        let mut changes = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            match mutation {
                AssetMutation::Insert {
                    record,
                    expected_latest,
                } => {
                    let current = assets
                        .iter()
                        .filter(|asset| asset.url == record.url)
                        .max_by_key(|asset| asset.creation_date)
                        .map(|asset| asset.id);
                    if current != *expected_latest {
                        return Err(CoreError::write_conflict(&record.url));
                    }
                    assets.push(record.clone());
                    changes.push(ChangeRecord::insert(record.id));
                }
                AssetMutation::Update { id, url, metadata } => {
                    let row = assets
                        .iter_mut()
                        .find(|asset| asset.id == *id)
                        .ok_or_else(|| CoreError::write_conflict(url))?;
                    metadata.apply_to(row);
                    changes.push(ChangeRecord::update(*id));
                }
            }
        }

        state.assets = assets;
        let token = self
            .history
            .append(Some(ASSET_WRITER_AUTHOR.to_string()), changes);
        Ok(Some(token))
    }
}

impl ChangeLog for MemoryStore {
    fn current_token(&self) -> CoreResult<Option<HistoryToken>> {
        self.history.current_token()
    }

    fn transactions_after(&self, cursor: HistoryToken) -> CoreResult<Vec<Transaction>> {
        self.history.transactions_after(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::store::{preceding_user_detail, AssetMetadata};
    use bytes::Bytes;
    use chrono::Duration;

    fn asset(url: &str, body: &'static [u8], created: DateTime<Utc>) -> AssetRecord {
        AssetRecord {
            id: ObjectId::new(EntityKind::DataAsset),
            url: url.into(),
            content_hash: ContentHash::of(body),
            mime_type: None,
            data: Bytes::from_static(body),
            last_modified: None,
            last_verified: None,
            creation_date: created,
        }
    }

    #[test]
    fn write_records_one_transaction() {
        let store = MemoryStore::new();
        let user_id = ObjectId::new(EntityKind::User);
        let (_, token) = store
            .write("local", |w| {
                w.insert_user(User {
                    id: user_id,
                    remote_id: Some("42".into()),
                    accounts: vec![],
                    creation_date: Utc::now(),
                });
                w.insert_user_detail(UserDetail::new(user_id, Utc::now()));
                Ok(())
            })
            .unwrap();

        let txns = store.transactions_after(HistoryToken::new(0)).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].token, token);
        assert_eq!(txns[0].changes.len(), 2);
        assert_eq!(txns[0].author.as_deref(), Some("local"));
    }

    #[test]
    fn failed_write_keeps_nothing() {
        let store = MemoryStore::new();
        let missing = ObjectId::new(EntityKind::Account);
        let result = store.write("local", |w| {
            w.insert_user(User {
                id: ObjectId::new(EntityKind::User),
                remote_id: None,
                accounts: vec![],
                creation_date: Utc::now(),
            });
            w.update_account_credential(&missing, None)
        });

        assert!(matches!(result, Err(CoreError::ObjectNotFound(_))));
        assert_eq!(store.current_token().unwrap(), None);
    }

    #[test]
    fn preceding_snapshot_is_chronological() {
        let store = MemoryStore::new();
        let user_id = ObjectId::new(EntityKind::User);
        let now = Utc::now();
        let first = UserDetail::new(user_id, now - Duration::minutes(10));
        let second = UserDetail::new(user_id, now);
        let (first_id, second_id) = (first.id, second.id);
        store
            .write("local", |w| {
                w.insert_user_detail(second);
                w.insert_user_detail(first);
                Ok(())
            })
            .unwrap();

        let newest = store.user_detail(&second_id).unwrap().unwrap();
        let previous = preceding_user_detail(&store, &newest).unwrap().unwrap();
        assert_eq!(previous.id, first_id);

        let oldest = store.user_detail(&first_id).unwrap().unwrap();
        assert!(preceding_user_detail(&store, &oldest).unwrap().is_none());
    }

    #[test]
    fn latest_asset_is_newest_by_creation() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = asset("https://a/1.png", b"old", now - Duration::hours(1));
        let new = asset("https://a/1.png", b"new", now);
        let new_id = new.id;

        store
            .commit_assets(&[AssetMutation::Insert {
                record: old.clone(),
                expected_latest: None,
            }])
            .unwrap();
        store
            .commit_assets(&[AssetMutation::Insert {
                record: new,
                expected_latest: Some(old.id),
            }])
            .unwrap();

        assert_eq!(store.latest_asset("https://a/1.png").unwrap().unwrap().id, new_id);
        assert_eq!(store.assets_for_url("https://a/1.png").len(), 2);
    }

    #[test]
    fn stale_insert_conflicts_atomically() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = asset("https://a/1.png", b"one", now);
        store
            .commit_assets(&[AssetMutation::Insert {
                record: first,
                expected_latest: None,
            }])
            .unwrap();

        let other = asset("https://a/2.png", b"two", now);
        let stale = asset("https://a/1.png", b"three", now);
        let err = store
            .commit_assets(&[
                AssetMutation::Insert {
                    record: other,
                    expected_latest: None,
                },
                AssetMutation::Insert {
                    record: stale,
                    expected_latest: None,
                },
            ])
            .unwrap_err();

        assert!(matches!(err, CoreError::WriteConflict { .. }));
        assert_eq!(store.asset_count(), 1);
    }

    #[test]
    fn update_touches_metadata_only() {
        let store = MemoryStore::new();
        let record = asset("https://a/1.png", b"body", Utc::now());
        let id = record.id;
        store
            .commit_assets(&[AssetMutation::Insert {
                record,
                expected_latest: None,
            }])
            .unwrap();

        let verified = Utc::now();
        store
            .commit_assets(&[AssetMutation::Update {
                id,
                url: "https://a/1.png".into(),
                metadata: AssetMetadata {
                    last_verified: Some(verified),
                    ..AssetMetadata::default()
                },
            }])
            .unwrap();

        let latest = store.latest_asset("https://a/1.png").unwrap().unwrap();
        assert_eq!(latest.last_verified, Some(verified));
        assert_eq!(latest.data, Bytes::from_static(b"body"));
    }

    #[test]
    fn preferences_default_until_written() {
        let store = MemoryStore::new();
        assert_eq!(store.preferences().unwrap(), Preferences::default());

        let prefs = Preferences {
            notify_profile_changes: false,
            ..Preferences::default()
        };
        store
            .write("local", |w| {
                w.set_preferences(prefs);
                Ok(())
            })
            .unwrap();
        assert_eq!(store.preferences().unwrap(), prefs);
    }
}
