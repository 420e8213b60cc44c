//! Store access traits.
//!
//! The store schema itself lives outside this crate. These traits describe
//! what the propagation engine and the asset cache need from it: read
//! access to accounts, users, snapshots and preferences, and a single
//! serialized write path for asset rows.

use crate::error::CoreResult;
use crate::models::{Account, AssetRecord, Preferences, User, UserDetail};
use crate::types::{HistoryToken, ObjectId};
use chrono::{DateTime, Utc};

/// Read access to the object graph.
///
/// Every call observes the latest committed state.
pub trait Store: Send + Sync {
    /// Reads an account.
    fn account(&self, id: &ObjectId) -> CoreResult<Option<Account>>;

    /// Reads a user.
    fn user(&self, id: &ObjectId) -> CoreResult<Option<User>>;

    /// Reads a snapshot.
    fn user_detail(&self, id: &ObjectId) -> CoreResult<Option<UserDetail>>;

    /// Reads every snapshot of a user, oldest first.
    fn user_details_for_user(&self, user_id: &ObjectId) -> CoreResult<Vec<UserDetail>>;

    /// Returns the storage-assigned record key (e.g. a cloud record name).
    fn record_key(&self, id: &ObjectId) -> CoreResult<Option<String>>;

    /// Reads the newest preferences row, or defaults if none exists.
    fn preferences(&self) -> CoreResult<Preferences>;
}

/// Returns the snapshot taken immediately before `detail` for the same user.
pub fn preceding_user_detail<S: Store + ?Sized>(
    store: &S,
    detail: &UserDetail,
) -> CoreResult<Option<UserDetail>> {
    let details = store.user_details_for_user(&detail.user_id)?;
    let Some(position) = details.iter().rposition(|d| d.id == detail.id) else {
        return Ok(None);
    };
    Ok(position
        .checked_sub(1)
        .and_then(|index| details.get(index))
        .cloned())
}

/// Metadata fields of an asset row that may change without new bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetMetadata {
    /// New mime type, if it changed.
    pub mime_type: Option<String>,
    /// New `Last-Modified`, if it changed.
    pub last_modified: Option<DateTime<Utc>>,
    /// New verification time.
    pub last_verified: Option<DateTime<Utc>>,
}

impl AssetMetadata {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.mime_type.is_none() && self.last_modified.is_none() && self.last_verified.is_none()
    }

    /// Writes the set fields into `record`.
    pub fn apply_to(&self, record: &mut AssetRecord) {
        if let Some(mime_type) = &self.mime_type {
            record.mime_type = Some(mime_type.clone());
        }
        if let Some(last_modified) = self.last_modified {
            record.last_modified = Some(last_modified);
        }
        if let Some(last_verified) = self.last_verified {
            record.last_verified = Some(last_verified);
        }
    }
}

/// A pending asset write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetMutation {
    /// Insert a new row with new bytes.
    Insert {
        /// The new row.
        record: AssetRecord,
        /// The latest row for the url when the insert was decided.
        expected_latest: Option<ObjectId>,
    },
    /// Update metadata of an existing row.
    Update {
        /// The row to update.
        id: ObjectId,
        /// Its url.
        url: String,
        /// Fields to change.
        metadata: AssetMetadata,
    },
}

impl AssetMutation {
    /// Returns the url the mutation targets.
    pub fn url(&self) -> &str {
        match self {
            Self::Insert { record, .. } => &record.url,
            Self::Update { url, .. } => url,
        }
    }
}

/// Asset rows: latest-by-url reads and atomic batch commits.
pub trait AssetStore: Send + Sync {
    /// Returns the newest row for `url`.
    fn latest_asset(&self, url: &str) -> CoreResult<Option<AssetRecord>>;

    /// Returns the newest row for each of `urls` that has one.
    fn latest_assets(&self, urls: &[String]) -> CoreResult<Vec<AssetRecord>>;

    /// Applies all mutations atomically, in order.
    ///
    /// Returns the history token of the resulting transaction, or `None` if
    /// `mutations` was empty.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::WriteConflict`] if an insert's
    /// `expected_latest` no longer matches, or an update targets a row that
    /// no longer exists. Nothing is applied in that case.
    fn commit_assets(&self, mutations: &[AssetMutation]) -> CoreResult<Option<HistoryToken>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::types::EntityKind;
    use bytes::Bytes;

    #[test]
    fn metadata_applies_only_set_fields() {
        let now = Utc::now();
        let mut record = AssetRecord {
            id: ObjectId::new(EntityKind::DataAsset),
            url: "https://pbs.example/a.png".into(),
            content_hash: ContentHash::of(b"a"),
            mime_type: Some("image/png".into()),
            data: Bytes::from_static(b"a"),
            last_modified: Some(now),
            last_verified: None,
            creation_date: now,
        };

        let metadata = AssetMetadata {
            last_verified: Some(now),
            ..AssetMetadata::default()
        };
        metadata.apply_to(&mut record);

        assert_eq!(record.mime_type.as_deref(), Some("image/png"));
        assert_eq!(record.last_verified, Some(now));
        assert!(AssetMetadata::default().is_empty());
    }
}
