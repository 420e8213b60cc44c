//! Stored object types.

use crate::error::{CoreError, CoreResult};
use crate::hash::ContentHash;
use crate::types::ObjectId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Credential used by a network session to call the remote API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Access token.
    pub token: String,
    /// Access token secret.
    pub token_secret: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("token_secret", &"<redacted>")
            .finish()
    }
}

/// A signed-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Object identifier.
    pub id: ObjectId,
    /// Remote id of the account's own user.
    pub user_remote_id: Option<String>,
    /// Current credential, if signed in.
    pub credential: Option<Credential>,
    /// When the row was created.
    pub creation_date: DateTime<Utc>,
}

/// A tracked remote user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Object identifier.
    pub id: ObjectId,
    /// Remote user id.
    pub remote_id: Option<String>,
    /// Accounts tracking this user, oldest first.
    pub accounts: Vec<ObjectId>,
    /// When the row was created.
    pub creation_date: DateTime<Utc>,
}

/// A relation set captured by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// Users this user follows.
    Following,
    /// Users following this user.
    Follower,
    /// Users this user blocks.
    Blocking,
    /// Users this user mutes.
    Muting,
}

impl Relation {
    /// All relations, in notification order.
    pub const ALL: [Relation; 4] = [
        Relation::Following,
        Relation::Follower,
        Relation::Blocking,
        Relation::Muting,
    ];
}

/// Added/removed counts between two relation sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserIdsChanges {
    /// Ids present in the new set only.
    pub added: usize,
    /// Ids present in the old set only.
    pub removed: usize,
}

/// Immutable, timestamped capture of one user's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDetail {
    /// Object identifier.
    pub id: ObjectId,
    /// The user this snapshot belongs to.
    pub user_id: ObjectId,
    /// When the snapshot was taken.
    pub creation_date: DateTime<Utc>,

    /// Display name.
    pub name: Option<String>,
    /// Handle without the leading `@`.
    pub username: Option<String>,
    /// Bio.
    pub description: Option<String>,
    /// Free-form location.
    pub location: Option<String>,
    /// Profile link.
    pub url: Option<String>,
    /// Avatar url.
    pub profile_image_url: Option<String>,
    /// Banner url.
    pub profile_header_image_url: Option<String>,
    /// Whether the account is protected.
    pub is_protected: bool,
    /// Whether the account is verified.
    pub is_verified: bool,

    /// Following ids, if captured.
    pub following_user_ids: Option<BTreeSet<String>>,
    /// Follower ids, if captured.
    pub follower_user_ids: Option<BTreeSet<String>>,
    /// Blocking ids, if captured.
    pub blocking_user_ids: Option<BTreeSet<String>>,
    /// Muting ids, if captured.
    pub muting_user_ids: Option<BTreeSet<String>>,
}

impl UserDetail {
    /// Creates an empty snapshot for the given user.
    pub fn new(user_id: ObjectId, creation_date: DateTime<Utc>) -> Self {
        Self {
            id: ObjectId::new(crate::types::EntityKind::UserDetail),
            user_id,
            creation_date,
            name: None,
            username: None,
            description: None,
            location: None,
            url: None,
            profile_image_url: None,
            profile_header_image_url: None,
            is_protected: false,
            is_verified: false,
            following_user_ids: None,
            follower_user_ids: None,
            blocking_user_ids: None,
            muting_user_ids: None,
        }
    }

    /// Returns true if every profile field equals the other snapshot's.
    pub fn is_profile_equal(&self, other: &UserDetail) -> bool {
        self.name == other.name
            && self.username == other.username
            && self.description == other.description
            && self.location == other.location
            && self.url == other.url
            && self.profile_image_url == other.profile_image_url
            && self.profile_header_image_url == other.profile_header_image_url
            && self.is_protected == other.is_protected
            && self.is_verified == other.is_verified
    }

    /// Returns the ids captured for a relation.
    pub fn user_ids(&self, relation: Relation) -> Option<&BTreeSet<String>> {
        match relation {
            Relation::Following => self.following_user_ids.as_ref(),
            Relation::Follower => self.follower_user_ids.as_ref(),
            Relation::Blocking => self.blocking_user_ids.as_ref(),
            Relation::Muting => self.muting_user_ids.as_ref(),
        }
    }

    /// Counts ids added and removed since `old`.
    ///
    /// Returns `None` if either snapshot did not capture the relation.
    pub fn user_ids_changes(&self, old: &UserDetail, relation: Relation) -> Option<UserIdsChanges> {
        let new_ids = self.user_ids(relation)?;
        let old_ids = old.user_ids(relation)?;
        Some(UserIdsChanges {
            added: new_ids.difference(old_ids).count(),
            removed: old_ids.difference(new_ids).count(),
        })
    }
}

const PREFERENCES_VERSION: u16 = 1;

fn enabled() -> bool {
    true
}

/// Notification toggles, one per change category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Notify when profile fields change.
    #[serde(default = "enabled")]
    pub notify_profile_changes: bool,
    /// Notify when following changes.
    #[serde(default = "enabled")]
    pub notify_following_changes: bool,
    /// Notify when followers change.
    #[serde(default = "enabled")]
    pub notify_follower_changes: bool,
    /// Notify when blocking changes.
    #[serde(default = "enabled")]
    pub notify_blocking_changes: bool,
    /// Notify when muting changes.
    #[serde(default = "enabled")]
    pub notify_muting_changes: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            notify_profile_changes: true,
            notify_following_changes: true,
            notify_follower_changes: true,
            notify_blocking_changes: true,
            notify_muting_changes: true,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PreferencesBlob {
    version: u16,
    #[serde(flatten)]
    preferences: Preferences,
}

impl Preferences {
    /// Returns whether notifications for a relation are enabled.
    pub fn notifies(&self, relation: Relation) -> bool {
        match relation {
            Relation::Following => self.notify_following_changes,
            Relation::Follower => self.notify_follower_changes,
            Relation::Blocking => self.notify_blocking_changes,
            Relation::Muting => self.notify_muting_changes,
        }
    }

    /// Encodes into the versioned CBOR blob.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let blob = PreferencesBlob {
            version: PREFERENCES_VERSION,
            preferences: *self,
        };
        let mut out = Vec::new();
        ciborium::ser::into_writer(&blob, &mut out)
            .map_err(|e| CoreError::encode_failure(e.to_string()))?;
        Ok(out)
    }

    /// Decodes a versioned CBOR blob.
    ///
    /// Blobs written by newer versions decode as long as the fields known
    /// here are well-formed; missing toggles default to enabled.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let blob: PreferencesBlob = ciborium::de::from_reader(bytes)
            .map_err(|e| CoreError::decode_failure(format!("preferences blob: {e}")))?;
        if blob.version == 0 {
            return Err(CoreError::decode_failure("preferences version 0"));
        }
        Ok(blob.preferences)
    }
}

/// A downloaded binary asset.
///
/// Several records may share a url over time; the newest by
/// `creation_date` is the latest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    /// Object identifier.
    pub id: ObjectId,
    /// Origin url.
    pub url: String,
    /// Digest of `data`.
    pub content_hash: ContentHash,
    /// Mime type reported by the origin.
    pub mime_type: Option<String>,
    /// Body bytes.
    pub data: Bytes,
    /// `Last-Modified` reported by the origin.
    pub last_modified: Option<DateTime<Utc>>,
    /// When the origin last confirmed this content.
    pub last_verified: Option<DateTime<Utc>>,
    /// When the row was created.
    pub creation_date: DateTime<Utc>,
}

impl AssetRecord {
    /// Returns true if the record was verified within `window` of `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.last_verified.is_some_and(|verified| verified > now - window)
    }
}
