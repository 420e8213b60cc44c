//! Core type definitions for nestkit.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Position in the change history.
///
/// Tokens are totally ordered; a higher token was committed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HistoryToken(pub u64);

impl HistoryToken {
    /// Creates a new history token.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next token.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for HistoryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token:{}", self.0)
    }
}

/// Kind of entity a change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A signed-in account.
    Account,
    /// A tracked remote user.
    User,
    /// A timestamped snapshot of a user's profile and relations.
    UserDetail,
    /// A downloaded binary asset.
    DataAsset,
    /// The preferences row.
    Preferences,
}

impl EntityKind {
    /// Returns the stable name used in canonical identifiers.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Account => "Account",
            Self::User => "User",
            Self::UserDetail => "UserDetail",
            Self::DataAsset => "DataAsset",
            Self::Preferences => "Preferences",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of mutation recorded in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Object was inserted.
    Insert,
    /// Object was updated.
    Update,
    /// Object was deleted.
    Delete,
}

/// Stable identifier of a stored object.
///
/// Identity, not content, travels through the history: consumers re-read
/// current state through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    entity: EntityKind,
    key: Uuid,
}

impl ObjectId {
    /// Creates a fresh identifier for the given entity kind.
    #[must_use]
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            key: Uuid::new_v4(),
        }
    }

    /// Creates an identifier from an existing key.
    #[must_use]
    pub const fn from_parts(entity: EntityKind, key: Uuid) -> Self {
        Self { entity, key }
    }

    /// Returns the entity kind.
    #[must_use]
    pub const fn entity(&self) -> EntityKind {
        self.entity
    }

    /// Returns the key.
    #[must_use]
    pub const fn key(&self) -> Uuid {
        self.key
    }

    /// Returns the canonical string form, e.g. `x-nestkit://User/<uuid>`.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("x-nestkit://{}/{}", self.entity, self.key.hyphenated())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// A single entry of a history transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The changed object.
    pub object_id: ObjectId,
    /// What happened to it.
    pub change_kind: ChangeKind,
}

impl ChangeRecord {
    /// Creates an insert record.
    #[must_use]
    pub const fn insert(object_id: ObjectId) -> Self {
        Self {
            object_id,
            change_kind: ChangeKind::Insert,
        }
    }

    /// Creates an update record.
    #[must_use]
    pub const fn update(object_id: ObjectId) -> Self {
        Self {
            object_id,
            change_kind: ChangeKind::Update,
        }
    }

    /// Creates a delete record.
    #[must_use]
    pub const fn delete(object_id: ObjectId) -> Self {
        Self {
            object_id,
            change_kind: ChangeKind::Delete,
        }
    }

    /// Returns the entity kind of the changed object.
    #[must_use]
    pub const fn entity(&self) -> EntityKind {
        self.object_id.entity
    }
}

/// A committed batch of changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Token of this transaction; becomes the cursor once read.
    pub token: HistoryToken,
    /// Who committed the transaction (local context name or remote device).
    pub author: Option<String>,
    /// Changes in commit order.
    pub changes: Vec<ChangeRecord>,
}

/// Notification that the store has new history.
///
/// The payload is a hint only. Readers re-derive their position from the
/// persisted cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChanged {
    /// Token of the newest transaction at the time of sending.
    pub since: Option<HistoryToken>,
}
