//! Notification requests and change-line rendering.

use nestkit_core::{Preferences, Relation, UserDetail};
use std::fmt;

/// Sound played on delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationSound {
    /// Silent.
    None,
    /// The platform default sound.
    #[default]
    Default,
}

/// How urgently a notification may interrupt the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptionLevel {
    /// Delivered quietly.
    Passive,
    /// Normal delivery.
    Active,
    /// May break through focus modes.
    #[default]
    TimeSensitive,
}

/// User-visible content of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    /// Account display name, or the account identifier.
    pub title: String,
    /// Account handle, rendered `@id`.
    pub subtitle: Option<String>,
    /// The change lines joined as a list.
    pub body: String,
    /// Groups notifications of one account.
    pub thread_identifier: String,
    /// Action category.
    pub category_identifier: String,
    /// Delivery sound.
    pub sound: NotificationSound,
    /// Interruption level.
    pub interruption_level: InterruptionLevel,
}

/// A notification to deliver immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Stable identifier; scheduling again with the same identifier replaces
    /// the earlier notification.
    pub identifier: String,
    /// Content.
    pub content: NotificationContent,
}

/// One line of a notification body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeLine {
    /// Some profile field changed.
    NewProfile,
    /// Ids were added to a relation set.
    Added(Relation, usize),
    /// Ids were removed from a relation set.
    Removed(Relation, usize),
}

impl fmt::Display for ChangeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewProfile => f.write_str("New Profile"),
            Self::Added(relation, count) => {
                let noun = match relation {
                    Relation::Following => "Following(s)",
                    Relation::Follower => "Follower(s)",
                    Relation::Blocking => "Block(s)",
                    Relation::Muting => "Mute(s)",
                };
                write!(f, "{count} New {noun}")
            }
            Self::Removed(relation, count) => {
                let noun = match relation {
                    Relation::Following => "Unfollowing(s)",
                    Relation::Follower => "Unfollower(s)",
                    Relation::Blocking => "Unblock(s)",
                    Relation::Muting => "Unmute(s)",
                };
                write!(f, "{count} New {noun}")
            }
        }
    }
}

/// Diffs two consecutive snapshots under the given preferences.
///
/// Lines come in a fixed order: profile, then following, follower, blocking
/// and muting, each with additions before removals.
pub fn change_lines(old: &UserDetail, new: &UserDetail, preferences: &Preferences) -> Vec<ChangeLine> {
    let mut lines = Vec::new();

    if preferences.notify_profile_changes && !old.is_profile_equal(new) {
        lines.push(ChangeLine::NewProfile);
    }

    for relation in Relation::ALL {
        if !preferences.notifies(relation) {
            continue;
        }
        let Some(changes) = new.user_ids_changes(old, relation) else {
            continue;
        };
        if changes.added > 0 {
            lines.push(ChangeLine::Added(relation, changes.added));
        }
        if changes.removed > 0 {
            lines.push(ChangeLine::Removed(relation, changes.removed));
        }
    }

    lines
}

/// Width of a rendered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListWidth {
    /// `a, b, and c`
    Standard,
    /// `a, b, & c`
    Short,
    /// `a, b, c`
    #[default]
    Narrow,
}

/// Joins items as an English conjunctive list.
pub fn conjunctive_list<S: AsRef<str>>(items: &[S], width: ListWidth) -> String {
    let conjunction = match width {
        ListWidth::Standard => Some("and"),
        ListWidth::Short => Some("&"),
        ListWidth::Narrow => None,
    };

    match (items, conjunction) {
        ([], _) => String::new(),
        ([only], _) => only.as_ref().to_string(),
        ([first, second], Some(conjunction)) => {
            format!("{} {conjunction} {}", first.as_ref(), second.as_ref())
        }
        ([init @ .., last], Some(conjunction)) => {
            let head: Vec<&str> = init.iter().map(|item| item.as_ref()).collect();
            format!("{}, {conjunction} {}", head.join(", "), last.as_ref())
        }
        (items, None) => items
            .iter()
            .map(|item| item.as_ref())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Renders a handle as `@id`.
pub fn display_handle(id: &str) -> String {
    format!("@{id}")
}
