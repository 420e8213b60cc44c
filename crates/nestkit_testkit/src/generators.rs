//! Property-based test generators using proptest.

use nestkit_core::{Preferences, Relation};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for remote user ids.
pub fn remote_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[1-9][0-9]{0,18}").expect("Invalid regex")
}

/// Strategy for relation id sets drawn from a small pool, so that
/// consecutive sets overlap.
pub fn id_set_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set((0u32..24).prop_map(|n| format!("{}", 1000 + n)), 0..16)
}

/// Strategy for an old/new pair of relation sets.
pub fn id_set_pair_strategy() -> impl Strategy<Value = (BTreeSet<String>, BTreeSet<String>)> {
    (id_set_strategy(), id_set_strategy())
}

/// Strategy for relations.
pub fn relation_strategy() -> impl Strategy<Value = Relation> {
    prop::sample::select(Relation::ALL.to_vec())
}

/// Strategy for arbitrary preference toggles.
pub fn preferences_strategy() -> impl Strategy<Value = Preferences> {
    prop::array::uniform5(any::<bool>()).prop_map(|toggles| Preferences {
        notify_profile_changes: toggles[0],
        notify_following_changes: toggles[1],
        notify_follower_changes: toggles[2],
        notify_blocking_changes: toggles[3],
        notify_muting_changes: toggles[4],
    })
}

/// Strategy for asset urls on a handful of hosts.
pub fn asset_url_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["pbs.example", "abs.example", "video.example"]),
        prop::string::string_regex("[a-z0-9]{4,12}").expect("Invalid regex"),
    )
        .prop_map(|(host, path)| format!("https://{host}/media/{path}.jpg"))
}

/// Strategy for asset bodies.
pub fn asset_body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Strategy for a sequence of bodies served for one url, with repeats.
pub fn body_sequence_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(
        prop::sample::select(vec![b"v1".to_vec(), b"v2".to_vec(), b"v3".to_vec()]),
        1..8,
    )
}
