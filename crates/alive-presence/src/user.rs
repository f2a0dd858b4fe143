//! Per-user view of a presence channel.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::item::PresenceItem;
use crate::metadata::{IDLE_METADATA_KEY, Metadata, is_truthy};

/// One user's presence as delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    /// User id.
    pub user_id: u64,
    /// Whether this entry describes the user this client is logged in as.
    pub is_own_user: bool,
    /// Metadata from all of the user's connections, in arrival order,
    /// without idle markers.
    pub metadata: Vec<Metadata>,
    /// Idle only if every connection that reported idle state is idle.
    /// Absent when none reported, and always absent for the own user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_idle: Option<bool>,
}

impl UserPresence {
    fn new(user_id: u64) -> Self {
        Self {
            user_id,
            is_own_user: false,
            metadata: Vec::new(),
            is_idle: None,
        }
    }

    /// Idle markers travel as records of their own; they set `is_idle` and
    /// are not passed on as metadata.
    fn absorb(&mut self, item: &PresenceItem) {
        for entry in &item.metadata {
            if let Some(value) = entry.get(IDLE_METADATA_KEY) {
                let reported = is_truthy(value);
                self.is_idle = Some(self.is_idle.map_or(reported, |all| all && reported));
            } else {
                self.metadata.push(entry.clone());
            }
        }
    }
}

/// A channel's items grouped by user, with this client's own user split out.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PresenceSnapshot {
    /// Metadata the own user publishes from other connections.
    pub own_remote_metadata: Vec<Metadata>,
    /// Every other user, in order of first appearance.
    pub others: Vec<UserPresence>,
}

/// Group items by user.
///
/// The item for this very connection (`own_presence_key`) is skipped; the
/// session substitutes locally known metadata for it.
pub fn aggregate_users(
    items: &[PresenceItem],
    own_user_id: u64,
    own_presence_key: &str,
) -> PresenceSnapshot {
    let mut users: IndexMap<u64, UserPresence> = IndexMap::new();
    for item in items.iter().filter(|i| i.presence_key != own_presence_key) {
        users
            .entry(item.user_id)
            .or_insert_with(|| UserPresence::new(item.user_id))
            .absorb(item);
    }

    let own_remote_metadata = users
        .shift_remove(&own_user_id)
        .map(|own| own.metadata)
        .unwrap_or_default();

    PresenceSnapshot {
        own_remote_metadata,
        others: users.into_values().collect(),
    }
}
