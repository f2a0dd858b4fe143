//! Presence state per channel.
//!
//! Adds and removes for one presence key can arrive out of order around a
//! reconnect. Each key keeps the highest `connection_count` it has seen,
//! whether that was an add (a live item) or a remove (a tombstone), and
//! updates carrying an older count are ignored. Tombstones are capped at
//! [`MAX_TOMBSTONES`] per channel, oldest evicted first.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::errors::PresenceError;
use crate::item::{PresenceData, PresenceItem};

/// Most removals a channel remembers.
pub const MAX_TOMBSTONES: usize = 1024;

/// Reconciled presence of one channel.
#[derive(Clone, Debug, Default)]
pub struct PresenceChannel {
    items: IndexMap<String, PresenceItem>,
    removed: IndexMap<String, u64>,
}

impl PresenceChannel {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an add or remove for `item` is newer than what is known for
    /// its key. A live item yields to an equal or higher count; a removed one
    /// only to a strictly higher count.
    pub fn should_apply(&self, item: &PresenceItem) -> bool {
        let key = &item.presence_key;
        match (self.items.get(key), self.removed.get(key)) {
            (Some(live), _) => live.connection_count <= item.connection_count,
            (None, Some(&removed)) => removed < item.connection_count,
            (None, None) => true,
        }
    }

    /// Insert or replace an item. Returns whether the update applied.
    pub fn add(&mut self, item: PresenceItem) -> bool {
        let key = &item.presence_key;
        if !self.should_apply(&item) {
            trace!(
                presence_key = %key,
                connection_count = item.connection_count,
                "stale presence add ignored"
            );
            return false;
        }

        let _ = self.removed.shift_remove(key);
        let _ = self.items.insert(item.presence_key.clone(), item);
        true
    }

    /// Remove an item. Returns whether the update applied.
    ///
    /// A remove for a key that is not live still records the count, so an
    /// older add delivered afterwards cannot resurrect the connection.
    pub fn remove(&mut self, item: &PresenceItem) -> bool {
        let key = &item.presence_key;
        if !self.should_apply(item) {
            trace!(
                presence_key = %key,
                connection_count = item.connection_count,
                "stale presence remove ignored"
            );
            return false;
        }

        let _ = self.items.shift_remove(key);
        let _ = self.removed.shift_remove(key);
        let _ = self.removed.insert(key.clone(), item.connection_count);
        while self.removed.len() > MAX_TOMBSTONES {
            let _ = self.removed.shift_remove_index(0);
        }
        true
    }

    /// Replace the whole channel with a snapshot.
    ///
    /// Duplicate keys within the snapshot resolve to the highest count.
    pub fn replace(&mut self, items: Vec<PresenceItem>) {
        self.items.clear();
        self.removed.clear();
        for item in items {
            let _ = self.add(item);
        }
    }

    /// Live items in insertion order.
    pub fn items(&self) -> Vec<PresenceItem> {
        self.items.values().cloned().collect()
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no item is live.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of remembered removals.
    pub fn tombstone_count(&self) -> usize {
        self.removed.len()
    }
}

/// Presence state of every presence channel this client has seen.
#[derive(Clone, Debug, Default)]
pub struct PresenceStore {
    channels: HashMap<String, PresenceChannel>,
}

impl PresenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a presence event and return the channel's items afterwards.
    ///
    /// The whole event is decoded before anything is applied; a malformed
    /// item leaves the channel untouched.
    pub fn handle_message(
        &mut self,
        channel_name: &str,
        data: PresenceData,
    ) -> Result<Vec<PresenceItem>, PresenceError> {
        let channel = match data {
            PresenceData::Full(compact) => {
                let items = compact
                    .into_iter()
                    .map(PresenceItem::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                debug!(channel = channel_name, count = items.len(), "presence snapshot");
                let channel = self.channel_mut(channel_name);
                channel.replace(items);
                channel
            }
            PresenceData::Add(compact) => {
                let item = PresenceItem::try_from(compact)?;
                let channel = self.channel_mut(channel_name);
                let _ = channel.add(item);
                channel
            }
            PresenceData::Remove(compact) => {
                let item = PresenceItem::try_from(compact)?;
                let channel = self.channel_mut(channel_name);
                let _ = channel.remove(&item);
                channel
            }
        };
        Ok(channel.items())
    }

    /// Items of a channel; empty for unknown channels.
    pub fn channel_items(&self, channel_name: &str) -> Vec<PresenceItem> {
        self.channels
            .get(channel_name)
            .map(PresenceChannel::items)
            .unwrap_or_default()
    }

    /// Forget a channel entirely.
    pub fn clear_channel(&mut self, channel_name: &str) {
        let _ = self.channels.remove(channel_name);
    }

    /// Number of channels with state.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn channel_mut(&mut self, channel_name: &str) -> &mut PresenceChannel {
        self.channels.entry(channel_name.to_owned()).or_default()
    }
}
