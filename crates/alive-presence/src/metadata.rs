//! Presence metadata published by this client.
//!
//! Several subscribers (tabs, widgets) can share one presence channel. Each
//! contributes its own metadata list; the server sees one merged list per
//! channel, while local display sees the per-subscriber entries tagged with
//! `isLocal` so it can echo "my own" state without a server round trip.

use std::collections::{BTreeSet, HashMap};

use alive_core::SubscriberKey;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One metadata record: an arbitrary JSON object.
pub type Metadata = serde_json::Map<String, Value>;

/// Key of the idle marker record (`{"_i": 0 | 1}`).
pub const IDLE_METADATA_KEY: &str = "_i";

const LOCAL_METADATA_KEY: &str = "isLocal";

/// Host-supplied replacement of one subscriber's metadata for one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdate<S> {
    /// Who is publishing.
    pub subscriber: S,
    /// Presence channel the metadata belongs to.
    pub channel_name: String,
    /// Full replacement of the subscriber's previous contribution.
    pub metadata: Vec<Metadata>,
}

/// Which entries to tag as local when reading metadata for display.
#[derive(Clone, Copy, Debug)]
pub struct Localization<'a, S> {
    /// The subscriber the output is for.
    pub subscriber: &'a S,
    /// Tag every entry, regardless of which subscriber published it.
    pub mark_all_as_local: bool,
}

/// Truthiness of an idle marker value (`1`, `true`, ...).
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn idle_marker(idle: bool) -> Metadata {
    let mut marker = Metadata::new();
    let _ = marker.insert(IDLE_METADATA_KEY.to_owned(), Value::from(u8::from(idle)));
    marker
}

fn mark_as_local(metadata: &Metadata) -> Metadata {
    let mut local = metadata.clone();
    let _ = local.insert(LOCAL_METADATA_KEY.to_owned(), Value::Bool(true));
    local
}

/// Metadata of every subscriber on one channel, in subscription order.
#[derive(Clone, Debug)]
pub struct PresenceMetadataForChannel<S> {
    subscriber_metadata: IndexMap<S, Vec<Metadata>>,
}

impl<S> Default for PresenceMetadataForChannel<S> {
    fn default() -> Self {
        Self {
            subscriber_metadata: IndexMap::new(),
        }
    }
}

impl<S: SubscriberKey> PresenceMetadataForChannel<S> {
    /// Replace a subscriber's contribution.
    pub fn set_metadata(&mut self, subscriber: S, metadata: Vec<Metadata>) {
        let _ = self.subscriber_metadata.insert(subscriber, metadata);
    }

    /// Drop the given subscribers. Returns whether any of them was present.
    pub fn remove_subscribers(&mut self, subscribers: &[S]) -> bool {
        let mut found = false;
        for subscriber in subscribers {
            found |= self.subscriber_metadata.shift_remove(subscriber).is_some();
        }
        found
    }

    /// Whether any subscriber still contributes.
    pub fn has_subscribers(&self) -> bool {
        !self.subscriber_metadata.is_empty()
    }

    /// Merged metadata for this channel.
    ///
    /// Without `localization` this is the wire payload: every entry is
    /// flattened except idle markers, which collapse into a single
    /// `{"_i": 0|1}` record that is idle only if every subscriber that
    /// reported idle state is idle. Subscribers that never reported do not
    /// count either way; if none reported, no marker is emitted.
    ///
    /// With `localization` the output is for local display: entries are
    /// tagged `isLocal: true` for the matching subscriber (or all of them)
    /// and idle markers are kept per subscriber.
    pub fn metadata(&self, localization: Option<Localization<'_, S>>) -> Vec<Metadata> {
        let Some(Localization {
            subscriber,
            mark_all_as_local,
        }) = localization
        else {
            return self.wire_metadata();
        };

        let mut metadata = Vec::new();
        for (from, entries) in &self.subscriber_metadata {
            if mark_all_as_local || from == subscriber {
                metadata.extend(entries.iter().map(mark_as_local));
            } else {
                metadata.extend(entries.iter().cloned());
            }
        }
        metadata
    }

    fn wire_metadata(&self) -> Vec<Metadata> {
        let mut metadata = Vec::new();
        let mut idle: Option<bool> = None;

        for entry in self.subscriber_metadata.values().flatten() {
            if let Some(value) = entry.get(IDLE_METADATA_KEY) {
                let reported = is_truthy(value);
                idle = Some(idle.map_or(reported, |all| all && reported));
            } else {
                metadata.push(entry.clone());
            }
        }

        if let Some(idle) = idle {
            metadata.push(idle_marker(idle));
        }
        metadata
    }
}

/// Metadata tables for every presence channel this client publishes to.
#[derive(Clone, Debug)]
pub struct PresenceMetadataSet<S> {
    metadata_by_channel: HashMap<String, PresenceMetadataForChannel<S>>,
}

impl<S> Default for PresenceMetadataSet<S> {
    fn default() -> Self {
        Self {
            metadata_by_channel: HashMap::new(),
        }
    }
}

impl<S: SubscriberKey> PresenceMetadataSet<S> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update and return the channel it touched.
    pub fn set_metadata(&mut self, update: MetadataUpdate<S>) -> String {
        let MetadataUpdate {
            subscriber,
            channel_name,
            metadata,
        } = update;
        self.metadata_by_channel
            .entry(channel_name.clone())
            .or_default()
            .set_metadata(subscriber, metadata);
        channel_name
    }

    /// Purge the given subscribers from every channel.
    ///
    /// Channels left without contributors are dropped. Returns the channels
    /// whose merged metadata changed.
    pub fn remove_subscribers(&mut self, subscribers: &[S]) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        self.metadata_by_channel.retain(|channel_name, channel| {
            if channel.remove_subscribers(subscribers) {
                let _ = changed.insert(channel_name.clone());
            }
            channel.has_subscribers()
        });
        changed
    }

    /// Merged metadata for a channel; empty for unknown channels.
    pub fn channel_metadata(
        &self,
        channel_name: &str,
        localization: Option<Localization<'_, S>>,
    ) -> Vec<Metadata> {
        self.metadata_by_channel
            .get(channel_name)
            .map(|channel| channel.metadata(localization))
            .unwrap_or_default()
    }

    /// Number of channels with at least one contributor.
    pub fn channel_count(&self) -> usize {
        self.metadata_by_channel.len()
    }
}
