//! Subscription bookkeeping.
//!
//! A topic exists exactly while at least one subscriber holds it. The set
//! reports which topics came into or went out of existence so the session
//! knows what to (un)subscribe on the wire; everything else is silent.

use alive_core::SubscriberKey;
use indexmap::{IndexMap, IndexSet};

use crate::topic::{Subscription, Topic};

#[derive(Clone, Debug)]
struct Entry<S> {
    topic: Topic,
    subscribers: IndexSet<S>,
}

/// Topics keyed by channel name, each with its subscribers.
///
/// Iteration follows first-subscription order.
#[derive(Clone, Debug)]
pub struct SubscriptionSet<S> {
    entries: IndexMap<String, Entry<S>>,
}

impl<S> Default for SubscriptionSet<S> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<S: SubscriberKey> SubscriptionSet<S> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register subscriptions. Returns the topics that did not exist before.
    ///
    /// A topic that already exists keeps its stored token and offset.
    pub fn add(&mut self, subscriptions: &[Subscription<S>]) -> Vec<Topic> {
        let mut added = Vec::new();
        for Subscription { subscriber, topic } in subscriptions {
            let entry = self.entries.entry(topic.name.clone()).or_insert_with(|| {
                added.push(topic.clone());
                Entry {
                    topic: topic.clone(),
                    subscribers: IndexSet::new(),
                }
            });
            let _ = entry.subscribers.insert(subscriber.clone());
        }
        added
    }

    /// Remove subscriptions. Returns the topics whose last subscriber left.
    pub fn delete(&mut self, subscriptions: &[Subscription<S>]) -> Vec<Topic> {
        let mut removed = Vec::new();
        for Subscription { subscriber, topic } in subscriptions {
            let Some(entry) = self.entries.get_mut(&topic.name) else {
                continue;
            };
            if entry.subscribers.shift_remove(subscriber) && entry.subscribers.is_empty() {
                if let Some(entry) = self.entries.shift_remove(&topic.name) {
                    removed.push(entry.topic);
                }
            }
        }
        removed
    }

    /// Remove every subscription held by the given subscribers. Returns the
    /// topics left without subscribers.
    pub fn drain(&mut self, subscribers: &[S]) -> Vec<Topic> {
        let mut removed = Vec::new();
        self.entries.retain(|_, entry| {
            let mut touched = false;
            for subscriber in subscribers {
                touched |= entry.subscribers.shift_remove(subscriber);
            }
            if touched && entry.subscribers.is_empty() {
                removed.push(entry.topic.clone());
                return false;
            }
            true
        });
        removed
    }

    /// Every live topic.
    pub fn topics(&self) -> Vec<Topic> {
        self.entries.values().map(|e| e.topic.clone()).collect()
    }

    /// The topic for a channel, if anyone subscribes to it.
    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.entries.get(name).map(|e| &e.topic)
    }

    /// Subscribers of a channel; empty for unknown channels.
    pub fn subscribers(&self, name: &str) -> Vec<S> {
        self.entries
            .get(name)
            .map(|e| e.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record the offset last delivered on one channel.
    pub fn set_offset(&mut self, name: &str, offset: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            offset.clone_into(&mut entry.topic.offset);
        }
    }

    /// Record an offset for every channel (server acknowledgement).
    pub fn set_all_offsets(&mut self, offset: &str) {
        for entry in self.entries.values_mut() {
            offset.clone_into(&mut entry.topic.offset);
        }
    }

    /// Whether no topic is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live topics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
