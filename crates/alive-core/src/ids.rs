//! Subscriber identity.
//!
//! The session never looks inside a subscriber: anything hashable and
//! comparable works as a key ([`SubscriberKey`]). [`SubscriberId`] is a ready
//! made opaque handle for hosts that have no identity of their own (one per
//! tab, widget or consumer task).

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bound for values used as subscriber identities.
///
/// Blanket-implemented; there is nothing to implement by hand.
pub trait SubscriberKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> SubscriberKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Opaque subscriber handle backed by a UUID v7 string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Create a new random, time-ordered ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an existing identifier.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
