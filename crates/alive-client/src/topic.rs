//! Topics and subscriptions.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// A channel as known to this client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Channel name, e.g. `presence-doc1`.
    pub name: String,
    /// Server-signed token authorising the subscription.
    pub signed: String,
    /// Last delivered offset; resent on resubscribe for catch-up.
    #[serde(default)]
    pub offset: String,
}

#[derive(Deserialize)]
struct SignedPayload {
    c: String,
}

impl Topic {
    /// A topic with no delivered offset yet.
    pub fn new(name: impl Into<String>, signed: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signed: signed.into(),
            offset: String::new(),
        }
    }

    /// Build a topic from its signed token alone.
    ///
    /// Tokens look like `base64({"c": "<channel>", "t": ...})--<signature>`.
    /// The signature is opaque to the client. Returns `None` when the part
    /// before `--` does not decode to a payload naming a channel.
    pub fn from_signed(signed: &str) -> Option<Self> {
        let (encoded, _signature) = signed.split_once("--")?;
        let bytes = STANDARD.decode(encoded).ok()?;
        let payload: SignedPayload = serde_json::from_slice(&bytes).ok()?;
        Some(Self::new(payload.c, signed))
    }
}

/// One subscriber's interest in one topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription<S> {
    /// Who receives the events.
    pub subscriber: S,
    /// What they listen to.
    pub topic: Topic,
}

impl<S> Subscription<S> {
    /// Pair a subscriber with a topic.
    pub fn new(subscriber: S, topic: Topic) -> Self {
        Self { subscriber, topic }
    }
}
