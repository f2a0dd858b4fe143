//! Alive wire protocol.
//!
//! Inbound (server → client):
//! - `{"e": "ack", "off": "...", "health": true}` acknowledges subscriptions
//! - `{"e": "msg", "ch": "...", "off": "...", "data": {...}}` delivers data
//!
//! `data` is presence when it carries its own `e` tag, otherwise an
//! application message. Outbound frames are `{"subscribe": {signed: value}}`
//! and `{"unsubscribe": [signed, ...]}`.

use alive_presence::{PresenceData, UserPresence};
use indexmap::IndexMap;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// A frame received from the server.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "e", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Subscription acknowledgement.
    Ack(Ack),
    /// Data on one channel.
    Msg(MessageFrame),
    /// Any other frame type; ignored.
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Acknowledgement carrying the offset every subscribed topic is now at.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Ack {
    /// Current offset.
    pub off: String,
    /// Server health flag.
    #[serde(default)]
    pub health: bool,
}

/// Data delivered on one channel.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MessageFrame {
    /// Channel name.
    pub ch: String,
    /// Offset of this message.
    pub off: String,
    /// Payload.
    pub data: AliveData,
}

/// Payload of a [`MessageFrame`].
#[derive(Clone, Debug, PartialEq)]
pub enum AliveData {
    /// Presence event for a presence channel.
    Presence(PresenceData),
    /// Application message, routed verbatim.
    Message(AliveMessageData),
}

impl<'de> Deserialize<'de> for AliveData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.get("e").is_some() {
            PresenceData::deserialize(value)
                .map(Self::Presence)
                .map_err(de::Error::custom)
        } else {
            AliveMessageData::deserialize(value)
                .map(Self::Message)
                .map_err(de::Error::custom)
        }
    }
}

/// An application message.
///
/// Fields are passed through as the server sent them. Only `wait` is
/// normalized: a missing, null or non-numeric value becomes 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AliveMessageData {
    /// Server timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Delay hint for consumers.
    #[serde(default, deserialize_with = "wait_or_zero")]
    pub wait: u64,
    /// Optional global id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<Value>,
    /// Every other field, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn wait_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// A frame sent to the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientFrame {
    /// Signed token → offset, or JSON-encoded metadata for presence channels.
    Subscribe(IndexMap<String, String>),
    /// Signed tokens to drop.
    Unsubscribe(Vec<String>),
}

impl ClientFrame {
    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delivered events
// ─────────────────────────────────────────────────────────────────────────────

/// What subscribers receive.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AliveEvent {
    /// Channel the event belongs to.
    pub channel: String,
    /// The event itself.
    #[serde(flatten)]
    pub payload: AliveEventPayload,
}

/// Body of an [`AliveEvent`], serialized as `{"type": ..., "data": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum AliveEventPayload {
    /// Application message.
    Message(AliveMessageData),
    /// Everyone present on the channel, own user first.
    Presence(Vec<UserPresence>),
}

impl AliveEvent {
    /// A message event.
    pub fn message(channel: impl Into<String>, data: AliveMessageData) -> Self {
        Self {
            channel: channel.into(),
            payload: AliveEventPayload::Message(data),
        }
    }

    /// A presence event.
    pub fn presence(channel: impl Into<String>, users: Vec<UserPresence>) -> Self {
        Self {
            channel: channel.into(),
            payload: AliveEventPayload::Presence(users),
        }
    }
}
