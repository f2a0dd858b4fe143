//! Presence wire format.
//!
//! The server sends presence in a compact shape to keep frames small:
//!
//! ```json
//! {"e": "pf", "d": [{"u": 1, "p": "2118047710_1628653223.3", "m": [{"_i": 1}]}]}
//! ```
//!
//! `pf` is a full snapshot, `pa` adds one item, `pr` removes one item.

use serde::{Deserialize, Serialize};

use crate::errors::PresenceError;
use crate::metadata::Metadata;

const PRESENCE_CHANNEL_PREFIX: &str = "presence-";

/// Whether a channel carries presence rather than plain messages.
pub fn is_presence_channel(channel_name: &str) -> bool {
    channel_name.starts_with(PRESENCE_CHANNEL_PREFIX)
}

/// Key identifying one client instance: `"{user_id}:{presence_id}"`.
///
/// Prefixing the user id keeps random presence ids from colliding across
/// users and stops one user from impersonating another's connection.
pub fn presence_key(user_id: u64, presence_id: &str) -> String {
    format!("{user_id}:{presence_id}")
}

/// One connection as sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceItemCompact {
    /// User id.
    pub u: u64,
    /// `"{presence_id}.{connection_count}"`.
    pub p: String,
    /// Metadata published by that connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<Vec<Metadata>>,
}

/// A presence event on a presence channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "e", content = "d")]
pub enum PresenceData {
    /// Full snapshot replacing the channel state.
    #[serde(rename = "pf")]
    Full(Vec<PresenceItemCompact>),
    /// One connection joined or updated its metadata.
    #[serde(rename = "pa")]
    Add(PresenceItemCompact),
    /// One connection left.
    #[serde(rename = "pr")]
    Remove(PresenceItemCompact),
}

/// Decoded presence of one connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceItem {
    /// User id.
    pub user_id: u64,
    /// `"{user_id}:{presence_id}"`, stable across reconnects of one instance.
    pub presence_key: String,
    /// Bumped on each reconnect of the instance; orders updates per key.
    pub connection_count: u64,
    /// Metadata published by that connection.
    pub metadata: Vec<Metadata>,
}

impl TryFrom<PresenceItemCompact> for PresenceItem {
    type Error = PresenceError;

    fn try_from(data: PresenceItemCompact) -> Result<Self, Self::Error> {
        let mut parts = data.p.split('.');
        let (Some(presence_id), Some(count)) = (parts.next(), parts.next()) else {
            return Err(PresenceError::InvalidPresenceId(data.p));
        };
        let Ok(connection_count) = count.parse::<u64>() else {
            return Err(PresenceError::InvalidPresenceId(data.p));
        };

        Ok(Self {
            user_id: data.u,
            presence_key: presence_key(data.u, presence_id),
            connection_count,
            metadata: data.m.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn presence_channel_prefix() {
        assert!(is_presence_channel("presence-doc1"));
        assert!(!is_presence_channel("repo-123"));
        assert!(!is_presence_channel("my-presence-doc"));
    }

    #[test]
    fn decode_compact_item() {
        let compact = PresenceItemCompact {
            u: 42,
            p: "2118047710_1628653223.3".into(),
            m: Some(vec![json!({"cursor": 7}).as_object().unwrap().clone()]),
        };
        let item = PresenceItem::try_from(compact).unwrap();
        assert_eq!(item.user_id, 42);
        assert_eq!(item.presence_key, "42:2118047710_1628653223");
        assert_eq!(item.connection_count, 3);
        assert_eq!(item.metadata.len(), 1);
    }

    #[test]
    fn missing_metadata_decodes_to_empty() {
        let compact: PresenceItemCompact = serde_json::from_value(json!({"u": 1, "p": "abc.1"})).unwrap();
        let item = PresenceItem::try_from(compact).unwrap();
        assert!(item.metadata.is_empty());
    }

    #[test]
    fn missing_connection_count_is_rejected() {
        let compact = PresenceItemCompact { u: 1, p: "abc".into(), m: None };
        assert_matches!(
            PresenceItem::try_from(compact),
            Err(PresenceError::InvalidPresenceId(p)) if p == "abc"
        );
    }

    #[test]
    fn non_numeric_connection_count_is_rejected() {
        let compact = PresenceItemCompact { u: 1, p: "abc.x".into(), m: None };
        assert!(PresenceItem::try_from(compact).is_err());
    }

    #[test]
    fn presence_data_tags() {
        let full: PresenceData =
            serde_json::from_value(json!({"e": "pf", "d": [{"u": 1, "p": "abc.1"}]})).unwrap();
        assert_matches!(full, PresenceData::Full(items) if items.len() == 1);

        let add: PresenceData =
            serde_json::from_value(json!({"e": "pa", "d": {"u": 2, "p": "def.4"}})).unwrap();
        assert_matches!(add, PresenceData::Add(PresenceItemCompact { u: 2, .. }));

        let remove: PresenceData =
            serde_json::from_value(json!({"e": "pr", "d": {"u": 2, "p": "def.4"}})).unwrap();
        assert_matches!(remove, PresenceData::Remove(_));

        assert!(serde_json::from_value::<PresenceData>(json!({"e": "px", "d": []})).is_err());
    }
}
