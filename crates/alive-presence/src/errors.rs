//! Presence decoding errors.

use thiserror::Error;

/// A presence payload could not be decoded into items.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresenceError {
    /// The `p` field was not `"{presence_id}.{connection_count}"`.
    #[error("invalid presence id {0:?}: expected \"<id>.<connection count>\"")]
    InvalidPresenceId(String),
}
