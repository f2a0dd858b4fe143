//! # alive-presence
//!
//! Who is looking at a channel, reconciled from out-of-order server events,
//! and what this client says about itself.
//!
//! - [`item`]: compact wire items (`{u, p, m}`) and the decoded [`PresenceItem`]
//! - [`store`]: per-channel reconciliation ordered by `connection_count`
//! - [`metadata`]: per-subscriber metadata merged into one payload per channel
//! - [`user`]: grouping items into one [`UserPresence`] per user

#![deny(unsafe_code)]

pub mod errors;
pub mod item;
pub mod metadata;
pub mod store;
pub mod user;

pub use errors::PresenceError;
pub use item::{
    PresenceData, PresenceItem, PresenceItemCompact, is_presence_channel, presence_key,
};
pub use metadata::{
    IDLE_METADATA_KEY, Localization, Metadata, MetadataUpdate, PresenceMetadataForChannel,
    PresenceMetadataSet,
};
pub use store::{MAX_TOMBSTONES, PresenceChannel, PresenceStore};
pub use user::{PresenceSnapshot, UserPresence, aggregate_users};
