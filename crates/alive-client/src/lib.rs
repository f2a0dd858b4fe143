//! # alive-client
//!
//! One resilient WebSocket to an Alive server, shared by many subscribers.
//!
//! - [`topic`] / [`ledger`]: which subscriber listens to which channel
//! - [`protocol`]: inbound and outbound frames, delivered events
//! - [`transport`]: the socket seam and the `tokio-tungstenite` implementation
//! - [`refresh`]: fetching a fresh signed socket URL after the socket gives up
//! - [`session`]: the state machine tying them together
//! - [`client`]: a cloneable handle driving a session on its own task

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod ledger;
pub mod notify;
pub mod protocol;
pub mod refresh;
pub mod session;
pub mod topic;
pub mod transport;

pub use client::{AliveClient, ClientOptions};
pub use errors::{ClientError, ProtocolError, RefreshError};
pub use ledger::SubscriptionSet;
pub use notify::Notifier;
pub use protocol::{AliveEvent, AliveEventPayload, AliveMessageData};
pub use refresh::{HttpRefresher, RefreshUrlFetcher};
pub use session::{AliveSession, SessionDeps, SessionState};
pub use topic::{Subscription, Topic};
pub use transport::{CloseDirective, Connection, SocketEvent, Transport, TransportFactory};
