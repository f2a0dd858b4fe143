//! Client error types.

use std::time::Duration;

use alive_presence::PresenceError;
use thiserror::Error;

/// Fetching a fresh socket URL failed. Always retried.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The request did not complete.
    #[error("refresh request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The endpoint answered with a non-success status other than 404.
    #[error("{endpoint} returned HTTP {status}")]
    Status {
        /// Which leg of the refresh failed.
        endpoint: &'static str,
        /// The status code.
        status: u16,
    },
}

/// An inbound frame could not be understood. The frame is dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not valid JSON, or not a known frame shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// A presence item could not be decoded.
    #[error("malformed presence: {0}")]
    Presence(#[from] PresenceError),
}

/// A WebSocket connect attempt failed.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The handshake failed.
    #[error("websocket connect failed: {0}")]
    Connect(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    /// The handshake did not finish in time.
    #[error("websocket connect timed out after {0:?}")]
    TimedOut(Duration),
    /// The socket was closed while connecting.
    #[error("websocket connect cancelled")]
    Cancelled,
}

/// The session behind a client handle is gone.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    /// The session was shut down or its driver task ended.
    #[error("alive session is closed")]
    Closed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
