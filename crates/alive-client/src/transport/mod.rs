//! The socket seam.
//!
//! The session drives a [`Transport`] with synchronous commands and hears
//! back through a stream of [`SocketEvent`]s. Each transport owns its own
//! event channel, so replacing the transport also discards any late events
//! from the old one.

mod stable_socket;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

pub use stable_socket::{StableSocket, StableSocketFactory};

/// Close code sent for ordinary client-initiated closes.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Closes after which reopening would fail again the same way.
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 1008 | 1011)
}

/// How the transport should proceed after the server closed the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseDirective {
    /// Reopen at all.
    pub retry: bool,
    /// Extra spread added to the reopen delay.
    pub window: Duration,
}

/// Lifecycle and data events from a transport.
#[derive(Debug)]
pub enum SocketEvent {
    /// The socket connected.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The socket closed.
    ///
    /// `directive` is present when the close came from the remote side and
    /// the transport is waiting to hear whether to reopen. Client-initiated
    /// closes carry `None` and are always followed by [`SocketEvent::Finished`].
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
        /// Reply channel for the reopen decision.
        directive: Option<oneshot::Sender<CloseDirective>>,
    },
    /// The transport gave up and will not reopen on its own.
    Finished,
}

/// Commands the session issues to its socket.
pub trait Transport: Send {
    /// Connect, unless already open or connecting.
    fn open(&self);
    /// Close with a code and reason.
    fn close(&self, code: u16, reason: &str);
    /// Send a text frame. Dropped while the socket is not open.
    fn send(&self, frame: String);
    /// URL to use for subsequent connects.
    fn set_url(&self, url: &str);
}

/// A transport together with its event stream.
pub struct Connection {
    /// Command side.
    pub transport: Box<dyn Transport>,
    /// Event side.
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Builds transports for a URL. The returned transport is not yet open.
pub trait TransportFactory: Send + Sync {
    /// Create a transport for `url`.
    fn connect(&self, url: &str) -> Connection;
}
