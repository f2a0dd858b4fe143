//! WebSocket transport over `tokio-tungstenite` that reopens itself.
//!
//! A [`StableSocket`] is a thin command handle; the socket lives in a task
//! that connects with a per-attempt timeout and bounded backoff, pumps
//! frames, and after a server-side close asks the session whether and when
//! to reopen. Dropping the handle ends the task.

use std::time::Duration;

use alive_core::retry::{retry, timeout};
use alive_core::{CancellationToken, RetryError, WaitError};
use alive_settings::SocketSettings;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use super::{CloseDirective, Connection, SocketEvent, Transport, TransportFactory, is_fatal_close};
use crate::errors::SocketError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the connection dropped without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when a close frame carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug)]
enum Command {
    Open,
    Close { code: u16, reason: String },
    Send(String),
    SetUrl(String),
}

/// Command handle of a self-reopening WebSocket.
pub struct StableSocket {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
}

impl StableSocket {
    /// Spawn the socket task. The socket stays closed until [`Transport::open`].
    pub fn spawn(url: &str, settings: SocketSettings) -> Connection {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let task = SocketTask {
            url: url.to_owned(),
            settings,
            commands: command_rx,
            events: event_tx,
            shutdown: shutdown.clone(),
        };
        drop(tokio::spawn(task.run()));

        Connection {
            transport: Box::new(Self {
                commands: command_tx,
                shutdown,
            }),
            events: event_rx,
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            trace!("socket task already ended");
        }
    }
}

impl Drop for StableSocket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Transport for StableSocket {
    fn open(&self) {
        self.command(Command::Open);
    }

    fn close(&self, code: u16, reason: &str) {
        self.command(Command::Close {
            code,
            reason: reason.to_owned(),
        });
    }

    fn send(&self, frame: String) {
        self.command(Command::Send(frame));
    }

    fn set_url(&self, url: &str) {
        self.command(Command::SetUrl(url.to_owned()));
    }
}

/// Builds [`StableSocket`]s sharing one set of socket settings.
#[derive(Clone, Debug, Default)]
pub struct StableSocketFactory {
    settings: SocketSettings,
}

impl StableSocketFactory {
    /// Create a factory.
    pub fn new(settings: SocketSettings) -> Self {
        Self { settings }
    }
}

impl TransportFactory for StableSocketFactory {
    fn connect(&self, url: &str) -> Connection {
        StableSocket::spawn(url, self.settings.clone())
    }
}

// ─── Socket task ────────────────────────────────────────────────────────────

enum Connect {
    Open(Box<WsStream>),
    /// Closed by the session while connecting.
    Aborted,
    /// Every attempt failed.
    Failed,
    Shutdown,
}

enum Served {
    ClosedLocally { code: u16, reason: String },
    ClosedRemotely { code: u16, reason: String },
    Shutdown,
}

enum Reopen {
    Now,
    No,
    Shutdown,
}

struct SocketTask {
    url: String,
    settings: SocketSettings,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SocketEvent>,
    shutdown: CancellationToken,
}

impl SocketTask {
    async fn run(mut self) {
        let mut reopen = false;
        loop {
            if !reopen && !self.idle().await {
                return;
            }

            let ws = match self.connect().await {
                Connect::Open(ws) => ws,
                Connect::Aborted => {
                    reopen = false;
                    continue;
                }
                Connect::Failed => {
                    self.emit(SocketEvent::Finished);
                    reopen = false;
                    continue;
                }
                Connect::Shutdown => return,
            };

            info!("socket open");
            self.emit(SocketEvent::Opened);

            reopen = match self.serve(*ws).await {
                Served::Shutdown => return,
                Served::ClosedLocally { code, reason } => {
                    info!(code, reason = %reason, "socket closed by client");
                    self.emit(SocketEvent::Closed {
                        code,
                        reason,
                        directive: None,
                    });
                    self.emit(SocketEvent::Finished);
                    false
                }
                Served::ClosedRemotely { code, reason } => {
                    info!(code, reason = %reason, "socket closed by server");
                    match self.after_remote_close(code, reason).await {
                        Reopen::Now => true,
                        Reopen::No => false,
                        Reopen::Shutdown => return,
                    }
                }
            };
        }
    }

    fn emit(&self, event: SocketEvent) {
        if self.events.send(event).is_err() {
            trace!("socket event receiver dropped");
        }
    }

    /// Wait for an open request while closed. Returns `false` on shutdown.
    async fn idle(&mut self) -> bool {
        loop {
            let command = tokio::select! {
                () = self.shutdown.cancelled() => return false,
                command = self.commands.recv() => command,
            };
            match command {
                None => return false,
                Some(Command::Open) => return true,
                Some(Command::SetUrl(url)) => self.url = url,
                Some(Command::Send(_)) => trace!("socket closed, dropping frame"),
                Some(Command::Close { .. }) => {}
            }
        }
    }

    async fn connect(&mut self) -> Connect {
        let cancel = self.shutdown.child_token();
        let url = self.url.clone();
        let connect_timeout = self.settings.connect_timeout();
        let attempt = retry(
            || connect_once(&url, connect_timeout, &cancel),
            &self.settings.connect,
            &cancel,
        );
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(ws) => Connect::Open(Box::new(ws)),
                        Err(RetryError::Cancelled) => Connect::Shutdown,
                        Err(RetryError::Exhausted { attempts, last }) => {
                            warn!(attempts, error = %last, "socket connect failed");
                            Connect::Failed
                        }
                    };
                }
                command = self.commands.recv() => match command {
                    None => return Connect::Shutdown,
                    Some(Command::Close { .. }) => {
                        debug!("socket connect aborted");
                        return Connect::Aborted;
                    }
                    Some(Command::SetUrl(url)) => self.url = url,
                    Some(Command::Send(_)) => trace!("socket connecting, dropping frame"),
                    Some(Command::Open) => {}
                },
            }
        }
    }

    async fn serve(&mut self, ws: WsStream) -> Served {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    let _ = sink.close().await;
                    return Served::Shutdown;
                }
                command = self.commands.recv() => match command {
                    None => {
                        let _ = sink.close().await;
                        return Served::Shutdown;
                    }
                    Some(Command::Send(text)) => {
                        trace!(len = text.len(), "sending frame");
                        if let Err(error) = sink.send(Message::Text(text.into())).await {
                            debug!(error = %error, "socket send failed");
                        }
                    }
                    Some(Command::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        return Served::ClosedLocally { code, reason };
                    }
                    Some(Command::SetUrl(url)) => self.url = url,
                    Some(Command::Open) => {}
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.emit(SocketEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (NO_STATUS_RECEIVED, String::new()),
                            |f| (u16::from(f.code), f.reason.as_str().to_owned()),
                        );
                        let _ = sink.close().await;
                        return Served::ClosedRemotely { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(error = %error, "socket read failed");
                        return Served::ClosedRemotely {
                            code: ABNORMAL_CLOSURE,
                            reason: String::new(),
                        };
                    }
                    None => {
                        return Served::ClosedRemotely {
                            code: ABNORMAL_CLOSURE,
                            reason: String::new(),
                        };
                    }
                },
            }
        }
    }

    async fn after_remote_close(&mut self, code: u16, reason: String) -> Reopen {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.emit(SocketEvent::Closed {
            code,
            reason,
            directive: Some(reply_tx),
        });

        let directive = tokio::select! {
            () = self.shutdown.cancelled() => return Reopen::Shutdown,
            reply = reply_rx => reply.unwrap_or(CloseDirective {
                retry: false,
                window: Duration::ZERO,
            }),
        };

        if is_fatal_close(code) || !directive.retry {
            debug!(code, retry = directive.retry, "socket not reopening");
            self.emit(SocketEvent::Finished);
            return Reopen::No;
        }

        let delay = reopen_delay(self.settings.reopen_min_delay(), directive.window);
        debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "socket reopening");
        self.pause(delay).await
    }

    /// Sleep before reopening. A close request cancels the reopen; an open
    /// request skips the rest of the delay.
    async fn pause(&mut self, delay: Duration) -> Reopen {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return Reopen::Shutdown,
                () = &mut sleep => return Reopen::Now,
                command = self.commands.recv() => match command {
                    None => return Reopen::Shutdown,
                    Some(Command::Open) => return Reopen::Now,
                    Some(Command::Close { .. }) => return Reopen::No,
                    Some(Command::SetUrl(url)) => self.url = url,
                    Some(Command::Send(_)) => trace!("socket reopening, dropping frame"),
                },
            }
        }
    }
}

async fn connect_once(
    url: &str,
    connect_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<WsStream, SocketError> {
    match timeout(connect_timeout, connect_async(url), cancel).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(error)) => Err(SocketError::Connect(Box::new(error))),
        Err(WaitError::TimedOut(after)) => Err(SocketError::TimedOut(after)),
        Err(WaitError::Cancelled) => Err(SocketError::Cancelled),
    }
}

/// Uniform in `[min, min + window]`.
fn reopen_delay(min: Duration, window: Duration) -> Duration {
    let min_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let window_ms = u64::try_from(window.as_millis()).unwrap_or(0);
    Duration::from_millis(rand::random_range(min_ms..=min_ms.saturating_add(window_ms)))
}
