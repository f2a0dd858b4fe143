//! A cloneable handle to a session running on its own task.
//!
//! [`AliveClient`] turns each call into a command for the driver task, which
//! owns the [`AliveSession`] and interleaves those commands with socket and
//! timer events. The driver exits when the session terminates or every
//! handle is dropped.

use std::sync::Arc;

use alive_core::{CancellationToken, SubscriberKey};
use alive_presence::MetadataUpdate;
use alive_settings::{AliveSettings, SessionSettings};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::ClientError;
use crate::notify::Notifier;
use crate::refresh::HttpRefresher;
use crate::session::{AliveSession, SessionDeps, SessionState};
use crate::topic::Subscription;
use crate::transport::StableSocketFactory;

/// What [`AliveClient::connect`] needs.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Signed socket URL.
    pub url: String,
    /// Endpoint handing out fresh socket URLs.
    pub refresh_url: String,
    /// Whether the session is shared by several independent views.
    pub shared: bool,
    /// Socket and session tuning.
    pub settings: AliveSettings,
}

impl ClientOptions {
    /// Options with default settings for an unshared session.
    pub fn new(url: impl Into<String>, refresh_url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            refresh_url: refresh_url.into(),
            shared: false,
            settings: AliveSettings::default(),
        }
    }

    /// Mark the session as shared.
    #[must_use]
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Replace the settings.
    #[must_use]
    pub fn settings(mut self, settings: AliveSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[derive(Debug)]
enum Command<S> {
    Subscribe(Vec<Subscription<S>>),
    Unsubscribe(Vec<Subscription<S>>),
    UnsubscribeAll(Vec<S>),
    RequestPresence { subscriber: S, channels: Vec<String> },
    UpdatePresenceMetadata(Vec<MetadataUpdate<S>>),
    Online,
    Offline,
    Shutdown,
}

/// Handle to a running Alive session.
#[derive(Debug)]
pub struct AliveClient<S> {
    commands: mpsc::UnboundedSender<Command<S>>,
    closed: CancellationToken,
}

impl<S> Clone for AliveClient<S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<S: SubscriberKey> AliveClient<S> {
    /// Connect over WebSocket, refreshing URLs over HTTP.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(options: ClientOptions, notifier: impl Notifier<S>) -> Self {
        let ClientOptions {
            url,
            refresh_url,
            shared,
            settings,
        } = options;
        let deps = SessionDeps {
            transports: Arc::new(StableSocketFactory::new(settings.socket)),
            refresher: Arc::new(HttpRefresher::new(refresh_url)),
            notifier: Box::new(notifier),
        };
        Self::with_deps(url, shared, settings.session, deps)
    }

    /// Start a session with custom collaborators.
    pub fn with_deps(
        url: impl Into<String>,
        shared: bool,
        settings: SessionSettings,
        deps: SessionDeps<S>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let session = AliveSession::new(url, shared, settings, deps);
        drop(tokio::spawn(drive(session, command_rx, closed.clone())));
        Self { commands, closed }
    }

    /// Subscribe to topics.
    pub fn subscribe(&self, subscriptions: Vec<Subscription<S>>) -> Result<(), ClientError> {
        self.send(Command::Subscribe(subscriptions))
    }

    /// Drop subscriptions.
    pub fn unsubscribe(&self, subscriptions: Vec<Subscription<S>>) -> Result<(), ClientError> {
        self.send(Command::Unsubscribe(subscriptions))
    }

    /// Drop every subscription and all metadata of the given subscribers.
    pub fn unsubscribe_all(&self, subscribers: Vec<S>) -> Result<(), ClientError> {
        self.send(Command::UnsubscribeAll(subscribers))
    }

    /// Ask for cached presence of `channels`, delivered to `subscriber` only.
    pub fn request_presence(&self, subscriber: S, channels: Vec<String>) -> Result<(), ClientError> {
        self.send(Command::RequestPresence {
            subscriber,
            channels,
        })
    }

    /// Replace presence metadata and publish it.
    pub fn update_presence_metadata(
        &self,
        updates: Vec<MetadataUpdate<S>>,
    ) -> Result<(), ClientError> {
        self.send(Command::UpdatePresenceMetadata(updates))
    }

    /// The host regained connectivity.
    pub fn online(&self) -> Result<(), ClientError> {
        self.send(Command::Online)
    }

    /// The host lost connectivity.
    pub fn offline(&self) -> Result<(), ClientError> {
        self.send(Command::Offline)
    }

    /// Terminate the session.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.send(Command::Shutdown)
    }

    /// Whether the driver task has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait for the driver task to end.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    fn send(&self, command: Command<S>) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }
}

async fn drive<S: SubscriberKey>(
    mut session: AliveSession<S>,
    mut commands: mpsc::UnboundedReceiver<Command<S>>,
    closed: CancellationToken,
) {
    let _closed = closed.drop_guard();

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("every client handle dropped");
                    break;
                };
                apply(&mut session, command);
            }
            event = session.next_event() => session.handle_event(event),
        }

        if session.state() == SessionState::Terminated {
            break;
        }
    }

    session.shutdown();
    debug!("alive driver stopped");
}

fn apply<S: SubscriberKey>(session: &mut AliveSession<S>, command: Command<S>) {
    match command {
        Command::Subscribe(subscriptions) => session.subscribe(&subscriptions),
        Command::Unsubscribe(subscriptions) => session.unsubscribe(&subscriptions),
        Command::UnsubscribeAll(subscribers) => session.unsubscribe_all(&subscribers),
        Command::RequestPresence {
            subscriber,
            channels,
        } => session.request_presence(&subscriber, &channels),
        Command::UpdatePresenceMetadata(updates) => session.update_presence_metadata(updates),
        Command::Online => session.online(),
        Command::Offline => session.offline(),
        Command::Shutdown => session.shutdown(),
    }
}
