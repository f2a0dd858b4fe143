//! The Alive session state machine.
//!
//! [`AliveSession`] owns everything one socket serves: the subscription
//! ledger, cached presence, the metadata this client publishes, and the
//! transport. Its methods are synchronous and run on one task (see
//! [`crate::client`]); slow work such as fetching a fresh URL or waiting out
//! a redeploy runs in spawned tasks that report back through
//! [`SessionEvent::Internal`].
//!
//! Reconnect policy:
//! - the transport reopens by itself after ordinary closes, spread over
//!   [`AliveSession::reconnect_window`]
//! - once the transport gives up, the session fetches a fresh signed URL with
//!   unbounded backoff and builds a new transport
//! - after a server redeploy the session closes early, at a random point in
//!   the configured window, to avoid synchronized reconnect waves

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use alive_core::retry::{retry, wait};
use alive_core::{CancellationToken, RetryError, SubscriberKey};
use alive_presence::{
    Localization, MetadataUpdate, PresenceItem, PresenceMetadataSet, PresenceStore, UserPresence,
    aggregate_users, is_presence_channel, presence_key,
};
use alive_settings::SessionSettings;
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::errors::{ProtocolError, RefreshError};
use crate::ledger::SubscriptionSet;
use crate::notify::Notifier;
use crate::protocol::{AliveData, AliveEvent, ClientFrame, MessageFrame, ServerFrame};
use crate::refresh::RefreshUrlFetcher;
use crate::topic::{Subscription, Topic};
use crate::transport::{CloseDirective, Connection, NORMAL_CLOSURE, SocketEvent, TransportFactory};

/// Close reason of the server's routine connection recycling.
pub const RECONNECT_REASON: &str = "Alive Reconnect";
/// Close reason announcing a server redeploy.
pub const REDEPLOY_REASON: &str = "Alive Redeploy";
/// Close reason this client sends when reconnecting early after a redeploy.
pub const REDEPLOY_EARLY_RECONNECT_REASON: &str = "Alive Redeploy Early Client Reconnect";

static USER_ID_IN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/u/(\d+)/ws").expect("valid regex"));

/// User id embedded in a socket URL path (`/u/{id}/ws`), or 0.
pub fn user_id_from_url(url: &str) -> u64 {
    USER_ID_IN_URL
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Random id of one session instance: `{0..2^31-1}_{unix seconds}`.
pub fn generate_presence_id() -> String {
    let random: u32 = rand::random_range(0..=0x7fff_ffff);
    format!("{random}_{}", chrono::Utc::now().timestamp())
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// The host wants a connection.
    Online,
    /// The host asked to stay disconnected.
    Offline,
    /// Shut down for good.
    Terminated,
}

/// Completion of background work started by the session.
#[derive(Debug)]
pub enum InternalEvent {
    /// A fresh-URL fetch finished.
    Reconnected {
        /// Which reconnect attempt this answers.
        generation: u64,
        /// The fetched URL, `None` when gone, or the final error.
        outcome: Result<Option<String>, RetryError<RefreshError>>,
    },
    /// The post-redeploy early reconnect is due.
    RedeployReconnectDue {
        /// Which timer fired.
        generation: u64,
    },
}

/// Anything the session reacts to besides host commands.
#[derive(Debug)]
pub enum SessionEvent {
    /// From the current transport.
    Socket(SocketEvent),
    /// From the session's own background tasks.
    Internal(InternalEvent),
}

/// Collaborators injected into a session.
pub struct SessionDeps<S> {
    /// Builds transports.
    pub transports: Arc<dyn TransportFactory>,
    /// Fetches fresh socket URLs.
    pub refresher: Arc<dyn RefreshUrlFetcher>,
    /// Receives events for subscribers.
    pub notifier: Box<dyn Notifier<S>>,
}

/// One Alive connection shared by many subscribers.
pub struct AliveSession<S: SubscriberKey> {
    url: String,
    shared: bool,
    settings: SessionSettings,
    state: SessionState,

    user_id: u64,
    presence_id: String,
    presence_key: String,
    connection_count: u64,
    intentionally_disconnected: bool,
    last_came_online: Option<Instant>,

    subscriptions: SubscriptionSet<S>,
    presence: PresenceStore,
    presence_metadata: PresenceMetadataSet<S>,

    transports: Arc<dyn TransportFactory>,
    refresher: Arc<dyn RefreshUrlFetcher>,
    notifier: Box<dyn Notifier<S>>,
    connection: Option<Connection>,

    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    lifetime: CancellationToken,
    retrying: Option<CancellationToken>,
    reconnect_generation: u64,
    redeploy_timer: Option<CancellationToken>,
    redeploy_generation: u64,
}

impl<S: SubscriberKey> AliveSession<S> {
    /// Create a session and start connecting to `url`.
    pub fn new(
        url: impl Into<String>,
        shared: bool,
        settings: SessionSettings,
        deps: SessionDeps<S>,
    ) -> Self {
        let url = url.into();
        let user_id = user_id_from_url(&url);
        let presence_id = generate_presence_id();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let mut session = Self {
            url,
            shared,
            settings,
            state: SessionState::Online,
            user_id,
            presence_key: presence_key(user_id, &presence_id),
            presence_id,
            connection_count: 0,
            intentionally_disconnected: false,
            last_came_online: None,
            subscriptions: SubscriptionSet::new(),
            presence: PresenceStore::new(),
            presence_metadata: PresenceMetadataSet::new(),
            transports: deps.transports,
            refresher: deps.refresher,
            notifier: deps.notifier,
            connection: None,
            internal_tx,
            internal_rx,
            lifetime: CancellationToken::new(),
            retrying: None,
            reconnect_generation: 0,
            redeploy_timer: None,
            redeploy_generation: 0,
        };
        info!(user_id, presence_id = %session.presence_id, shared, "alive session starting");
        session.connect();
        session
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// User id parsed from the socket URL.
    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    /// Random id of this session instance.
    pub fn presence_id(&self) -> &str {
        &self.presence_id
    }

    /// `"{user_id}:{presence_id}"`.
    pub fn presence_key(&self) -> &str {
        &self.presence_key
    }

    /// Number of times the socket opened.
    pub fn connection_count(&self) -> u64 {
        self.connection_count
    }

    /// Current base socket URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The subscription ledger.
    pub fn subscriptions(&self) -> &SubscriptionSet<S> {
        &self.subscriptions
    }

    /// Whether a fresh-URL fetch is in flight.
    pub fn is_reconnecting(&self) -> bool {
        self.retrying.is_some()
    }

    // ─── Host commands ───────────────────────────────────────────────────

    /// Subscribe, then hand cached presence to presence-channel subscribers.
    ///
    /// The server sends a full presence snapshot only for the first
    /// subscription to a channel, so later subscribers get the cache.
    pub fn subscribe(&mut self, subscriptions: &[Subscription<S>]) {
        let added = self.subscriptions.add(subscriptions);
        self.send_subscribe(&added);

        let channels: IndexSet<&str> = subscriptions
            .iter()
            .map(|subscription| subscription.topic.name.as_str())
            .filter(|channel| is_presence_channel(channel))
            .collect();
        for channel in channels {
            let items = self.presence.channel_items(channel);
            if !items.is_empty() {
                let subscribers = self.subscriptions.subscribers(channel);
                self.notify_presence(channel, &items, &subscribers);
            }
        }
    }

    /// Drop subscriptions; unsubscribes topics nobody holds any more.
    pub fn unsubscribe(&mut self, subscriptions: &[Subscription<S>]) {
        let removed = self.subscriptions.delete(subscriptions);
        self.send_unsubscribe(&removed);
    }

    /// Drop everything the given subscribers hold, including their metadata.
    pub fn unsubscribe_all(&mut self, subscribers: &[S]) {
        let removed = self.subscriptions.drain(subscribers);
        self.send_unsubscribe(&removed);

        let changed = self.presence_metadata.remove_subscribers(subscribers);
        self.send_presence_metadata_update(&changed);
    }

    /// Deliver cached presence of `channels` to one subscriber.
    pub fn request_presence(&self, subscriber: &S, channels: &[String]) {
        for channel in channels {
            let items = self.presence.channel_items(channel);
            if !items.is_empty() {
                self.notify_presence(channel, &items, std::slice::from_ref(subscriber));
            }
        }
    }

    /// Replace subscribers' metadata and republish it to the server.
    pub fn update_presence_metadata(&mut self, updates: Vec<MetadataUpdate<S>>) {
        let mut changed = BTreeSet::new();
        for update in updates {
            let _ = changed.insert(self.presence_metadata.set_metadata(update));
        }
        self.send_presence_metadata_update(&changed);
    }

    /// The host regained connectivity: connect now.
    pub fn online(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        debug!("session online");
        self.last_came_online = Some(Instant::now());
        self.state = SessionState::Online;
        self.cancel_reconnect();
        if let Some(connection) = &self.connection {
            connection.transport.open();
        }
    }

    /// The host lost connectivity: disconnect and stop reconnecting.
    pub fn offline(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        debug!("session offline");
        self.state = SessionState::Offline;
        self.cancel_reconnect();
        if let Some(connection) = &self.connection {
            connection.transport.close(NORMAL_CLOSURE, "");
        }
    }

    /// Stop for good: cancel background work and drop the transport.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        info!("alive session shutting down");
        self.state = SessionState::Terminated;
        self.lifetime.cancel();
        self.retrying = None;
        self.redeploy_timer = None;
        self.connection = None;
    }

    // ─── Socket callbacks ────────────────────────────────────────────────

    /// The socket connected: advertise the new connection count and replay
    /// every subscription.
    pub fn socket_did_open(&mut self) {
        self.intentionally_disconnected = false;
        self.connection_count += 1;
        debug!(connection_count = self.connection_count, "socket did open");

        let url = self.url_with_presence_id();
        if let Some(connection) = &self.connection {
            connection.transport.set_url(&url);
        }
        let topics = self.subscriptions.topics();
        self.send_subscribe(&topics);
    }

    /// The socket closed, by either side.
    pub fn socket_did_close(&mut self, code: u16, reason: &str) {
        debug!(code, reason, "socket did close");
        if let Some(timer) = self.redeploy_timer.take() {
            timer.cancel();
        }

        if reason == RECONNECT_REASON {
            self.intentionally_disconnected = true;
        } else if reason == REDEPLOY_REASON {
            self.intentionally_disconnected = true;
            self.schedule_redeploy_reconnect();
        }
    }

    /// The transport gave up. Fetch a fresh URL unless the host is offline.
    pub fn socket_did_finish(&mut self) {
        if self.state != SessionState::Online {
            return;
        }
        self.reconnect();
    }

    /// Route one inbound text frame. Malformed frames are dropped.
    pub fn socket_did_receive_message(&mut self, text: &str) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(error = %error, "dropping malformed frame");
                return;
            }
        };

        match frame {
            ServerFrame::Ack(ack) => {
                trace!(off = %ack.off, health = ack.health, "ack");
                self.subscriptions.set_all_offsets(&ack.off);
            }
            ServerFrame::Msg(message) => self.handle_message(message),
            ServerFrame::Unknown => trace!("ignoring unknown frame type"),
        }
    }

    /// How the transport should proceed after a server-side close.
    pub fn close_directive(&self) -> CloseDirective {
        CloseDirective {
            retry: self.state == SessionState::Online,
            window: self.reconnect_window(),
        }
    }

    /// Spread applied to the transport's reopen delay.
    ///
    /// Zero for the first connection, after an announced disconnect, or
    /// shortly after coming online. Otherwise the server may have crashed
    /// and every client is reconnecting at once.
    pub fn reconnect_window(&self) -> Duration {
        let recently_online = self
            .last_came_online
            .is_some_and(|at| at.elapsed() < self.settings.recently_online());
        if self.connection_count == 0 || self.intentionally_disconnected || recently_online {
            Duration::ZERO
        } else {
            self.settings.reconnect_window()
        }
    }

    // ─── Event plumbing ──────────────────────────────────────────────────

    /// Wait for the next socket or background event.
    pub async fn next_event(&mut self) -> SessionEvent {
        let connection = &mut self.connection;
        let internal = &mut self.internal_rx;
        let socket = async move {
            match connection {
                Some(connection) => connection.events.recv().await,
                None => std::future::pending::<Option<SocketEvent>>().await,
            }
        };

        tokio::select! {
            Some(event) = internal.recv() => SessionEvent::Internal(event),
            Some(event) = socket => SessionEvent::Socket(event),
        }
    }

    /// Apply an event from [`Self::next_event`].
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Socket(SocketEvent::Opened) => self.socket_did_open(),
            SessionEvent::Socket(SocketEvent::Message(text)) => {
                self.socket_did_receive_message(&text);
            }
            SessionEvent::Socket(SocketEvent::Closed {
                code,
                reason,
                directive,
            }) => {
                self.socket_did_close(code, &reason);
                if let Some(reply) = directive {
                    let _ = reply.send(self.close_directive());
                }
            }
            SessionEvent::Socket(SocketEvent::Finished) => self.socket_did_finish(),
            SessionEvent::Internal(InternalEvent::Reconnected {
                generation,
                outcome,
            }) => self.reconnect_finished(generation, outcome),
            SessionEvent::Internal(InternalEvent::RedeployReconnectDue { generation }) => {
                self.redeploy_reconnect_due(generation);
            }
        }
    }

    // ─── Reconnect ───────────────────────────────────────────────────────

    fn connect(&mut self) {
        let url = self.url_with_presence_id();
        let connection = self.transports.connect(&url);
        connection.transport.open();
        self.connection = Some(connection);
    }

    fn reconnect(&mut self) {
        if self.retrying.is_some() {
            return;
        }
        info!("socket finished, fetching a fresh url");

        let cancel = self.lifetime.child_token();
        self.reconnect_generation += 1;
        let generation = self.reconnect_generation;
        self.retrying = Some(cancel.clone());

        let refresher = Arc::clone(&self.refresher);
        let config = self.settings.refresh.clone();
        let events = self.internal_tx.clone();
        drop(tokio::spawn(async move {
            let outcome = retry(|| refresher.fetch(), &config, &cancel).await;
            if matches!(outcome, Err(RetryError::Cancelled)) {
                debug!(generation, "reconnect cancelled");
                return;
            }
            let _ = events.send(InternalEvent::Reconnected {
                generation,
                outcome,
            });
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(cancel) = self.retrying.take() {
            cancel.cancel();
        }
    }

    fn reconnect_finished(
        &mut self,
        generation: u64,
        outcome: Result<Option<String>, RetryError<RefreshError>>,
    ) {
        if generation != self.reconnect_generation || self.retrying.is_none() {
            debug!(generation, "ignoring stale reconnect result");
            return;
        }
        self.retrying = None;

        match outcome {
            Ok(Some(url)) => {
                info!("reconnecting with a fresh url");
                self.url = url;
                self.connect();
            }
            Ok(None) => {
                warn!("refresh endpoint reports the session gone");
                self.shutdown();
            }
            Err(RetryError::Cancelled) => {}
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(attempts, error = %last, "fresh url attempts exhausted, starting over");
                if self.state == SessionState::Online {
                    self.reconnect();
                }
            }
        }
    }

    fn schedule_redeploy_reconnect(&mut self) {
        let min = self.settings.redeploy_reconnect_min_ms;
        let max = self.settings.redeploy_reconnect_max_ms.max(min);
        let delay = Duration::from_millis(rand::random_range(min..=max));
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "server redeploying, scheduling early reconnect"
        );

        let cancel = self.lifetime.child_token();
        self.redeploy_generation += 1;
        let generation = self.redeploy_generation;
        self.redeploy_timer = Some(cancel.clone());

        let events = self.internal_tx.clone();
        drop(tokio::spawn(async move {
            if wait(delay, &cancel).await.is_ok() {
                let _ = events.send(InternalEvent::RedeployReconnectDue { generation });
            }
        }));
    }

    fn redeploy_reconnect_due(&mut self, generation: u64) {
        if generation != self.redeploy_generation || self.redeploy_timer.take().is_none() {
            return;
        }
        self.intentionally_disconnected = true;
        if let Some(connection) = &self.connection {
            connection
                .transport
                .close(NORMAL_CLOSURE, REDEPLOY_EARLY_RECONNECT_REASON);
        }
    }

    fn url_with_presence_id(&self) -> String {
        let Ok(mut url) = Url::parse(&self.url) else {
            warn!("socket url is not absolute, connecting without presence id");
            return self.url.clone();
        };
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "shared" && key != "p")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        let _ = url
            .query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("shared", if self.shared { "true" } else { "false" })
            .append_pair("p", &format!("{}.{}", self.presence_id, self.connection_count));
        url.into()
    }

    // ─── Inbound routing ─────────────────────────────────────────────────

    fn handle_message(&mut self, message: MessageFrame) {
        let MessageFrame { ch: channel, off, data } = message;
        if self.subscriptions.topic(&channel).is_none() {
            debug!(channel = %channel, "dropping frame for unsubscribed channel");
            return;
        }
        self.subscriptions.set_offset(&channel, &off);

        match data {
            AliveData::Presence(data) => match self.presence.handle_message(&channel, data) {
                Ok(items) => {
                    let subscribers = self.subscriptions.subscribers(&channel);
                    self.notify_presence(&channel, &items, &subscribers);
                }
                Err(error) => {
                    let error = ProtocolError::from(error);
                    warn!(channel = %channel, error = %error, "dropping presence frame");
                }
            },
            AliveData::Message(data) => {
                let subscribers = self.subscriptions.subscribers(&channel);
                self.notifier
                    .notify(&subscribers, AliveEvent::message(channel, data));
            }
        }
    }

    /// Notify each subscriber separately, so the own-user entry can mark the
    /// subscriber's own metadata as local.
    fn notify_presence(&self, channel: &str, items: &[PresenceItem], subscribers: &[S]) {
        let snapshot = aggregate_users(items, self.user_id, &self.presence_key);

        for subscriber in subscribers {
            let local = self.presence_metadata.channel_metadata(
                channel,
                Some(Localization {
                    subscriber,
                    mark_all_as_local: !self.shared,
                }),
            );
            let mut metadata = snapshot.own_remote_metadata.clone();
            metadata.extend(local);

            let mut users = Vec::with_capacity(snapshot.others.len() + 1);
            users.push(UserPresence {
                user_id: self.user_id,
                is_own_user: true,
                metadata,
                is_idle: None,
            });
            users.extend(snapshot.others.iter().cloned());

            self.notifier.notify(
                std::slice::from_ref(subscriber),
                AliveEvent::presence(channel, users),
            );
        }
    }

    // ─── Outbound ────────────────────────────────────────────────────────

    fn send_subscribe(&self, topics: &[Topic]) {
        for batch in topics.chunks(self.settings.batch_size.max(1)) {
            let subscribe: IndexMap<String, String> = batch
                .iter()
                .map(|topic| {
                    let value = if is_presence_channel(&topic.name) {
                        let metadata = self.presence_metadata.channel_metadata(&topic.name, None);
                        Value::Array(metadata.into_iter().map(Value::Object).collect()).to_string()
                    } else {
                        topic.offset.clone()
                    };
                    (topic.signed.clone(), value)
                })
                .collect();
            self.send_frame(&ClientFrame::Subscribe(subscribe));
        }
    }

    fn send_unsubscribe(&mut self, topics: &[Topic]) {
        for batch in topics.chunks(self.settings.batch_size.max(1)) {
            let signed = batch.iter().map(|topic| topic.signed.clone()).collect();
            self.send_frame(&ClientFrame::Unsubscribe(signed));
        }

        for topic in topics {
            if is_presence_channel(&topic.name) {
                self.presence.clear_channel(&topic.name);
            }
        }
    }

    /// Resubscribe live topics of changed channels; the subscribe frame
    /// carries the new metadata.
    fn send_presence_metadata_update(&self, channels: &BTreeSet<String>) {
        let topics: Vec<Topic> = channels
            .iter()
            .filter_map(|name| self.subscriptions.topic(name).cloned())
            .collect();
        self.send_subscribe(&topics);
    }

    fn send_frame(&self, frame: &ClientFrame) {
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(error) => {
                warn!(error = %error, "failed to encode frame");
                return;
            }
        };
        trace!(frame = %text, "send");
        if let Some(connection) = &self.connection {
            connection.transport.send(text);
        }
    }
}

impl<S: SubscriberKey> Drop for AliveSession<S> {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}
