//! Notification client: the connection manager.
//!
//! This is the main entry point for SDK consumers. It owns the transport
//! link, drives the lifecycle state machine, runs the heartbeat, schedules
//! reconnects and fans decoded events out through the listener registry.
//!
//! ## Lifecycle
//!
//! `Disconnected → Connecting → Connected`, back to `Disconnected` on close.
//! `Closing` is only held while [`NotificationClient::disconnect`] tears the
//! link down. Every connect attempt gets a fresh *generation*; close events,
//! heartbeat ticks and retry timers belonging to an older generation are
//! ignored, so a late transport open after `disconnect()` cannot revive the
//! connection.
//!
//! ## Reconnection
//!
//! A close with any code other than 1000 schedules a retry with exponential
//! backoff (see [`ReconnectPolicy`]). A failed retry counts as another
//! abnormal close. A failed handshake on a caller-initiated `connect` is
//! returned to the caller and does not schedule a retry. Once the ceiling is
//! reached a synthetic [`EventKind::ConnectionFailed`] event is dispatched.
//!
//! Retries resend the token given to the last `connect` (including one made
//! while an attempt was already in flight), unless a
//! [`TokenSource`] was configured, in which case a fresh token is requested
//! for each retry.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::codec::{self, Command, Decoded, NotificationId};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result, TransportError};
use crate::event::{Event, EventKind};
use crate::heartbeat::Heartbeat;
use crate::reconnect::ReconnectPolicy;
use crate::registry::{Listener, ListenerRegistry, Subscription};
use crate::transport::{
    ABNORMAL_CLOSE, ConnectRequest, Connector, Incoming, Link, NORMAL_CLOSE, Outgoing, WsConnector,
};

/// Supplies a fresh bearer token before each reconnect attempt.
pub type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Retry,
}

#[derive(Clone)]
struct Identity {
    user_id: String,
    token: Option<String>,
}

struct ConnState {
    status: ConnectionStatus,
    generation: u64,
    identity: Option<Identity>,
    attempts: u32,
    /// Handshake failure of the latest attempt, for concurrent waiters.
    failure: Option<(u64, String)>,
    outbound: Option<mpsc::Sender<Outgoing>>,
    heartbeat: Option<Heartbeat>,
    reader: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl ConnState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            generation: 0,
            identity: None,
            attempts: 0,
            failure: None,
            outbound: None,
            heartbeat: None,
            reader: None,
            retry: None,
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.status == ConnectionStatus::Connected
    }

    /// Stop the heartbeat and reader and release the link.
    fn release_link(&mut self) -> Option<mpsc::Sender<Outgoing>> {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.outbound.take()
    }
}

struct Shared {
    config: ClientConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    token_source: Option<TokenSource>,
    registry: ListenerRegistry,
    state: Mutex<ConnState>,
    status_tx: watch::Sender<ConnectionStatus>,
}

/// Builder for [`NotificationClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    token_source: Option<TokenSource>,
}

impl ClientBuilder {
    /// Replace the WebSocket transport.
    pub fn connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Ask `source` for a fresh token before every reconnect attempt.
    pub fn token_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.token_source = Some(Arc::new(source));
        self
    }

    pub fn build(self) -> NotificationClient {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        NotificationClient {
            shared: Arc::new(Shared {
                policy: self.config.reconnect_policy(),
                config: self.config,
                connector: self.connector.unwrap_or_else(|| Arc::new(WsConnector)),
                token_source: self.token_source,
                registry: ListenerRegistry::new(),
                state: Mutex::new(ConnState::new()),
                status_tx,
            }),
        }
    }
}

/// Handle to the notification channel. Clones share one connection.
#[derive(Clone)]
pub struct NotificationClient {
    shared: Arc<Shared>,
}

impl NotificationClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            connector: None,
            token_source: None,
        }
    }

    /// Client with the default WebSocket transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    /// Open the channel for `user_id`.
    ///
    /// Resolves once the transport is open. If already connected this is a
    /// no-op; if an attempt is in flight this waits for that attempt.
    pub async fn connect(&self, user_id: impl Into<String>, token: Option<String>) -> Result<()> {
        let generation = {
            let mut state = self.shared.state.lock();
            match state.status {
                ConnectionStatus::Connected => {
                    tracing::debug!("connect() while connected, ignoring");
                    return Ok(());
                }
                ConnectionStatus::Connecting => {
                    let user_id = user_id.into();
                    if let Some(current) = state.identity.as_mut() {
                        if current.user_id != user_id || current.token != token {
                            tracing::warn!(
                                user_id = %user_id,
                                in_flight = %current.user_id,
                                "connect() during an attempt with new credentials, keeping them for the next retry"
                            );
                            current.user_id = user_id;
                            current.token = token;
                        }
                    }
                    None
                }
                ConnectionStatus::Disconnected | ConnectionStatus::Closing => {
                    state.identity = Some(Identity {
                        user_id: user_id.into(),
                        token,
                    });
                    state.attempts = 0;
                    Some(self.shared.begin_attempt(&mut state))
                }
            }
        };

        match generation {
            Some(generation) => self.shared.open(generation, Origin::Caller).await,
            None => self.wait_in_flight().await,
        }
    }

    async fn wait_in_flight(&self) -> Result<()> {
        let generation = self.shared.state.lock().generation;
        let mut rx = self.shared.status_tx.subscribe();
        let status = match rx.wait_for(|s| *s != ConnectionStatus::Connecting).await {
            Ok(status) => *status,
            Err(_) => ConnectionStatus::Disconnected,
        };
        if status == ConnectionStatus::Connected {
            return Ok(());
        }
        let state = self.shared.state.lock();
        match &state.failure {
            Some((g, reason)) if *g == generation => {
                Err(TransportError::Handshake(reason.clone()).into())
            }
            _ => Err(ClientError::Cancelled),
        }
    }

    /// Close the channel with code 1000. No reconnect follows.
    ///
    /// Safe to call in any state; cancels an in-flight connect or a pending retry.
    pub fn disconnect(&self) {
        let mut state = self.shared.state.lock();
        if state.status == ConnectionStatus::Disconnected && state.retry.is_none() {
            state.attempts = 0;
            return;
        }

        state.generation += 1;
        if let Some(retry) = state.retry.take() {
            retry.abort();
        }
        self.shared.set_status(&mut state, ConnectionStatus::Closing);
        if let Some(outbound) = state.release_link() {
            let _ = outbound.try_send(Outgoing::normal_close("client disconnect"));
        }
        state.attempts = 0;
        self.shared.set_status(&mut state, ConnectionStatus::Disconnected);
        tracing::info!(generation = state.generation, "Disconnected");
    }

    /// Send a command. Fails with [`ClientError::NotConnected`] unless connected.
    pub fn send(&self, command: &Command) -> Result<()> {
        let text = codec::encode(command)?;
        let state = self.shared.state.lock();
        let outbound = match (&state.outbound, state.status) {
            (Some(outbound), ConnectionStatus::Connected) => outbound,
            (_, status) => {
                tracing::warn!(?status, ?command, "Not connected, dropping command");
                return Err(ClientError::NotConnected);
            }
        };
        match outbound.try_send(Outgoing::Text(text)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(?command, "Outbound buffer full, dropping command");
                Err(ClientError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(?command, "Transport gone, dropping command");
                Err(ClientError::NotConnected)
            }
        }
    }

    /// Tell the server a notification was read.
    pub fn mark_read(&self, notification_id: impl Into<NotificationId>) -> Result<()> {
        self.send(&Command::MarkRead {
            notification_id: notification_id.into(),
        })
    }

    /// Subscribe to events of `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.registry.on(kind, callback)
    }

    /// Subscribe a shared listener; pair with [`off`](Self::off).
    pub fn add_listener(&self, kind: EventKind, listener: Listener) -> Subscription {
        self.shared.registry.add(kind, listener)
    }

    pub fn off(&self, kind: EventKind, listener: &Listener) {
        self.shared.registry.off(kind, listener);
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.shared.registry
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.state.lock().status
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Retries made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.state.lock().attempts
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }
}

impl Shared {
    fn set_status(&self, state: &mut ConnState, status: ConnectionStatus) {
        state.status = status;
        self.status_tx.send_replace(status);
    }

    fn begin_attempt(&self, state: &mut ConnState) -> u64 {
        state.generation += 1;
        if let Some(retry) = state.retry.take() {
            retry.abort();
        }
        self.set_status(state, ConnectionStatus::Connecting);
        state.generation
    }

    fn request_for(&self, identity: &Identity) -> std::result::Result<ConnectRequest, TransportError> {
        Ok(ConnectRequest {
            url: self.config.endpoint_for(&identity.user_id)?,
            token: identity.token.clone(),
            buffer: self.config.outbound_buffer,
        })
    }

    async fn open(self: &Arc<Self>, generation: u64, origin: Origin) -> Result<()> {
        let identity = self.state.lock().identity.clone();
        let Some(mut identity) = identity else {
            return Err(ClientError::Cancelled);
        };
        if origin == Origin::Retry {
            if let Some(source) = &self.token_source {
                identity.token = source();
                if let Some(current) = self.state.lock().identity.as_mut() {
                    current.token = identity.token.clone();
                }
            }
        }

        tracing::info!(generation, user_id = %identity.user_id, ?origin, "Connecting");
        let result = match self.request_for(&identity) {
            Ok(request) => self.connector.open(request).await,
            Err(e) => Err(e),
        };

        let mut state = self.state.lock();
        if state.generation != generation || state.status != ConnectionStatus::Connecting {
            tracing::debug!(generation, "Connect attempt abandoned, discarding transport");
            if let Ok(link) = result {
                let _ = link.outbound.try_send(Outgoing::normal_close("connect cancelled"));
            }
            return Err(ClientError::Cancelled);
        }

        match result {
            Ok(link) => {
                self.install_link(&mut state, generation, link);
                tracing::info!(generation, "Connected");
                Ok(())
            }
            Err(e) => {
                state.failure = Some((generation, e.to_string()));
                self.set_status(&mut state, ConnectionStatus::Disconnected);
                match origin {
                    Origin::Caller => {
                        tracing::warn!(generation, error = %e, "Connect failed");
                    }
                    Origin::Retry => {
                        tracing::warn!(generation, attempt = state.attempts, error = %e, "Reconnect attempt failed");
                        let exhausted = self.schedule_reconnect(&mut state);
                        drop(state);
                        if let Some(event) = exhausted {
                            self.registry.dispatch(&event);
                        }
                    }
                }
                Err(e.into())
            }
        }
    }

    fn install_link(self: &Arc<Self>, state: &mut ConnState, generation: u64, link: Link) {
        state.attempts = 0;
        state.failure = None;
        state.outbound = Some(link.outbound);

        let period = self.config.heartbeat_interval();
        if !period.is_zero() {
            let weak = Arc::downgrade(self);
            state.heartbeat = Some(Heartbeat::start(period, move || {
                weak.upgrade().is_some_and(|shared| shared.send_ping(generation))
            }));
        }

        state.reader = Some(tokio::spawn(read_loop(
            Arc::downgrade(self),
            generation,
            link.inbound,
        )));
        self.set_status(state, ConnectionStatus::Connected);
    }

    /// Heartbeat tick. Returns `false` once this generation is no longer live.
    fn send_ping(&self, generation: u64) -> bool {
        let state = self.state.lock();
        if !state.is_live(generation) {
            return false;
        }
        let Some(outbound) = &state.outbound else {
            return false;
        };
        let ping = match codec::encode(&Command::Ping) {
            Ok(ping) => ping,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode ping");
                return false;
            }
        };
        match outbound.try_send(Outgoing::Text(ping)) {
            Ok(()) => {
                tracing::debug!(generation, "Heartbeat ping");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(generation, "Outbound buffer full, skipping heartbeat");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        if !self.state.lock().is_live(generation) {
            return;
        }
        match codec::decode(text) {
            Ok(Decoded::Event(event)) => {
                tracing::debug!(kind = %event.kind, "Dispatching event");
                self.registry.dispatch(&event);
            }
            Ok(Decoded::Pong) => tracing::debug!(generation, "Heartbeat pong"),
            Ok(Decoded::Unknown(tag)) => tracing::warn!(%tag, "Unknown message type, ignoring"),
            Err(e) => tracing::warn!(error = %e, "Dropping frame"),
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: &str) {
        let exhausted = {
            let mut state = self.state.lock();
            if !state.is_live(generation) {
                tracing::debug!(generation, code, "Ignoring close of stale connection");
                return;
            }
            state.release_link();
            self.set_status(&mut state, ConnectionStatus::Disconnected);
            if code == NORMAL_CLOSE {
                tracing::info!(generation, code, reason, "Connection closed normally");
                None
            } else {
                tracing::warn!(generation, code, reason, "Connection closed abnormally");
                self.schedule_reconnect(&mut state)
            }
        };
        if let Some(event) = exhausted {
            self.registry.dispatch(&event);
        }
    }

    /// Schedule the next retry, or return the terminal event when the
    /// ceiling is reached. The caller dispatches it after releasing the lock.
    fn schedule_reconnect(self: &Arc<Self>, state: &mut ConnState) -> Option<Event> {
        let Some((attempt, delay)) = self.policy.next_attempt(state.attempts) else {
            tracing::warn!(attempts = state.attempts, "Max reconnection attempts reached, giving up");
            let attempts = state.attempts;
            state.attempts = 0;
            return Some(Event::connection_failed(
                attempts,
                "maximum reconnection attempts reached",
            ));
        };

        state.attempts = attempt;
        let generation = state.generation;
        tracing::info!(
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnect"
        );
        let weak = Arc::downgrade(self);
        state.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.retry(generation).await;
            }
        }));
        None
    }

    async fn retry(self: Arc<Self>, scheduled_at: u64) {
        let generation = {
            let mut state = self.state.lock();
            if state.generation != scheduled_at
                || state.status != ConnectionStatus::Disconnected
                || state.identity.is_none()
            {
                tracing::debug!(scheduled_at, "Stale reconnect timer, ignoring");
                return;
            }
            // Detach our own handle so begin_attempt does not abort this task.
            state.retry = None;
            self.begin_attempt(&mut state)
        };
        let _ = self.open(generation, Origin::Retry).await;
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(retry) = state.retry.take() {
            retry.abort();
        }
        if let Some(outbound) = state.release_link() {
            let _ = outbound.try_send(Outgoing::normal_close("client dropped"));
        }
    }
}

/// Drains one link's inbound frames in arrival order.
async fn read_loop(shared: Weak<Shared>, generation: u64, mut inbound: mpsc::Receiver<Incoming>) {
    while let Some(incoming) = inbound.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match incoming {
            Incoming::Text(text) => shared.handle_frame(generation, &text),
            Incoming::Closed { code, reason } => {
                shared.handle_close(generation, code, &reason);
                return;
            }
        }
    }
    if let Some(shared) = shared.upgrade() {
        shared.handle_close(generation, ABNORMAL_CLOSE, "transport dropped");
    }
}
