//! Single relay connection management.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nostr::{Event, is_auth_required};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::AuthSigner;
use crate::error::{ClientError, Result};
use crate::filter::Filter;
use crate::signal::RequestSignal;
use crate::subscription::{
    OkStatus, SubscriptionMessage, SubscriptionRegistry, generate_subscription_id,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// NIP-42 state of this connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// No challenge answered yet.
    Idle,
    /// Signed AUTH sent, waiting for the relay's OK.
    Pending,
    Authenticated,
    Failed(String),
}

/// Relay message received from a relay.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(String, Event),
    Ok(String, bool, String),
    Eose(String),
    Closed(String, String),
    Notice(String),
    Auth(String),
}

/// Publish confirmation from a relay.
#[derive(Debug, Clone)]
pub struct PublishConfirmation {
    pub relay_url: String,
    pub event_id: String,
    pub accepted: bool,
    pub message: String,
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    /// How long to wait for the relay to acknowledge our AUTH event.
    pub auth_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
        }
    }
}

/// Canonical form of a relay URL, used as the pool key.
///
/// Only `ws`/`wss` are accepted; a bare trailing `/` is dropped so
/// `wss://relay.example` and `wss://relay.example/` name the same relay.
pub fn normalize_relay_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim())?;
    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return Err(ClientError::InvalidUrl(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(ClientError::InvalidUrl(format!("missing host in {url}")));
    }

    let mut normalized = parsed.to_string();
    if parsed.path() == "/" && parsed.query().is_none() && parsed.fragment().is_none() {
        normalized.pop();
    }
    Ok(normalized)
}

/// State shared between the connection handle and its reader task.
struct Shared {
    url: String,
    config: RelayConfig,
    state: RwLock<ConnectionState>,
    writer: Mutex<Option<WsWriter>>,
    registry: SubscriptionRegistry,
    auth_status: watch::Sender<AuthStatus>,
    auth_signer: Option<Arc<dyn AuthSigner>>,
}

/// Relay connection.
pub struct RelayConnection {
    shared: Arc<Shared>,
    recv_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RelayConnection {
    /// Create a new relay connection with default config.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config and no way to answer AUTH.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        Self::with_auth(url, config, None)
    }

    /// Create a new relay connection that answers AUTH challenges with `auth_signer`.
    pub fn with_auth(
        url: &str,
        config: RelayConfig,
        auth_signer: Option<Arc<dyn AuthSigner>>,
    ) -> Result<Self> {
        let (auth_status, _) = watch::channel(AuthStatus::Idle);
        Ok(Self {
            shared: Arc::new(Shared {
                url: normalize_relay_url(url)?,
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                writer: Mutex::new(None),
                registry: SubscriptionRegistry::new(),
                auth_status,
                auth_signer,
            }),
            recv_task: std::sync::Mutex::new(None),
        })
    }

    /// Create a connection and connect it.
    pub async fn open(
        url: &str,
        config: RelayConfig,
        auth_signer: Option<Arc<dyn AuthSigner>>,
    ) -> Result<Self> {
        let relay = Self::with_auth(url, config, auth_signer)?;
        relay.connect().await?;
        Ok(relay)
    }

    /// Normalized relay URL.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub async fn is_alive(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    pub fn auth_status(&self) -> AuthStatus {
        self.shared.auth_status.borrow().clone()
    }

    pub fn can_authenticate(&self) -> bool {
        self.shared.auth_signer.is_some()
    }

    /// Connect to relay and start background receive loop.
    pub async fn connect(&self) -> Result<()> {
        let mut state_guard = self.shared.state.write().await;
        if *state_guard == ConnectionState::Connected {
            return Err(ClientError::Internal(format!(
                "{} is already connected",
                self.shared.url
            )));
        }
        *state_guard = ConnectionState::Connecting;
        drop(state_guard);

        let connect_result = match timeout(
            self.shared.config.connect_timeout,
            connect_async(self.shared.url.as_str()),
        )
        .await
        {
            Ok(Ok(connected)) => connected,
            Ok(Err(error)) => {
                *self.shared.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::WebSocket(error.to_string()));
            }
            Err(_) => {
                *self.shared.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Timeout(format!(
                    "connection to {} timed out after {:?}",
                    self.shared.url, self.shared.config.connect_timeout
                )));
            }
        };

        let (stream, _response) = connect_result;
        let (writer, reader) = stream.split();
        *self.shared.writer.lock().await = Some(writer);
        self.shared.auth_status.send_replace(AuthStatus::Idle);
        *self.shared.state.write().await = ConnectionState::Connected;
        debug!(relay = %self.shared.url, "connected");

        let task = tokio::spawn(read_loop(Arc::clone(&self.shared), reader));
        if let Ok(mut slot) = self.recv_task.lock()
            && let Some(previous) = slot.replace(task)
        {
            previous.abort();
        }
        Ok(())
    }

    /// Close the websocket and stop the reader task.
    pub async fn close(&self) -> Result<()> {
        let task = self.recv_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.abort();
        }

        *self.shared.state.write().await = ConnectionState::Disconnected;
        self.shared.registry.clear().await;

        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            writer
                .send(Message::Close(None))
                .await
                .map_err(|error| ClientError::WebSocket(error.to_string()))?;
        }
        Ok(())
    }

    /// Run a one-shot REQ: collect events until EOSE, then CLOSE.
    ///
    /// A `CLOSED auth-required:` reply is retried once after this connection
    /// has authenticated.
    pub async fn query(&self, filters: &[Filter], signal: &RequestSignal) -> Result<Vec<Event>> {
        let subscription_id = generate_subscription_id();
        let mut rx = self.shared.registry.register(&subscription_id).await;
        let result = self
            .collect(&subscription_id, filters, &mut rx, signal)
            .await;
        self.shared.registry.remove(&subscription_id).await;
        result
    }

    async fn collect(
        &self,
        subscription_id: &str,
        filters: &[Filter],
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<SubscriptionMessage>,
        signal: &RequestSignal,
    ) -> Result<Vec<Event>> {
        let mut request = vec![json!("REQ"), json!(subscription_id)];
        for filter in filters {
            request.push(serde_json::to_value(filter)?);
        }
        let request = Value::Array(request);

        self.shared.send_json(&request).await?;
        let mut events = Vec::new();
        let mut auth_retried = false;

        loop {
            let message = tokio::select! {
                error = signal.aborted() => {
                    self.close_subscription(subscription_id).await;
                    return Err(error);
                }
                message = rx.recv() => message,
            };

            match message {
                Some(SubscriptionMessage::Event(event)) => events.push(event),
                Some(SubscriptionMessage::Eose) => {
                    self.close_subscription(subscription_id).await;
                    debug!(
                        relay = %self.shared.url,
                        subscription_id,
                        count = events.len(),
                        "query complete"
                    );
                    return Ok(events);
                }
                Some(SubscriptionMessage::Closed(reason)) if is_auth_required(&reason) => {
                    if auth_retried {
                        return Err(self.shared.auth_failure(reason));
                    }
                    auth_retried = true;
                    debug!(relay = %self.shared.url, subscription_id, "REQ needs auth, waiting");
                    self.shared.await_authenticated(signal).await?;
                    events.clear();
                    self.shared.send_json(&request).await?;
                }
                Some(SubscriptionMessage::Closed(reason)) => {
                    return Err(ClientError::RelayError(format!(
                        "{} closed subscription: {}",
                        self.shared.url, reason
                    )));
                }
                None => {
                    return Err(ClientError::Connection(format!(
                        "{} disconnected during query",
                        self.shared.url
                    )));
                }
            }
        }
    }

    async fn close_subscription(&self, subscription_id: &str) {
        if let Err(error) = self
            .shared
            .send_json(&json!(["CLOSE", subscription_id]))
            .await
        {
            debug!(relay = %self.shared.url, "failed to send CLOSE: {}", error);
        }
    }

    /// Send EVENT and wait for the relay's OK.
    pub async fn publish(
        &self,
        event: &Event,
        signal: &RequestSignal,
    ) -> Result<PublishConfirmation> {
        let mut auth_retried = false;
        loop {
            let status = self
                .shared
                .send_and_await_ok(&json!(["EVENT", event]), &event.id, signal)
                .await?;

            if status.accepted {
                return Ok(PublishConfirmation {
                    relay_url: self.shared.url.clone(),
                    event_id: event.id.clone(),
                    accepted: true,
                    message: status.message,
                });
            }

            if is_auth_required(&status.message) {
                if auth_retried {
                    return Err(self.shared.auth_failure(status.message));
                }
                auth_retried = true;
                self.shared.await_authenticated(signal).await?;
                continue;
            }

            return Err(ClientError::RelayError(format!(
                "{} rejected event {}: {}",
                self.shared.url, event.id, status.message
            )));
        }
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.recv_task.lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }
    }
}

impl Shared {
    async fn send_json(&self, value: &Value) -> Result<()> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let text = serde_json::to_string(value)?;
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }

    async fn send_and_await_ok(
        &self,
        frame: &Value,
        event_id: &str,
        signal: &RequestSignal,
    ) -> Result<OkStatus> {
        let mut waiter = self.registry.expect_ok(event_id).await;
        let ticket = waiter.ticket();
        if let Err(error) = self.send_json(frame).await {
            self.registry.forget_ok(event_id, ticket).await;
            return Err(error);
        }

        tokio::select! {
            error = signal.aborted() => {
                self.registry.forget_ok(event_id, ticket).await;
                Err(error)
            }
            status = &mut waiter.rx => status.map_err(|_| {
                ClientError::Connection(format!("{} disconnected before OK", self.url))
            }),
        }
    }

    async fn handle_message(self: &Arc<Self>, message: RelayMessage) {
        match message {
            RelayMessage::Event(subscription_id, event) => {
                if !self
                    .registry
                    .dispatch(&subscription_id, SubscriptionMessage::Event(event))
                    .await
                {
                    debug!(relay = %self.url, subscription_id, "event for unknown subscription");
                }
            }
            RelayMessage::Eose(subscription_id) => {
                self.registry
                    .dispatch(&subscription_id, SubscriptionMessage::Eose)
                    .await;
            }
            RelayMessage::Closed(subscription_id, reason) => {
                self.registry
                    .dispatch(&subscription_id, SubscriptionMessage::Closed(reason))
                    .await;
            }
            RelayMessage::Ok(event_id, accepted, message) => {
                self.registry
                    .resolve_ok(&event_id, OkStatus { accepted, message })
                    .await;
            }
            RelayMessage::Notice(message) => {
                info!(relay = %self.url, "relay notice: {}", message);
            }
            RelayMessage::Auth(challenge) => self.answer_challenge(challenge),
        }
    }

    /// Answer an AUTH challenge in the background so the reader keeps
    /// draining frames (the relay's OK for our AUTH arrives through it).
    fn answer_challenge(self: &Arc<Self>, challenge: String) {
        let Some(signer) = self.auth_signer.clone() else {
            debug!(relay = %self.url, "AUTH challenge ignored: no signer");
            return;
        };

        self.auth_status.send_replace(AuthStatus::Pending);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let status = match shared.authenticate(signer.as_ref(), &challenge).await {
                Ok(()) => {
                    info!(relay = %shared.url, "authenticated");
                    AuthStatus::Authenticated
                }
                Err(error) => {
                    warn!(relay = %shared.url, "authentication failed: {}", error);
                    AuthStatus::Failed(error.to_string())
                }
            };
            shared.auth_status.send_replace(status);
        });
    }

    async fn authenticate(&self, signer: &dyn AuthSigner, challenge: &str) -> Result<()> {
        let event = signer.authenticate(challenge, &self.url).await?;
        let mut waiter = self.registry.expect_ok(&event.id).await;
        let ticket = waiter.ticket();
        if let Err(error) = self.send_json(&json!(["AUTH", event])).await {
            self.registry.forget_ok(&event.id, ticket).await;
            return Err(error);
        }

        match timeout(self.config.auth_timeout, &mut waiter.rx).await {
            Ok(Ok(status)) if status.accepted => Ok(()),
            Ok(Ok(status)) => Err(ClientError::AuthRejected(status.message)),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => {
                self.registry.forget_ok(&event.id, ticket).await;
                Err(ClientError::Timeout(format!(
                    "no AUTH acknowledgement from {} after {:?}",
                    self.url, self.config.auth_timeout
                )))
            }
        }
    }

    /// Wait until the in-progress (or next) AUTH exchange settles.
    async fn await_authenticated(&self, signal: &RequestSignal) -> Result<()> {
        if self.auth_signer.is_none() {
            return Err(ClientError::NoSigner);
        }

        let mut status = self.auth_status.subscribe();
        loop {
            let current = status.borrow_and_update().clone();
            match current {
                AuthStatus::Authenticated => return Ok(()),
                AuthStatus::Failed(reason) => return Err(ClientError::AuthRejected(reason)),
                AuthStatus::Idle | AuthStatus::Pending => {}
            }

            tokio::select! {
                error = signal.aborted() => return Err(error),
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::NotConnected);
                    }
                }
            }
        }
    }

    fn auth_failure(&self, reason: String) -> ClientError {
        if self.auth_signer.is_none() {
            ClientError::NoSigner
        } else {
            ClientError::AuthRejected(reason)
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: WsReader) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match parse_relay_message(text.as_str()) {
                Ok(Some(message)) => shared.handle_message(message).await,
                Ok(None) => {}
                Err(error) => {
                    warn!(relay = %shared.url, "protocol parse error: {}", error);
                }
            },
            Ok(Message::Ping(payload)) => {
                debug!(relay = %shared.url, "received ping ({} bytes)", payload.len());
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
            Err(error) => {
                warn!(relay = %shared.url, "websocket read error: {}", error);
                break;
            }
        }
    }

    debug!(relay = %shared.url, "reader finished");
    *shared.state.write().await = ConnectionState::Disconnected;
    shared.writer.lock().await.take();
    shared.registry.clear().await;
}

fn string_field(array: &[Value], index: usize, what: &str) -> Result<String> {
    array
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ClientError::Protocol(format!("invalid {what}")))
}

/// Parse relay protocol JSON text message into typed relay message.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let array = value
        .as_array()
        .ok_or_else(|| ClientError::Protocol("expected JSON array relay message".to_string()))?;
    let Some(kind) = array.first() else {
        return Ok(None);
    };
    let kind = kind
        .as_str()
        .ok_or_else(|| ClientError::Protocol("missing relay message kind".to_string()))?;

    match kind {
        "EVENT" => {
            if array.len() < 3 {
                return Err(ClientError::Protocol("invalid EVENT message".to_string()));
            }
            let subscription_id = string_field(array, 1, "EVENT subscription id")?;
            let event: Event = serde_json::from_value(array[2].clone()).map_err(|error| {
                ClientError::Protocol(format!("invalid EVENT payload: {}", error))
            })?;
            Ok(Some(RelayMessage::Event(subscription_id, event)))
        }
        "OK" => {
            if array.len() < 4 {
                return Err(ClientError::Protocol("invalid OK message".to_string()));
            }
            let event_id = string_field(array, 1, "OK event id")?;
            let accepted = array[2]
                .as_bool()
                .ok_or_else(|| ClientError::Protocol("invalid OK accepted flag".to_string()))?;
            let message = string_field(array, 3, "OK message text")?;
            Ok(Some(RelayMessage::Ok(event_id, accepted, message)))
        }
        "EOSE" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid EOSE message".to_string()));
            }
            Ok(Some(RelayMessage::Eose(string_field(
                array,
                1,
                "EOSE subscription id",
            )?)))
        }
        "CLOSED" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid CLOSED message".to_string()));
            }
            let subscription_id = string_field(array, 1, "CLOSED subscription id")?;
            // The reason is optional on the wire.
            let reason = match array.get(2) {
                None => String::new(),
                Some(_) => string_field(array, 2, "CLOSED reason")?,
            };
            Ok(Some(RelayMessage::Closed(subscription_id, reason)))
        }
        "NOTICE" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid NOTICE message".to_string()));
            }
            Ok(Some(RelayMessage::Notice(string_field(
                array,
                1,
                "NOTICE message text",
            )?)))
        }
        "AUTH" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid AUTH message".to_string()));
            }
            Ok(Some(RelayMessage::Auth(string_field(
                array,
                1,
                "AUTH challenge",
            )?)))
        }
        _ => Ok(None),
    }
}
