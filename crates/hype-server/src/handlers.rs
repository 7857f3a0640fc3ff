//! Connection handlers for the Hype server.
//!
//! Every WebSocket runs in its own task. The first event on a socket must be
//! `connect`; it fixes the wire format for the rest of the connection (text
//! frames carry JSON, binary frames carry length-prefixed MessagePack) and
//! authenticates the user. After that the task shuttles decoded events into
//! the [`Session`] and drains the session's outbound queue into the socket.

use crate::config::{Config, StorageBackend};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hype_core::{
    Credentials, Hub, MemoryStore, Session, SessionHandle, Store, StoreIdentity,
};
use hype_protocol::{codec, ClientEvent, ProtocolError, ServerEvent, PROTOCOL_VERSION};
use hype_store::SqliteStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Error code for a `connect` with an unsupported protocol version.
const VERSION_MISMATCH: u16 = 1001;

/// Shared server state.
pub struct AppState {
    /// The relay hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state around an existing hub.
    #[must_use]
    pub fn new(hub: Arc<Hub>, config: Config) -> Self {
        Self {
            hub,
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Build the store, identity service and hub described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQLite database cannot be opened.
    pub fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn Store> = match config.storage.backend {
            StorageBackend::Memory => {
                warn!("Using in-memory storage; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
            StorageBackend::Sqlite => Arc::new(SqliteStore::open(config.database_path())?),
        };
        let identity = Arc::new(StoreIdentity::new(
            store.clone(),
            config.identity.auto_register,
        ));
        let hub = Arc::new(Hub::new(store, identity, config.hub_config()));

        Ok(Self::new(hub, config))
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let previous = self.connections.fetch_add(1, Ordering::AcqRel);
        if previous >= self.config.limits.max_connections {
            self.connections.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(ConnectionSlot(self.clone()))
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot(Arc<AppState>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Periodically end calls nobody answered.
pub fn spawn_offer_sweeper(hub: Arc<Hub>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            hub.sweep_offers();
            let stats = hub.stats();
            metrics::set_hub_gauges(stats.presence.online_users, stats.calls);
        }
    })
}

/// Serve on an already bound listener until the server stops.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let sweeper = spawn_offer_sweeper(
        state.hub.clone(),
        Duration::from_millis(state.config.calls.sweep_interval_ms),
    );

    let result = axum::serve(listener, app(state)).await;
    sweeper.abort();
    result?;

    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::from_config(config)?);
    let listener = TcpListener::bind(addr).await?;

    info!("Hype server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "online": stats.presence.online_users,
        "users": state
            .hub
            .presence()
            .online_users()
            .into_iter()
            .map(|user| user.name)
            .collect::<Vec<_>>(),
        "connections": state.connection_count(),
        "calls": stats.calls,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = state.try_acquire() else {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, slot))
        .into_response()
}

/// Encoding chosen by the client's first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Json,
    MessagePack,
}

impl WireFormat {
    fn encode(self, event: &ServerEvent) -> Result<Message, ProtocolError> {
        match self {
            WireFormat::Json => codec::encode_text(event).map(Message::Text),
            WireFormat::MessagePack => codec::encode(event).map(|data| Message::Binary(data.to_vec())),
        }
    }
}

type Decoded = Vec<Result<ClientEvent, ProtocolError>>;

/// Decode every complete event in a data frame.
///
/// Binary frames go through `buffer`, so an event split across frames is
/// decoded once its last part arrives. Control frames yield nothing.
fn decode_message(msg: &Message, buffer: &mut BytesMut, max_size: usize) -> Option<(WireFormat, Decoded)> {
    let len = message_len(msg);
    let too_large = || {
        ProtocolError::Invalid(format!("message of {len} bytes exceeds limit of {max_size}"))
    };

    match msg {
        Message::Text(text) => {
            if len > max_size {
                return Some((WireFormat::Json, vec![Err(too_large())]));
            }
            Some((WireFormat::Json, vec![codec::decode_text(text)]))
        }
        Message::Binary(data) => {
            if len > max_size {
                return Some((WireFormat::MessagePack, vec![Err(too_large())]));
            }
            buffer.extend_from_slice(data);

            let mut events: Decoded = Vec::new();
            loop {
                if let Some(pending) = pending_len(buffer).filter(|&n| n > max_size) {
                    buffer.clear();
                    events.push(Err(ProtocolError::Invalid(format!(
                        "event of {pending} bytes exceeds limit of {max_size}"
                    ))));
                    break;
                }
                match codec::decode_from(buffer) {
                    Ok(Some(event)) => events.push(Ok(event)),
                    Ok(None) => break,
                    Err(e) => events.push(Err(e)),
                }
            }
            Some((WireFormat::MessagePack, events))
        }
        _ => None,
    }
}

/// Full encoded size of the event at the head of `buffer`, once its length
/// prefix has arrived.
fn pending_len(buffer: &BytesMut) -> Option<usize> {
    let prefix: [u8; codec::LENGTH_PREFIX_SIZE] =
        buffer.get(..codec::LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(codec::LENGTH_PREFIX_SIZE + u32::from_be_bytes(prefix) as usize)
}

fn message_len(msg: &Message) -> usize {
    match msg {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    }
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    format: WireFormat,
    event: &ServerEvent,
) -> Result<()> {
    let message = format.encode(event)?;
    metrics::record_event(event.kind(), message_len(&message), "outbound");
    sender.send(message).await?;
    Ok(())
}

/// Report a handshake failure and close the socket.
async fn reject(sender: &mut SplitSink<WebSocket, Message>, format: WireFormat, event: ServerEvent) {
    if let Err(e) = send_event(sender, format, &event).await {
        debug!(error = %e, "Failed to send rejection");
    }
    let _ = sender.send(Message::Close(None)).await;
}

/// Wait for the first event on a fresh socket.
///
/// Returns the wire format, the first event and whatever else arrived in
/// the same frame, or `None` if the socket went away first.
async fn read_first_event(
    receiver: &mut SplitStream<WebSocket>,
    sender: &mut SplitSink<WebSocket, Message>,
    buffer: &mut BytesMut,
    max_size: usize,
) -> Option<(WireFormat, Result<ClientEvent, ProtocolError>, Decoded)> {
    loop {
        match receiver.next().await? {
            Ok(Message::Ping(data)) => {
                sender.send(Message::Pong(data)).await.ok()?;
            }
            Ok(Message::Close(_)) => return None,
            Ok(msg) => {
                let Some((format, decoded)) = decode_message(&msg, buffer, max_size) else {
                    continue;
                };
                let mut decoded = decoded.into_iter();
                if let Some(first) = decoded.next() {
                    return Some((format, first, decoded.collect()));
                }
            }
            Err(e) => {
                debug!(error = %e, "WebSocket error before connect");
                return None;
            }
        }
    }
}

/// Feed decoded events to the session.
async fn dispatch_all(session: &Session, decoded: Decoded, bytes: usize) {
    for result in decoded {
        match result {
            Ok(event) => {
                metrics::record_event(event.kind(), bytes, "inbound");
                if let Some(code) = session.dispatch(event).await {
                    metrics::record_error(&code.to_string());
                }
            }
            Err(e) => {
                warn!(user = %session.user().name, error = %e, "Undecodable event");
                metrics::record_error("decode");
                session
                    .handle()
                    .deliver(ServerEvent::error(e.code(), e.to_string()));
            }
        }
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let config = &state.config;
    let max_size = config.limits.max_message_size;

    let (mut sender, mut receiver) = socket.split();
    let mut buffer = BytesMut::with_capacity(4096);

    // Handshake
    let handshake = tokio::time::timeout(
        Duration::from_millis(config.transport.handshake_timeout_ms),
        read_first_event(&mut receiver, &mut sender, &mut buffer, max_size),
    )
    .await;

    let (format, first, rest) = match handshake {
        Ok(Some(handshake)) => handshake,
        Ok(None) => {
            debug!("WebSocket closed before connect");
            return;
        }
        Err(_) => {
            debug!("Handshake timed out");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let (version, credentials) = match first {
        Ok(ClientEvent::Connect {
            version,
            username,
            token,
        }) => (version, Credentials::new(username, token)),
        Ok(other) => {
            let message = format!("expected connect, got {}", other.kind());
            reject(&mut sender, format, ServerEvent::error(1002, message)).await;
            return;
        }
        Err(e) => {
            reject(&mut sender, format, ServerEvent::error(e.code(), e.to_string())).await;
            return;
        }
    };

    if !PROTOCOL_VERSION.accepts_major(version) {
        let message = format!("unsupported protocol version {version}, server speaks {PROTOCOL_VERSION}");
        reject(&mut sender, format, ServerEvent::error(VERSION_MISMATCH, message)).await;
        return;
    }

    let user = match state.hub.identity().authenticate(&credentials).await {
        Ok(user) => user,
        Err(e) => {
            info!(user = %credentials.username, error = %e, "Authentication failed");
            metrics::record_error("auth");
            reject(&mut sender, format, ServerEvent::error(e.code(), e.to_string())).await;
            return;
        }
    };

    let (handle, mut outbound) = SessionHandle::channel(config.limits.outbound_buffer);
    let session = match Session::open(state.hub.clone(), user, handle).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to open session");
            reject(&mut sender, format, ServerEvent::error(e.code(), e.to_string())).await;
            return;
        }
    };

    let devices = state.hub.presence().session_count(session.user().id);
    info!(user = %session.user().name, session = %session.id(), devices, ?format, "Client connected");
    dispatch_all(&session, rest, 0).await;

    let heartbeat_timeout = Duration::from_millis(config.heartbeat.timeout_ms);
    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(config.heartbeat.interval_ms.max(100)));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            biased;

            Some(event) = outbound.recv() => {
                if let Err(e) = send_event(&mut sender, format, &event).await {
                    debug!(session = %session.id(), error = %e, "Send failed");
                    break;
                }
            }

            msg = receiver.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session.id(), "Received close frame");
                        break;
                    }
                    Some(Ok(msg)) => {
                        let start = Instant::now();
                        let bytes = message_len(&msg);
                        if let Some((_, decoded)) = decode_message(&msg, &mut buffer, max_size) {
                            dispatch_all(&session, decoded, bytes).await;
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Err(e)) => {
                        warn!(session = %session.id(), error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %session.id(), "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > heartbeat_timeout {
                    info!(user = %session.user().name, session = %session.id(), "Heartbeat timeout");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    session.close();
    let stats = state.hub.stats();
    metrics::set_hub_gauges(stats.presence.online_users, stats.calls);

    info!(user = %session.user().name, session = %session.id(), "Client disconnected");
}
