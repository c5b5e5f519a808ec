//! The session socket.
//!
//! One WebSocket carries every request, response, and server event.  Each
//! binary message holds exactly one frame (see [`aof_core::protocol::frame`]).
//!
//! # Architecture
//!
//! ```text
//! Connection (cheap Clone handle)
//!  ├─ state     watch channel: Closed → Opening → Open → Closing → Closed
//!  ├─ opening   memoized open future shared by concurrent callers
//!  ├─ writer    Arc<Mutex<sink half>>   (requests, close frame)
//!  ├─ pending   reassembly table        (see `pending`)
//!  └─ reader    one task per socket: frames → pending table / event channel
//! ```
//!
//! Because there is exactly one reader task, frames are handled strictly in
//! arrival order.
//!
//! Every installed socket gets a new transport generation.  Teardown names the
//! generation it belongs to, so a slow `close` or a finishing reader can never
//! tear down a socket opened after it.
//!
//! # Failure handling (for beginners)
//!
//! Three kinds of trouble are kept apart:
//!
//! - A **request failure** (`0xCC` frame) or an **oversized response** affects
//!   only the request it names.
//! - A **protocol violation** (garbage frame, text message, chunk past the
//!   announced length) means the stream can no longer be trusted: every
//!   pending request fails with [`RequestError::Protocol`] and a
//!   [`ServerEvent::ProtocolError`] is emitted.
//! - **Transport end** (close frame, EOF, I/O error) fails every pending
//!   request with [`RequestError::ConnectionClosed`] and drops any partially
//!   received buffers.

pub mod pending;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use aof_core::protocol::{
    decode_server_frame, encode_request, payload, FrameError, RequestIdCounter, ServerFrame,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::domain::ServerConfig;

pub use pending::{IntegrityViolation, PartialCallback, PendingRequests};

/// Name of the server event that signals the server lost track of the stream.
pub const PROTOCOL_ERROR_EVENT: &str = "protocol_error";

const EVENT_CHANNEL_CAPACITY: usize = 128;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type OpenFuture = Shared<BoxFuture<'static, Result<(), ConnectionError>>>;

// ── Public types ──────────────────────────────────────────────────────────────

/// Lifecycle of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl ConnectionState {
    /// The string mirrored into the cache.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

/// Errors establishing the socket.  `Clone` because every caller awaiting the
/// same open receives it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("invalid session request for {url}: {reason}")]
    InvalidRequest { url: String, reason: String },

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
}

/// Why a single request did not produce a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The server answered with a failure frame.
    #[error("request failed")]
    Failed,

    /// The transport ended before the response completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream broke the framing rules; every pending request fails.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The response announced more bytes than the client accepts.
    #[error("response of {declared} bytes exceeds the {max}-byte limit")]
    ResponseTooLarge { declared: usize, max: usize },

    #[error("connection is not open")]
    NotOpen,

    #[error("failed to send request: {0}")]
    Send(String),

    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Something the server pushed outside of any request.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A named event with its decoded payload.
    Push { name: String, payload: rmpv::Value },
    /// The stream violated the protocol; pending requests were aborted.
    ProtocolError(String),
}

/// Socket settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub session_cookie: Option<String>,
    pub close_timeout: Duration,
}

impl From<&ServerConfig> for ConnectionConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            url: server.url.clone(),
            session_cookie: server.session_cookie.clone(),
            close_timeout: server.close_timeout(),
        }
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

struct Inner {
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    ids: RequestIdCounter,
    pending: Mutex<PendingRequests>,
    writer: tokio::sync::Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    opening: Mutex<Option<OpenFuture>>,
    /// Generation of the socket currently installed in `writer`.
    generation: AtomicU64,
    reader: Mutex<Option<(u64, JoinHandle<()>)>>,
    events_tx: mpsc::Sender<ServerEvent>,
}

/// Handle to the session socket.  Clones share the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates a closed connection and the receiver for its server events.
    pub fn new(config: ConnectionConfig) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Inner {
            config,
            state_tx,
            ids: RequestIdCounter::new(),
            pending: Mutex::new(PendingRequests::new()),
            writer: tokio::sync::Mutex::new(None),
            opening: Mutex::new(None),
            generation: AtomicU64::new(0),
            reader: Mutex::new(None),
            events_tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribes to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Opens the socket.
    ///
    /// Returns immediately when already open.  Concurrent callers during an
    /// open all await the same attempt and receive the same result.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the request cannot be built or the
    /// handshake fails.  The state is `Closed` afterwards.
    pub async fn open(&self) -> Result<(), ConnectionError> {
        let attempt = {
            let mut opening = lock(&self.inner.opening);
            if self.state() == ConnectionState::Open {
                return Ok(());
            }
            match opening.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let this = self.clone();
                    let attempt = async move { this.establish().await }.boxed().shared();
                    *opening = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Opens the socket if needed.  Used by loaders before issuing requests.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub async fn ensure_open(&self) -> Result<(), ConnectionError> {
        self.open().await
    }

    /// Sends one request and awaits its complete response.
    ///
    /// `on_partial` receives the accumulated prefix each time a chunk arrives
    /// and the response is still incomplete.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotOpen`] unless the socket is open.
    /// - [`RequestError::Failed`] when the server answers with a failure frame.
    /// - [`RequestError::ResponseTooLarge`] when the response exceeds the limit.
    /// - [`RequestError::Protocol`] / [`RequestError::ConnectionClosed`] when
    ///   the stream breaks while the request is pending.
    pub async fn request(
        &self,
        name: &str,
        payload: &[u8],
        on_partial: Option<PartialCallback>,
    ) -> Result<Vec<u8>, RequestError> {
        if self.state() != ConnectionState::Open {
            return Err(RequestError::NotOpen);
        }

        let (tx, rx) = oneshot::channel();
        let (id, frame) = {
            let mut pending = lock(&self.inner.pending);
            let id = loop {
                let id = self.inner.ids.next();
                if !pending.contains(id) {
                    break id;
                }
            };
            let frame =
                encode_request(id, name, payload).map_err(|e| RequestError::Encode(e.to_string()))?;
            pending.register(id, tx, on_partial);
            (id, frame)
        };

        debug!("request {id}: {name} ({} payload bytes)", payload.len());

        let sent = {
            let mut writer = self.inner.writer.lock().await;
            match writer.as_mut() {
                Some(sink) => sink
                    .send(WsMessage::Binary(frame))
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("socket is not connected".to_string()),
            }
        };
        if let Err(reason) = sent {
            lock(&self.inner.pending).remove(id);
            return Err(RequestError::Send(reason));
        }

        rx.await.unwrap_or(Err(RequestError::ConnectionClosed))
    }

    /// Sends a request with named-field MessagePack arguments and decodes the
    /// response into `T`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request); additionally
    /// [`RequestError::Encode`] / [`RequestError::Decode`].
    pub async fn call<T, A>(&self, name: &str, args: Option<&A>) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        A: Serialize + ?Sized,
    {
        let payload = encode_args(args)?;
        let bytes = self.request(name, &payload, None).await?;
        payload::decode(&bytes).map_err(|e| RequestError::Decode(e.to_string()))
    }

    /// Like [`call`](Self::call) but returns the response as a dynamic value.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_value<A>(
        &self,
        name: &str,
        args: Option<&A>,
        on_partial: Option<PartialCallback>,
    ) -> Result<rmpv::Value, RequestError>
    where
        A: Serialize + ?Sized,
    {
        let payload = encode_args(args)?;
        let bytes = self.request(name, &payload, on_partial).await?;
        payload::decode_value(&bytes).map_err(|e| RequestError::Decode(e.to_string()))
    }

    /// Closes the socket.
    ///
    /// Sends a close frame and waits up to the configured close timeout for
    /// the server to finish the handshake.  Every request still pending fails
    /// with [`RequestError::ConnectionClosed`].  Closing a closed connection
    /// is a no-op.
    pub async fn close(&self) {
        match self.state() {
            ConnectionState::Closed => return,
            ConnectionState::Opening => {
                // let the in-flight attempt finish first
                if self.open().await.is_err() {
                    return;
                }
            }
            ConnectionState::Closing => {
                let mut state_rx = self.watch_state();
                let _ = state_rx.wait_for(|s| *s == ConnectionState::Closed).await;
                return;
            }
            ConnectionState::Open => {}
        }

        let generation = self.inner.generation.load(Ordering::Acquire);
        self.set_state(ConnectionState::Closing);
        let mut state_rx = self.watch_state();

        {
            let mut writer = self.inner.writer.lock().await;
            if let Some(sink) = writer.as_mut() {
                if let Err(e) = sink.send(WsMessage::Close(None)).await {
                    debug!("close frame not sent: {e}");
                }
            }
        }

        let acknowledged = timeout(
            self.inner.config.close_timeout,
            state_rx.wait_for(|s| *s == ConnectionState::Closed),
        )
        .await
        .is_ok();
        if acknowledged {
            // the reader already tore the transport down
            return;
        }

        warn!(
            "server did not finish closing within {:?}; dropping socket",
            self.inner.config.close_timeout
        );
        {
            let mut reader = lock(&self.inner.reader);
            if matches!(reader.as_ref(), Some((g, _)) if *g == generation) {
                if let Some((_, handle)) = reader.take() {
                    handle.abort();
                }
            }
        }
        self.inner.finish_transport(generation).await;
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn set_state(&self, state: ConnectionState) {
        self.inner.set_state(state);
    }

    async fn establish(&self) -> Result<(), ConnectionError> {
        let mut state_rx = self.watch_state();
        let _ = state_rx
            .wait_for(|s| *s != ConnectionState::Closing)
            .await;

        self.set_state(ConnectionState::Opening);
        let result = self.connect().await;
        match &result {
            Ok(()) => self.set_state(ConnectionState::Open),
            Err(e) => {
                warn!("{e}");
                self.set_state(ConnectionState::Closed);
            }
        }
        lock(&self.inner.opening).take();
        result
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        let url = &self.inner.config.url;
        let invalid = |reason: String| ConnectionError::InvalidRequest {
            url: url.clone(),
            reason,
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;
        if let Some(cookie) = &self.inner.config.session_cookie {
            let value = HeaderValue::from_str(cookie).map_err(|e| invalid(e.to_string()))?;
            request.headers_mut().insert(COOKIE, value);
        }

        let (ws_stream, _response) =
            connect_async(request)
                .await
                .map_err(|e| ConnectionError::Connect {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
        info!("session socket connected to {url}");

        let (sink, stream) = ws_stream.split();
        let generation = {
            let mut writer = self.inner.writer.lock().await;
            let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *writer = Some(sink);
            generation
        };

        let inner = Arc::clone(&self.inner);
        let reader = tokio::spawn(async move { inner.read_loop(stream, generation).await });
        *lock(&self.inner.reader) = Some((generation, reader));
        Ok(())
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("connection {} → {}", previous.as_str(), state.as_str());
        }
    }

    async fn read_loop(self: Arc<Self>, mut stream: SplitStream<WsStream>, generation: u64) {
        while let Some(message) = stream.next().await {
            match message {
                Ok(WsMessage::Binary(bytes)) => {
                    if let Err(reason) = self.handle_frame(&bytes) {
                        self.protocol_violation(reason);
                    }
                }
                Ok(WsMessage::Text(_)) => {
                    self.protocol_violation("text message on the binary channel".to_string());
                }
                Ok(WsMessage::Ping(data)) => {
                    debug!("websocket ping ({} bytes)", data.len());
                }
                Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    debug!("websocket close frame received: {frame:?}");
                    break;
                }
                Ok(WsMessage::Frame(_)) => {}
                Err(e) => {
                    warn!("session socket error: {e}");
                    break;
                }
            }
        }
        self.finish_transport(generation).await;
    }

    /// Applies one binary frame.  Returns the violation reason if the frame
    /// breaks the protocol.
    fn handle_frame(&self, bytes: &[u8]) -> Result<(), String> {
        let frame = match decode_server_frame(bytes) {
            Ok(frame) => frame,
            Err(FrameError::ResponseTooLarge { id, declared, max }) => {
                warn!("request {id}: response of {declared} bytes exceeds the {max}-byte limit");
                lock(&self.pending).reject(id, RequestError::ResponseTooLarge { declared, max });
                return Ok(());
            }
            Err(e) => return Err(e.to_string()),
        };

        match frame {
            ServerFrame::Event { name, payload: body } => {
                let payload = payload::decode_value(body)
                    .map_err(|e| format!("event {name}: {e}"))?;
                if name == PROTOCOL_ERROR_EVENT {
                    let reason = format!("server reported protocol error: {payload}");
                    self.protocol_violation(reason);
                } else {
                    debug!("event {name}");
                    self.emit(ServerEvent::Push {
                        name: name.to_string(),
                        payload,
                    });
                }
                Ok(())
            }
            frame => {
                let delivery = lock(&self.pending)
                    .apply(frame)
                    .map_err(|violation| violation.to_string())?;
                // outside the lock
                if let Some(delivery) = delivery {
                    delivery.deliver();
                }
                Ok(())
            }
        }
    }

    fn protocol_violation(&self, reason: String) {
        error!("protocol violation: {reason}");
        let aborted = lock(&self.pending).abort_all(RequestError::Protocol(reason.clone()));
        if aborted > 0 {
            warn!("aborted {aborted} pending request(s)");
        }
        self.emit(ServerEvent::ProtocolError(reason));
    }

    /// Hands an event to the receiver without ever blocking the reader.  A
    /// full channel drops the event.
    fn emit(&self, event: ServerEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let name = match &event {
                    ServerEvent::Push { name, .. } => name.as_str(),
                    ServerEvent::ProtocolError(_) => PROTOCOL_ERROR_EVENT,
                };
                warn!("event channel full; dropping {name}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event receiver dropped; discarding event");
            }
        }
    }

    /// Tears down transport `generation`: fails every pending request, drops
    /// the sink, and moves to `Closed`.  Does nothing once a newer socket is
    /// installed.  Idempotent.
    async fn finish_transport(&self, generation: u64) {
        let mut writer = self.writer.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!("transport {generation} already replaced; skipping teardown");
            return;
        }
        let aborted = lock(&self.pending).abort_all(RequestError::ConnectionClosed);
        if aborted > 0 {
            info!("connection closed with {aborted} pending request(s)");
        }
        writer.take();
        self.set_state(ConnectionState::Closed);
    }
}

fn encode_args<A: Serialize + ?Sized>(args: Option<&A>) -> Result<Vec<u8>, RequestError> {
    match args {
        Some(args) => payload::encode_named(args).map_err(|e| RequestError::Encode(e.to_string())),
        None => Ok(Vec::new()),
    }
}

/// Locks a std mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
