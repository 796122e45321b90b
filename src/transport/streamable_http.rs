//! Streamable-HTTP transport.
//!
//! A single endpoint accepts POST (client→server envelopes), GET (open
//! an SSE stream bound to a session), DELETE (terminate a session) and
//! OPTIONS (CORS preflight). Sessions are created on the first
//! `initialize` request arriving without a session header and pinned by
//! the `Mcp-Session-Id` header afterwards. The `Accept` header picks
//! unary JSON or a per-request SSE stream whose events carry monotonic
//! `id:` values starting at 1.

use crate::config::HttpBindConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::transport::Transport;
use crate::types::{classify, MessageKind, PARSE_ERROR};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use dashmap::DashMap;
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// One SSE stream: its sender and the per-stream monotonic event id.
pub struct StreamHandle {
    pub id: String,
    tx: mpsc::Sender<Event>,
    next_id: AtomicU64,
}

impl StreamHandle {
    fn new(tx: mpsc::Sender<Event>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tx,
            next_id: AtomicU64::new(0),
        }
    }

    /// Emit one event; the `id:` line is strictly increasing per
    /// stream, starting at 1.
    pub async fn emit(&self, data: String) -> bool {
        let event_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx
            .send(Event::default().id(event_id.to_string()).data(data))
            .await
            .is_ok()
    }
}

/// Per-client state for the streamable dialect.
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    last_activity: RwLock<Instant>,
    initialized: AtomicBool,
    streams: Mutex<Vec<Arc<StreamHandle>>>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            initialized: AtomicBool::new(false),
            streams: Mutex::new(Vec::new()),
        }
    }

    fn touch(&self) {
        *self.last_activity.write().expect("session clock") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.read().expect("session clock").elapsed()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    fn attach_stream(&self, handle: Arc<StreamHandle>) {
        self.streams.lock().expect("session streams").push(handle);
    }

    /// Drop every stream handle; the receiving ends terminate once the
    /// in-flight senders are gone.
    pub fn close_streams(&self) {
        self.streams.lock().expect("session streams").clear();
    }
}

/// Session table with idle expiry.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions.insert(session.id.clone(), session.clone());
        crate::metrics::ACTIVE_SESSIONS.set(self.sessions.len() as i64);
        info!(session = %session.id, "session created");
        session
    }

    /// Known and unexpired, refreshing activity on hit.
    pub fn get_valid(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(id)?.clone();
        if session.idle_for() > self.ttl {
            drop(session);
            self.terminate(id);
            return None;
        }
        session.touch();
        Some(session)
    }

    pub fn terminate(&self, id: &str) -> bool {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.close_streams();
            crate::metrics::ACTIVE_SESSIONS.set(self.sessions.len() as i64);
            info!(session = %id, "session terminated");
            true
        } else {
            false
        }
    }

    pub fn terminate_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().close_streams();
        }
        self.sessions.clear();
        crate::metrics::ACTIVE_SESSIONS.set(0);
    }

    /// Reap sessions idle past the TTL.
    pub fn sweep(&self) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > self.ttl)
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            debug!(session = %id, "expiring idle session");
            self.terminate(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
    config: HttpBindConfig,
}

pub struct StreamableHttpTransport {
    dispatcher: Arc<Dispatcher>,
    bind: HttpBindConfig,
    sessions: Arc<SessionManager>,
}

impl StreamableHttpTransport {
    pub fn new(dispatcher: Arc<Dispatcher>, bind: HttpBindConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(Duration::from_millis(
            bind.session_ttl_ms,
        )));
        Self {
            dispatcher,
            bind,
            sessions,
        }
    }

    pub fn session_manager(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Router construction, exposed for in-process testing.
    #[doc(hidden)]
    pub fn build_router(
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionManager>,
        bind: &HttpBindConfig,
    ) -> Router {
        let state = AppState {
            dispatcher,
            sessions,
            config: bind.clone(),
        };
        Router::new()
            .route(&bind.endpoint, any(handle_mcp))
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
            .with_state(state)
    }
}

async fn handle_mcp(State(state): State<AppState>, request: Request<Body>) -> Response {
    if let Some(rejection) = check_origin(request.headers(), &state.config) {
        return rejection;
    }

    let method = request.method().clone();
    match method.as_str() {
        "POST" => {
            let (parts, body) = request.into_parts();
            let bytes = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(_) => return StatusCode::BAD_REQUEST.into_response(),
            };
            handle_post(state, parts.headers, &bytes).await
        }
        "GET" => handle_get(state, request.headers().clone()).await,
        "DELETE" => handle_delete(state, request.headers()),
        // CORS headers come from the layer; the preflight just needs a
        // success status.
        "OPTIONS" => StatusCode::NO_CONTENT.into_response(),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Origin allowlist check. Non-matching origins are logged and, by
/// policy, rejected — the DNS-rebinding defense.
fn check_origin(headers: &HeaderMap, config: &HttpBindConfig) -> Option<Response> {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok())?;
    if config.allowed_origins.is_empty() || config.allowed_origins.iter().any(|o| o == origin) {
        return None;
    }
    warn!(origin = %origin, "request from unlisted origin");
    if !config.reject_unknown_origin {
        return None;
    }
    Some(
        (
            StatusCode::FORBIDDEN,
            axum::Json(json!({
                "jsonrpc": "2.0",
                "error": { "code": -32600, "message": "origin not allowed" },
                "id": null
            })),
        )
            .into_response(),
    )
}

fn rpc_error_body(status: StatusCode, code: i64, message: &str) -> Response {
    (
        status,
        axum::Json(json!({
            "jsonrpc": "2.0",
            "error": { "code": code, "message": message },
            "id": null
        })),
    )
        .into_response()
}

fn session_header_value(session: &Session) -> HeaderValue {
    HeaderValue::from_str(&session.id).expect("uuid is a valid header value")
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/event-stream"))
        .unwrap_or(false)
}

struct EnvelopeShape {
    items: Vec<Value>,
    batch: bool,
    has_requests: bool,
    has_initialize: bool,
}

fn analyze(value: Value) -> EnvelopeShape {
    let (items, batch) = match value {
        Value::Array(items) => (items, true),
        other => (vec![other], false),
    };
    let mut has_requests = false;
    let mut has_initialize = false;
    for item in &items {
        if classify(item) == MessageKind::Request {
            has_requests = true;
            if item.get("method").and_then(Value::as_str) == Some("initialize") {
                has_initialize = true;
            }
        }
    }
    EnvelopeShape {
        items,
        batch,
        has_requests,
        has_initialize,
    }
}

async fn handle_post(state: AppState, headers: HeaderMap, body: &[u8]) -> Response {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return rpc_error_body(
                StatusCode::BAD_REQUEST,
                PARSE_ERROR,
                &format!("parse error: {e}"),
            )
        }
    };

    let shape = analyze(value);
    let header_session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // Initialize-vs-session state machine.
    let session = match (&header_session, shape.has_initialize) {
        (Some(id), _) => match state.sessions.get_valid(id) {
            Some(session) => session,
            None if shape.has_initialize => state.sessions.create(),
            None => {
                return rpc_error_body(
                    StatusCode::NOT_FOUND,
                    -32600,
                    "unknown or expired session",
                )
            }
        },
        (None, true) => state.sessions.create(),
        (None, false) if shape.has_requests => {
            return rpc_error_body(
                StatusCode::BAD_REQUEST,
                -32600,
                "missing Mcp-Session-Id header",
            )
        }
        // Notifications and responses are accepted without a session.
        (None, false) => {
            for item in shape.items {
                state.dispatcher.handle_message(item).await;
            }
            return StatusCode::ACCEPTED.into_response();
        }
    };

    if shape.has_initialize {
        session.mark_initialized();
    }

    // Only notifications / responses: process, 202, no body.
    if !shape.has_requests {
        for item in shape.items {
            state.dispatcher.handle_message(item).await;
        }
        let mut response = StatusCode::ACCEPTED.into_response();
        response
            .headers_mut()
            .insert(SESSION_HEADER, session_header_value(&session));
        return response;
    }

    if accepts_event_stream(&headers) {
        stream_responses(state, session, shape).await
    } else {
        unary_responses(state, session, shape).await
    }
}

/// Accept: application/json — process synchronously, answer in one body.
async fn unary_responses(state: AppState, session: Arc<Session>, shape: EnvelopeShape) -> Response {
    let mut responses = Vec::new();
    for item in shape.items {
        if let Some(response) = state.dispatcher.handle_message(item).await {
            responses.push(response);
        }
    }

    let payload = if shape.batch {
        Value::Array(responses)
    } else {
        responses.into_iter().next().unwrap_or(Value::Null)
    };

    let mut response = (StatusCode::OK, axum::Json(payload)).into_response();
    response
        .headers_mut()
        .insert(SESSION_HEADER, session_header_value(&session));
    response
}

/// Accept: text/event-stream — allocate a stream, emit each response as
/// an event with a monotonic id, then end the stream.
async fn stream_responses(
    state: AppState,
    session: Arc<Session>,
    shape: EnvelopeShape,
) -> Response {
    let (tx, rx) = mpsc::channel::<Event>(64);
    let handle = Arc::new(StreamHandle::new(tx));
    session.attach_stream(handle.clone());

    let dispatcher = state.dispatcher.clone();
    let task_handle = handle.clone();
    tokio::spawn(async move {
        for item in shape.items {
            if let Some(response) = dispatcher.handle_message(item).await {
                if !task_handle.emit(response.to_string()).await {
                    debug!("POST stream client went away");
                    break;
                }
            }
        }
        // Dropping the task's sender clone ends the stream once the
        // session's handle is released too.
    });

    let sse = Sse::new(receiver_stream(rx)).keep_alive(KeepAlive::default());
    let mut response = sse.into_response();
    response
        .headers_mut()
        .insert(SESSION_HEADER, session_header_value(&session));
    response
}

/// GET: open a session-bound SSE stream that stays up until the client
/// disconnects or the session ends.
async fn handle_get(state: AppState, headers: HeaderMap) -> Response {
    let Some(id) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return rpc_error_body(
            StatusCode::BAD_REQUEST,
            -32600,
            "missing Mcp-Session-Id header",
        );
    };
    let Some(session) = state.sessions.get_valid(id) else {
        return rpc_error_body(StatusCode::NOT_FOUND, -32600, "unknown or expired session");
    };
    if !accepts_event_stream(&headers) {
        return rpc_error_body(
            StatusCode::NOT_ACCEPTABLE,
            -32600,
            "GET requires Accept: text/event-stream",
        );
    }

    let (tx, rx) = mpsc::channel::<Event>(64);
    let handle = Arc::new(StreamHandle::new(tx));
    session.attach_stream(handle);
    debug!(session = %session.id, "GET stream opened");

    let sse = Sse::new(receiver_stream(rx)).keep_alive(KeepAlive::default());
    let mut response = sse.into_response();
    response
        .headers_mut()
        .insert(SESSION_HEADER, session_header_value(&session));
    response
}

fn handle_delete(state: AppState, headers: &HeaderMap) -> Response {
    let Some(id) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return rpc_error_body(
            StatusCode::BAD_REQUEST,
            -32600,
            "missing Mcp-Session-Id header",
        );
    };
    if state.sessions.terminate(id) {
        StatusCode::OK.into_response()
    } else {
        rpc_error_body(StatusCode::NOT_FOUND, -32600, "unknown session")
    }
}

fn receiver_stream(
    rx: mpsc::Receiver<Event>,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    })
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn name(&self) -> &'static str {
        "streamable-http"
    }

    async fn serve(self: Box<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let router =
            Self::build_router(self.dispatcher.clone(), self.sessions.clone(), &self.bind);

        let addr: SocketAddr = format!("{}:{}", self.bind.host, self.bind.port)
            .parse()
            .map_err(|e| GatewayError::config(format!("invalid HTTP bind address: {e}")))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::config(format!("cannot bind {addr}: {e}")))?;
        info!(
            "streamable-HTTP transport listening on {addr} (endpoint {})",
            self.bind.endpoint
        );

        // Idle-session sweeper.
        let sessions = self.sessions.clone();
        let sweep_interval = Duration::from_millis(self.bind.sweep_interval_ms);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                sessions.sweep();
            }
        });

        let sessions = self.sessions.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("streamable-HTTP transport shutting down");
                // Close every stream of every session so held SSE
                // connections drain.
                sessions.terminate_all();
            })
            .await
            .map_err(|e| GatewayError::internal(format!("HTTP server error: {e}")))?;

        sweeper.abort();
        Ok(())
    }
}
