//! SSE transport: the simpler two-endpoint dialect.
//!
//! GET on the stream endpoint upgrades to `text/event-stream` and holds
//! the connection open; POST on the message endpoint routes one envelope
//! through the dispatcher and pushes the response to the active stream
//! as a named `message` event. The minimum contract is one active
//! stream per server instance; a newer GET replaces the previous
//! stream.

use crate::config::SseBindConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::transport::Transport;
use crate::types::PARSE_ERROR;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

pub struct SseTransport {
    dispatcher: Arc<Dispatcher>,
    bind: SseBindConfig,
}

#[derive(Clone)]
struct SseState {
    dispatcher: Arc<Dispatcher>,
    /// The single active stream's sender; a new GET replaces it.
    active: Arc<Mutex<Option<mpsc::Sender<Event>>>>,
    post_endpoint: String,
}

impl SseTransport {
    pub fn new(dispatcher: Arc<Dispatcher>, bind: SseBindConfig) -> Self {
        Self { dispatcher, bind }
    }

    /// Router construction, exposed for in-process testing.
    #[doc(hidden)]
    pub fn build_router(dispatcher: Arc<Dispatcher>, bind: &SseBindConfig) -> Router {
        let state = SseState {
            dispatcher,
            active: Arc::new(Mutex::new(None)),
            post_endpoint: bind.post_endpoint.clone(),
        };
        Router::new()
            .route(&bind.endpoint, get(open_stream))
            .route(&bind.post_endpoint, post(receive_message))
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
            .with_state(state)
    }
}

fn receiver_stream(
    rx: mpsc::Receiver<Event>,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    })
}

async fn open_stream(State(state): State<SseState>) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel::<Event>(64);

    // The legacy dialect announces where envelopes should be POSTed.
    let _ = tx
        .send(Event::default().event("endpoint").data(state.post_endpoint.clone()))
        .await;

    {
        let mut active = state.active.lock().await;
        if active.replace(tx).is_some() {
            debug!("replacing previous SSE stream");
        }
    }
    info!("SSE stream opened");

    Sse::new(receiver_stream(rx)).keep_alive(KeepAlive::default())
}

async fn receive_message(State(state): State<SseState>, body: String) -> impl IntoResponse {
    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({
                    "jsonrpc": "2.0",
                    "error": { "code": PARSE_ERROR, "message": format!("parse error: {e}") },
                    "id": null
                })),
            )
                .into_response();
        }
    };

    let response = state.dispatcher.handle_envelope(value).await;

    match response {
        None => StatusCode::ACCEPTED.into_response(),
        Some(response) => {
            let active = state.active.lock().await.clone();
            match active {
                Some(tx) => {
                    let event = Event::default()
                        .event("message")
                        .data(response.to_string());
                    if tx.send(event).await.is_err() {
                        warn!("active SSE stream is gone, returning response inline");
                        return (StatusCode::OK, axum::Json(response)).into_response();
                    }
                    StatusCode::ACCEPTED.into_response()
                }
                // No stream yet: answer inline so the envelope is not lost.
                None => (StatusCode::OK, axum::Json(response)).into_response(),
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn name(&self) -> &'static str {
        "sse"
    }

    async fn serve(self: Box<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let router = Self::build_router(self.dispatcher.clone(), &self.bind);

        let addr: SocketAddr = format!("{}:{}", self.bind.host, self.bind.port)
            .parse()
            .map_err(|e| GatewayError::config(format!("invalid SSE bind address: {e}")))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::config(format!("cannot bind {addr}: {e}")))?;
        info!(
            "SSE transport listening on {addr} (GET {} / POST {})",
            self.bind.endpoint, self.bind.post_endpoint
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("SSE transport shutting down");
            })
            .await
            .map_err(|e| GatewayError::internal(format!("SSE server error: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SseBindConfig;
    use crate::dispatcher::testing::test_dispatcher;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn router() -> Router {
        SseTransport::build_router(Arc::new(test_dispatcher()), &SseBindConfig::default())
    }

    #[tokio::test]
    async fn get_opens_event_stream() {
        let response = router()
            .oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("text/event-stream"));
    }

    #[tokio::test]
    async fn post_without_stream_answers_inline() {
        let request = Request::builder()
            .method("POST")
            .uri("/message")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
            ))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["result"]["tools"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn post_malformed_json_is_400_parse_error() {
        let request = Request::builder()
            .method("POST")
            .uri("/message")
            .body(Body::from("{nope"))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn notification_post_is_accepted_with_no_body() {
        let request = Request::builder()
            .method("POST")
            .uri("/message")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
