//! Integration tests for the streamable-HTTP transport: the session
//! lifecycle, accept negotiation, and notification handling.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::test_gateway;
use http_body_util::BodyExt;
use omnigate::config::HttpBindConfig;
use omnigate::transport::streamable_http::{SessionManager, StreamableHttpTransport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn test_router() -> axum::Router {
    let gateway = test_gateway().await;
    let sessions = Arc::new(SessionManager::new(Duration::from_secs(60)));
    StreamableHttpTransport::build_router(
        gateway.dispatcher.clone(),
        sessions,
        &HttpBindConfig::default(),
    )
}

fn post_json(body: &str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("accept", "application/json")
        .header("content-type", "application/json");
    if let Some(session) = session {
        builder = builder.header("mcp-session-id", session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn session_flow_initialize_list_delete() {
    let router = test_router().await;

    // 1. initialize without a session header → 200 + Mcp-Session-Id.
    let response = router
        .clone()
        .oneshot(post_json(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sid = response
        .headers()
        .get("mcp-session-id")
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string();
    let body = json_body(response).await;
    assert!(body["result"]["capabilities"].is_object());

    // 2. tools/list with the session → result.tools length 5.
    let response = router
        .clone()
        .oneshot(post_json(
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            Some(&sid),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 5);

    // 3. DELETE the session → 200.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/mcp")
                .header("mcp-session-id", &sid)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // 4. The session is gone → 404.
    let response = router
        .oneshot(post_json(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
            Some(&sid),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn request_without_session_is_400() {
    let router = test_router().await;
    let response = router
        .oneshot(post_json(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn notifications_only_post_is_202_with_empty_body() {
    let router = test_router().await;

    let response = router
        .oneshot(post_json(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn sse_accept_returns_event_stream_for_requests() {
    let gateway = test_gateway().await;
    let sessions = Arc::new(SessionManager::new(Duration::from_secs(60)));
    let router = StreamableHttpTransport::build_router(
        gateway.dispatcher.clone(),
        sessions.clone(),
        &HttpBindConfig::default(),
    );
    let session = sessions.create();

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("accept", "text/event-stream")
        .header("content-type", "application/json")
        .header("mcp-session-id", &session.id)
        .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // Release the session's handle so the stream can terminate, then
    // read the full body.
    session.close_streams();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let ids: Vec<u64> = text
        .lines()
        .filter_map(|l| l.strip_prefix("id:"))
        .filter_map(|v| v.trim().parse().ok())
        .collect();
    assert_eq!(ids, vec![1]);
    assert!(text.contains("\"jsonrpc\":\"2.0\""));
}
