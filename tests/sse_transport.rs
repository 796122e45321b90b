//! Integration tests for the two-endpoint SSE transport dialect.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::test_gateway;
use http_body_util::BodyExt;
use omnigate::config::SseBindConfig;
use omnigate::transport::sse::SseTransport;
use serde_json::Value;
use tower::ServiceExt;

async fn test_router() -> axum::Router {
    let gateway = test_gateway().await;
    SseTransport::build_router(gateway.dispatcher.clone(), &SseBindConfig::default())
}

#[tokio::test]
async fn stream_endpoint_upgrades_to_event_stream() {
    let router = test_router().await;
    let response = router
        .oneshot(Request::builder().uri("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
}

#[tokio::test]
async fn message_endpoint_routes_through_dispatcher() {
    let router = test_router().await;
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/message")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    // No stream is open, so the response comes back inline.
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["result"]["serverInfo"]["name"], "omnigate");
}

#[tokio::test]
async fn custom_endpoints_are_honored() {
    let gateway = test_gateway().await;
    let bind = SseBindConfig {
        endpoint: "/events".to_string(),
        post_endpoint: "/rpc".to_string(),
        ..Default::default()
    };
    let router = SseTransport::build_router(gateway.dispatcher.clone(), &bind);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rpc")
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
