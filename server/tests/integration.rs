//! HTTP surface of the router: health and metrics.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use tower::ServiceExt;

use server::{build_router, AppState, ServerConfig};

use common::*;

fn test_app() -> axum::Router {
    let orchestrator =
        orchestrator(ScriptedTokenSource::new(&["Hi"]), ScriptedSynthesizer::new(), test_config());
    build_router(AppState::new(orchestrator, ServerConfig::default()))
}

#[tokio::test]
async fn test_health_check() {
    for uri in ["/health", "/healthz"] {
        let response = test_app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "ok");
    }
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let response = test_app()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let metrics: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(metrics["timestamp"].is_string());
    assert!(metrics["system"]["memory_total_mb"].is_u64());
    assert_eq!(metrics["pipeline"]["sessions_started"], 0);
    assert_eq!(metrics["pipeline"]["time_to_first_audio"]["count"], 0);
}

#[tokio::test]
async fn test_plain_get_on_ws_route_is_rejected() {
    let response = test_app()
        .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unknown_route() {
    let response = test_app()
        .oneshot(Request::builder().uri("/tts").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
