/// Monitoring endpoint tests
///
/// Run with: cargo test --test monitoring_tests

use actiongate::web::{MonitoringState, router};
use actiongate::{
    Action, ConnectionConfig, Gateway, GatewayConfig, InMemoryBackend, PerformanceRecorder,
};
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

async fn app() -> (Router, Arc<Gateway<InMemoryBackend>>) {
    let backend = InMemoryBackend::new();
    backend.respond("GET_POST_BY_ID", [r#"{"ID":42,"CONTENT":"hello"}"#]);
    backend.respond("DELETE_POST", ["Database error: post 7 is locked"]);

    let gateway = Arc::new(
        Gateway::connect(
            backend,
            ConnectionConfig::new("admin", "adminpass").min_connections(0),
            GatewayConfig::default(),
            Arc::new(PerformanceRecorder::new()),
        )
        .await
        .unwrap(),
    );

    let app = router(MonitoringState::for_gateway(Arc::clone(&gateway)));
    (app, gateway)
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Option<Value>) {
    let response = app
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        None
    } else {
        Some(serde_json::from_slice(&bytes).unwrap())
    };
    (status, body)
}

#[tokio::test]
async fn test_query_metrics_snapshot() {
    let (app, gateway) = app().await;
    gateway.execute(&Action::GetPostById { post_id: 42 }).await.unwrap();
    gateway.execute(&Action::GetPostById { post_id: 42 }).await.unwrap();

    let (status, body) = send(&app, Method::GET, "/monitoring/queries").await;
    let body = body.unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalQueries"], 1);
    assert!(body["queryMetrics"]["GET_POST_BY_ID"].is_u64());
    assert!(body["slowest"]["GET_POST_BY_ID"].is_u64());
    assert_eq!(body["signatures"]["GET_POST_BY_ID"]["calls"], 2);
}

#[tokio::test]
async fn test_failed_calls_show_error_rate() {
    let (app, gateway) = app().await;
    gateway.execute(&Action::GetPostById { post_id: 42 }).await.unwrap();
    gateway.execute(&Action::DeletePost { post_id: 7 }).await.unwrap_err();

    let (status, body) = send(&app, Method::GET, "/monitoring/queries").await;
    let body = body.unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalQueries"], 2);
    assert_eq!(body["totalErrors"], 1);
    assert_eq!(body["errorRate"], 50.0);
    assert_eq!(body["signatures"]["DELETE_POST"]["calls"], 0);
    assert_eq!(body["signatures"]["DELETE_POST"]["errors"], 1);
    assert_eq!(body["signatures"]["DELETE_POST"]["errorRate"], 100.0);
    assert_eq!(body["signatures"]["GET_POST_BY_ID"]["errorRate"], 0.0);
}

#[tokio::test]
async fn test_signature_metrics() {
    let (app, gateway) = app().await;
    gateway.execute(&Action::GetPostById { post_id: 42 }).await.unwrap();

    let (status, body) = send(&app, Method::GET, "/monitoring/queries/GET_POST_BY_ID").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["calls"], 1);

    let (status, body) = send(&app, Method::GET, "/monitoring/queries/LIKE_POST").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.unwrap()["code"], "not_found");
}

#[tokio::test]
async fn test_reset_clears_metrics() {
    let (app, gateway) = app().await;
    gateway.execute(&Action::GetPostById { post_id: 42 }).await.unwrap();

    let (status, body) = send(&app, Method::POST, "/monitoring/queries/reset").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_none());

    assert_eq!(gateway.recorder().signature_count(), 0);
    let (_, body) = send(&app, Method::GET, "/monitoring/queries").await;
    assert_eq!(body.unwrap()["totalQueries"], 0);
}

#[tokio::test]
async fn test_pool_stats() {
    let (app, gateway) = app().await;
    gateway.execute(&Action::GetPostById { post_id: 42 }).await.unwrap();

    let (status, body) = send(&app, Method::GET, "/monitoring/pool").await;
    let body = body.unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_connections"], 20);
    assert_eq!(body["total_connections"], 1);
    assert_eq!(body["active_connections"], 0);
}
