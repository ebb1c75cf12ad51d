// Health and pool overview endpoints against the real router.

mod common;

use axum::http::StatusCode;
use tower::ServiceExt;

use common::{ScriptedProvider, body_json, get_request, mock_descriptor, test_app};
use mcp_chat_backend::create_router;

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let t = test_app(ScriptedProvider::default());
    let response = create_router(t.state).oneshot(get_request("/api/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["active_connections"], 0);
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn health_counts_live_connections() {
    let t = test_app(ScriptedProvider::default());
    t.state.pool.connect(mock_descriptor("fs1", &[])).await.unwrap();
    let app = create_router(t.state.clone());

    let json = body_json(app.clone().oneshot(get_request("/api/health")).await.unwrap()).await;
    assert_eq!(json["active_connections"], 1);

    let json = body_json(app.oneshot(get_request("/api/servers/active")).await.unwrap()).await;
    let servers = json["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0]["transport"], "stdio");
    assert!(servers[0]["pid"].is_u64());
    assert_eq!(servers[0]["serverInfo"]["serverInfo"]["name"], "mock");

    t.state.pool.shutdown().await;
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let t = test_app(ScriptedProvider::default());
    let response = create_router(t.state).oneshot(get_request("/api/nonexistent")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
