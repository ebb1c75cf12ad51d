// ---------------------------------------------------------------------------
// handlers/system.rs: Health and pool overview
// ---------------------------------------------------------------------------

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::{Value, json};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_connections: usize,
    pub store: String,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_connections: state.pool.len().await,
        store: state.store.kind().to_string(),
    })
}

/// GET /api/servers/active: descriptors of every live connection, in
/// registration order, with their transport process id where there is one.
pub async fn active_servers(State(state): State<AppState>) -> Json<Value> {
    let connections = state.pool.active_connections().await;
    let mut servers = Vec::with_capacity(connections.len());
    for conn in connections {
        let last_activity = state.pool.last_activity(&conn.descriptor.id).await;
        servers.push(json!({
            "id": conn.descriptor.id,
            "name": conn.descriptor.name,
            "transport": conn.client.transport_kind(),
            "alive": conn.client.is_alive(),
            "pid": conn.client.process_id().await,
            "lastActivity": last_activity,
            "serverInfo": conn.client.server_info(),
        }));
    }
    Json(json!({ "servers": servers }))
}
