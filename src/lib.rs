pub mod bridge;
pub mod config;
pub mod handlers;
pub mod mcp;
pub mod model;
pub mod state;
pub mod store;
mod text;
pub mod watchdog;

use axum::Router;
use axum::routing::{get, post};

use state::AppState;

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(handlers::health))
        .route("/api/servers/active", get(handlers::active_servers))
        // MCP management
        .route("/api/mcp/{action}", post(handlers::mcp_action).get(handlers::mcp_query))
        // Chat streaming
        .route("/api/chat/stream", post(handlers::chat_stream))
        // Shared state
        .with_state(state)
}
