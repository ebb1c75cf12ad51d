// ---------------------------------------------------------------------------
// handlers/mod.rs: HTTP surface (MCP management, chat streaming, health)
// ---------------------------------------------------------------------------

pub mod chat;
pub mod mcp;
pub mod system;

pub use chat::chat_stream;
pub use mcp::{mcp_action, mcp_query};
pub use system::{active_servers, health};

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors of the non-MCP endpoints. Rendered in the same envelope as
/// [`crate::mcp::GatewayError`]: `{ "error", "success": false, "code" }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!("API error ({}): {}", status.as_u16(), self);
        let body = json!({
            "error": self.to_string(),
            "success": false,
            "code": self.error_code(),
        });
        (status, Json(body)).into_response()
    }
}
