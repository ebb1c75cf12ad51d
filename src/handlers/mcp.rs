// ---------------------------------------------------------------------------
// handlers/mcp.rs: MCP management endpoint (action dispatch)
// ---------------------------------------------------------------------------

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::Value;

use crate::mcp::gateway::{ActionRequest, GatewayError, McpAction};
use crate::state::AppState;

/// POST /api/mcp/{action}
///
/// Body: `{ serverId?, server?, toolName?, args?, uri?, promptName? }`. A
/// missing body is treated as empty, so the action itself
/// decides which field is missing. Malformed JSON is rejected by the extractor.
pub async fn mcp_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    body: Option<Json<ActionRequest>>,
) -> Result<Json<Value>, GatewayError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let result = state.gateway.dispatch(&action, req).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerQuery {
    pub server_id: Option<String>,
}

/// GET /api/mcp/{action}?serverId=…: read-only actions only.
pub async fn mcp_query(
    State(state): State<AppState>,
    Path(action): Path<String>,
    Query(query): Query<ServerQuery>,
) -> Result<Json<Value>, GatewayError> {
    let parsed: McpAction = action.parse()?;
    if !parsed.is_read_only() {
        return Err(GatewayError::UnsupportedAction(format!("{} (use POST)", action)));
    }
    let server_id = query
        .server_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| GatewayError::BadRequest("Server ID is required".into()))?;

    let result = state
        .gateway
        .execute(parsed, &server_id, ActionRequest::default())
        .await?;
    Ok(Json(result))
}
