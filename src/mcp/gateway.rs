//! Action dispatcher for the management endpoint.
//!
//! Maps an action name onto one pool call and wraps the result as
//! `{ <field>: value }`. Failures become [`GatewayError`], which renders as
//! `{ "error": ..., "success": false }` with a non-2xx status.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::error::McpError;
use super::pool::ConnectionPool;
use super::types::ServerDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpAction {
    Connect,
    Disconnect,
    Status,
    ListResources,
    ListTools,
    ListPrompts,
    CallTool,
    ReadResource,
    GetPrompt,
}

impl McpAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            McpAction::Connect => "connect",
            McpAction::Disconnect => "disconnect",
            McpAction::Status => "status",
            McpAction::ListResources => "list-resources",
            McpAction::ListTools => "list-tools",
            McpAction::ListPrompts => "list-prompts",
            McpAction::CallTool => "call-tool",
            McpAction::ReadResource => "read-resource",
            McpAction::GetPrompt => "get-prompt",
        }
    }

    /// Actions that only read state and may be issued with GET.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            McpAction::Status | McpAction::ListResources | McpAction::ListTools | McpAction::ListPrompts
        )
    }
}

impl FromStr for McpAction {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "connect" => McpAction::Connect,
            "disconnect" => McpAction::Disconnect,
            "status" => McpAction::Status,
            "list-resources" => McpAction::ListResources,
            "list-tools" => McpAction::ListTools,
            "list-prompts" => McpAction::ListPrompts,
            "call-tool" => McpAction::CallTool,
            "read-resource" => McpAction::ReadResource,
            "get-prompt" => McpAction::GetPrompt,
            other => return Err(GatewayError::UnsupportedAction(other.to_string())),
        })
    }
}

/// Body of a management request. Which fields matter depends on the action.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub server: Option<ServerDescriptor>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub prompt_name: Option<String>,
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Mcp(#[from] McpError),
}

impl GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            GatewayError::UnsupportedAction(_) => "UNSUPPORTED_ACTION",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::Mcp(e) => match e {
                McpError::Connect { .. } => "CONNECT_FAILED",
                McpError::ConnectTimeout { .. } | McpError::Timeout { .. } => "TIMEOUT",
                McpError::Protocol { .. } => "PROTOCOL_ERROR",
                McpError::Transport(_) => "TRANSPORT_ERROR",
                McpError::NotConnected(_) => "NOT_CONNECTED",
                McpError::InvalidDescriptor(_) => "BAD_REQUEST",
                McpError::Disabled(_) => "DISABLED",
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnsupportedAction(_) | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Mcp(e) => match e {
                McpError::Connect { .. } | McpError::Protocol { .. } | McpError::Transport(_) => {
                    StatusCode::BAD_GATEWAY
                }
                McpError::ConnectTimeout { .. } | McpError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                McpError::NotConnected(_) => StatusCode::NOT_FOUND,
                McpError::InvalidDescriptor(_) => StatusCode::BAD_REQUEST,
                McpError::Disabled(_) => StatusCode::CONFLICT,
            },
        }
    }
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        tracing::error!(code = self.error_code(), "MCP API error ({}): {}", status.as_u16(), self);
        let body = json!({
            "error": self.to_string(),
            "success": false,
            "code": self.error_code(),
        });
        (status, Json(body)).into_response()
    }
}

// ── Gateway ─────────────────────────────────────────────────────────────────

/// Stateless front door to the pool. Cheap to clone; holds no connection
/// beyond the call that uses it.
#[derive(Clone)]
pub struct McpGateway {
    pool: Arc<ConnectionPool>,
}

impl McpGateway {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Dispatch a raw action name with its request body.
    pub async fn dispatch(&self, action: &str, req: ActionRequest) -> Result<Value, GatewayError> {
        let action: McpAction = action.parse()?;
        if action == McpAction::Connect {
            let server = req
                .server
                .ok_or_else(|| GatewayError::BadRequest("'server' is required for connect".into()))?;
            return self.connect(server).await;
        }
        let server_id = req
            .server_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| GatewayError::BadRequest("'serverId' is required".into()))?;
        self.execute(action, &server_id, req).await
    }

    /// The descriptor-carrying entry shape: only `connect` uses it.
    pub async fn connect(&self, server: ServerDescriptor) -> Result<Value, GatewayError> {
        self.pool.connect(server).await?;
        Ok(json!({ "success": true }))
    }

    /// The id-carrying entry shape used by every action except `connect`.
    pub async fn execute(
        &self,
        action: McpAction,
        server_id: &str,
        req: ActionRequest,
    ) -> Result<Value, GatewayError> {
        tracing::debug!(server_id, action = action.as_str(), "MCP: gateway action");
        let value = match action {
            McpAction::Connect => {
                return Err(GatewayError::BadRequest(
                    "connect requires a full server descriptor".into(),
                ));
            }
            McpAction::Disconnect => {
                self.pool.disconnect(server_id).await;
                return Ok(json!({ "success": true }));
            }
            McpAction::Status => json!({ "status": self.pool.status(server_id).await }),
            McpAction::ListResources => {
                json!({ "resources": self.pool.list_resources(server_id).await? })
            }
            McpAction::ListTools => json!({ "tools": self.pool.list_tools(server_id).await? }),
            McpAction::ListPrompts => json!({ "prompts": self.pool.list_prompts(server_id).await? }),
            McpAction::CallTool => {
                let name = required(req.tool_name, "toolName")?;
                let result = self
                    .call_tool(server_id, &name, req.args.unwrap_or_default())
                    .await?;
                json!({ "result": result })
            }
            McpAction::ReadResource => {
                let uri = required(req.uri, "uri")?;
                json!({ "resource": self.pool.read_resource(server_id, &uri).await? })
            }
            McpAction::GetPrompt => {
                let name = required(req.prompt_name, "promptName")?;
                json!({ "prompt": self.pool.get_prompt(server_id, &name, req.args).await? })
            }
        };
        Ok(value)
    }

    /// `call-tool`, also used by the chat bridge for model-issued calls.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        args: Map<String, Value>,
    ) -> Result<Value, GatewayError> {
        Ok(self.pool.call_tool(server_id, tool_name, args).await?)
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, GatewayError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| GatewayError::BadRequest(format!("'{}' is required", field)))
}
