//! Data shapes shared by the transport, client, pool and gateway layers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::McpError;

// ── Server descriptor ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON-RPC over stdin/stdout.
    #[serde(alias = "subprocess")]
    Stdio,
    /// Streamable HTTP endpoint.
    Http,
}

/// Identity and connection parameters for one capability server.
///
/// Mirrors the persisted record of the external database; only the fields
/// matching `transport` are consulted when a connection is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(alias = "transportKind")]
    pub transport: TransportKind,
    // stdio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, alias = "argv")]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    // http
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerDescriptor {
    /// Check that the parameter group selected by `transport` is populated
    /// and the other one is empty.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.id.trim().is_empty() {
            return Err(McpError::InvalidDescriptor("server id is required".into()));
        }
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                    return Err(McpError::InvalidDescriptor(format!(
                        "server '{}': stdio transport requires a command",
                        self.id
                    )));
                }
                if self.url.is_some() || !self.headers.is_empty() {
                    return Err(McpError::InvalidDescriptor(format!(
                        "server '{}': url/headers are not valid for stdio transport",
                        self.id
                    )));
                }
            }
            TransportKind::Http => {
                let raw = self.url.as_deref().unwrap_or_default();
                let parsed = url::Url::parse(raw).map_err(|e| {
                    McpError::InvalidDescriptor(format!(
                        "server '{}': invalid url '{}': {}",
                        self.id, raw, e
                    ))
                })?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(McpError::InvalidDescriptor(format!(
                        "server '{}': url must be http(s)",
                        self.id
                    )));
                }
                if self.command.is_some() || !self.args.is_empty() || !self.env.is_empty() {
                    return Err(McpError::InvalidDescriptor(format!(
                        "server '{}': command/args/env are not valid for http transport",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

// ── Capability projections ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

// ── Connection state ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Result of a `status` probe, in the shape the chat UI consumes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub status: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Value>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            status: ConnectionState::Disconnected,
            last_connected: None,
            error_message: None,
            server_info: None,
        }
    }

    pub fn connected(at: DateTime<Utc>, server_info: Option<Value>) -> Self {
        Self {
            connected: true,
            status: ConnectionState::Connected,
            last_connected: Some(at),
            error_message: None,
            server_info,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            connected: false,
            status: ConnectionState::Error,
            last_connected: None,
            error_message: Some(message.into()),
            server_info: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stdio(command: Option<&str>) -> ServerDescriptor {
        serde_json::from_value(json!({
            "id": "fs1",
            "name": "Filesystem",
            "transport": "stdio",
            "command": command,
            "args": ["/data"],
        }))
        .unwrap()
    }

    #[test]
    fn descriptor_accepts_alternate_field_names() {
        let d: ServerDescriptor = serde_json::from_value(json!({
            "id": "fs1",
            "name": "fs",
            "transportKind": "subprocess",
            "command": "mcp-fs",
            "argv": ["/data"],
        }))
        .unwrap();
        assert_eq!(d.transport, TransportKind::Stdio);
        assert_eq!(d.args, vec!["/data".to_string()]);
        assert!(d.enabled);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn stdio_descriptor_requires_command() {
        assert!(stdio(Some("mcp-fs")).validate().is_ok());
        assert!(matches!(stdio(None).validate(), Err(McpError::InvalidDescriptor(_))));
        assert!(matches!(stdio(Some("  ")).validate(), Err(McpError::InvalidDescriptor(_))));
    }

    #[test]
    fn stdio_descriptor_rejects_http_fields() {
        let mut d = stdio(Some("mcp-fs"));
        d.url = Some("http://localhost:1".into());
        assert!(d.validate().is_err());
    }

    #[test]
    fn http_descriptor_requires_http_url() {
        let mut d: ServerDescriptor = serde_json::from_value(json!({
            "id": "web",
            "name": "web",
            "transport": "http",
            "url": "https://example.com/mcp",
            "headers": { "Authorization": "Bearer x" },
        }))
        .unwrap();
        assert!(d.validate().is_ok());

        d.url = Some("ftp://example.com".into());
        assert!(d.validate().is_err());
        d.url = None;
        assert!(d.validate().is_err());
    }

    #[test]
    fn tool_defaults_input_schema() {
        let t: Tool = serde_json::from_value(json!({ "name": "ping" })).unwrap();
        assert_eq!(t.input_schema["type"], "object");
    }

    #[test]
    fn status_serializes_camel_case() {
        let v = serde_json::to_value(ConnectionStatus::error("no response")).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["connected"], false);
        assert_eq!(v["errorMessage"], "no response");
        assert!(v.get("lastConnected").is_none());
    }
}
