//! JSON-RPC 2.0 client over a [`Transport`].
//!
//! Every outbound request gets a fresh id; a dispatcher task routes inbound
//! responses back to the waiting caller through a oneshot channel, so replies
//! may arrive in any order. Typed wrappers cover the MCP methods this service
//! uses (`resources/*`, `tools/*`, `prompts/*`).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::error::McpError;
use super::transport::Transport;
use super::types::{Prompt, Resource, ServerDescriptor, Tool, TransportKind};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on `nextCursor` pages fetched by one `list*` call.
const MAX_LIST_PAGES: usize = 32;

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, McpError>>>;
type Pending = Arc<std::sync::Mutex<PendingMap>>;

/// Never held across an await point.
fn lock_pending(pending: &Pending) -> std::sync::MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Drops the waiter for `id` when the request completes, times out or its
/// future is dropped by the caller.
struct PendingGuard {
    pending: Pending,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock_pending(&self.pending).remove(&self.id);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Hard deadline for spawn/dial + `initialize`.
    pub connect_timeout: Duration,
    /// Default deadline for every later request.
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct McpClient {
    server_id: String,
    transport: Arc<Transport>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    dispatcher: JoinHandle<()>,
    server_info: std::sync::RwLock<Option<Value>>,
}

impl McpClient {
    /// Open the transport for `descriptor` and run the MCP handshake.
    ///
    /// The whole handshake must finish within `options.connect_timeout`; on
    /// any failure the transport is closed before returning, so no subprocess
    /// or socket outlives a failed attempt.
    pub async fn connect(
        descriptor: &ServerDescriptor,
        http: &reqwest::Client,
        options: ClientOptions,
    ) -> Result<Self, McpError> {
        let transport = Arc::new(Transport::open(descriptor, http)?);
        let client = Self::with_transport(&descriptor.id, transport, options.request_timeout);

        let handshake = tokio::time::timeout(options.connect_timeout, client.initialize());
        match handshake.await {
            Ok(Ok(())) => {
                client.transport.start_listening().await;
                Ok(client)
            }
            Ok(Err(e)) => {
                client.close().await;
                Err(match e {
                    McpError::Connect { .. } | McpError::InvalidDescriptor(_) => e,
                    other => McpError::Connect {
                        server_id: descriptor.id.clone(),
                        reason: other.to_string(),
                    },
                })
            }
            Err(_) => {
                tracing::warn!(
                    server_id = %descriptor.id,
                    "MCP: handshake exceeded {}s, tearing down",
                    options.connect_timeout.as_secs()
                );
                client.close().await;
                Err(McpError::ConnectTimeout {
                    server_id: descriptor.id.clone(),
                    secs: options.connect_timeout.as_secs(),
                })
            }
        }
    }

    fn with_transport(server_id: &str, transport: Arc<Transport>, request_timeout: Duration) -> Self {
        let pending: Pending = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let dispatcher = spawn_dispatcher(server_id.to_string(), transport.clone(), pending.clone());
        Self {
            server_id: server_id.to_string(),
            transport,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            dispatcher,
            server_info: std::sync::RwLock::new(None),
        }
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let result = self
            .request_with_timeout(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
                None,
            )
            .await?;

        tracing::debug!(
            server_id = %self.server_id,
            "MCP: initialized (protocol version: {})",
            result.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or("unknown")
        );
        if let Ok(mut lock) = self.server_info.write() {
            *lock = Some(json!({
                "serverInfo": result.get("serverInfo").cloned().unwrap_or(Value::Null),
                "capabilities": result.get("capabilities").cloned().unwrap_or(Value::Null),
                "protocolVersion": result.get("protocolVersion").cloned().unwrap_or(Value::Null),
            }));
        }

        self.notify("notifications/initialized", None).await
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// `serverInfo`, `capabilities` and `protocolVersion` from `initialize`.
    pub fn server_info(&self) -> Option<Value> {
        self.server_info.read().ok().and_then(|v| v.clone())
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// PID of the server process for stdio connections.
    pub async fn process_id(&self) -> Option<u32> {
        match self.transport.as_ref() {
            Transport::Stdio(t) => t.pid().await,
            Transport::Http(_) => None,
        }
    }

    // ── Typed operations ────────────────────────────────────────────────

    /// `resources/list`; an empty list when the server has no resources capability.
    pub async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        self.list_paged("resources/list", "resources").await
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        self.list_paged("tools/list", "tools").await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, McpError> {
        self.list_paged("prompts/list", "prompts").await
    }

    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<Value, McpError> {
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.request("resources/read", Some(json!({ "uri": uri }))).await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, McpError> {
        let mut params = json!({ "name": name });
        if let Some(args) = arguments {
            // Prompt arguments are string-valued on the wire.
            let stringly: Map<String, Value> = args
                .into_iter()
                .map(|(k, v)| match v {
                    Value::String(s) => (k, Value::String(s)),
                    other => (k, Value::String(other.to_string())),
                })
                .collect();
            params["arguments"] = Value::Object(stringly);
        }
        self.request("prompts/get", Some(params)).await
    }

    async fn list_paged<T: DeserializeOwned>(&self, method: &str, field: &str) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page = match self.request(method, params).await {
                Ok(page) => page,
                Err(e) if e.is_method_not_found() => {
                    tracing::debug!(server_id = %self.server_id, method, "MCP: capability not offered");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            };

            let batch = page.get(field).cloned().unwrap_or_else(|| Value::Array(Vec::new()));
            let parsed: Vec<T> = serde_json::from_value(batch).map_err(|e| McpError::Protocol {
                code: -32700,
                message: format!("malformed {} result: {}", method, e),
            })?;
            items.extend(parsed);

            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(String::from);
            if cursor.is_none() {
                return Ok(items);
            }
        }

        tracing::warn!(
            server_id = %self.server_id,
            method,
            "MCP: stopped paging after {} pages",
            MAX_LIST_PAGES
        );
        Ok(items)
    }

    // ── JSON-RPC plumbing ───────────────────────────────────────────────

    /// Send a request and wait for its response under the default deadline.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        self.request_with_timeout(method, params, Some(self.request_timeout)).await
    }

    /// `timeout: None` leaves the deadline to the caller (used for the
    /// handshake, which is bounded by the connect window).
    ///
    /// The deadline covers the whole exchange, sending included: an HTTP
    /// POST that never completes counts against it. When it expires the
    /// transport is torn down, since an unresponsive server is
    /// indistinguishable from a dead one.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut message = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if let Some(p) = params {
            message["params"] = p;
        }

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id,
        };

        let exchange = async {
            self.transport.send(&message).await?;
            rx.await.unwrap_or_else(|_| {
                Err(McpError::Transport(format!(
                    "connection to '{}' closed before '{}' completed",
                    self.server_id, method
                )))
            })
        };

        let Some(limit) = timeout else {
            return exchange.await;
        };
        match tokio::time::timeout(limit, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    server_id = %self.server_id,
                    method,
                    "MCP: no response within {}ms, closing transport",
                    limit.as_millis()
                );
                self.transport.close().await;
                Err(McpError::Timeout {
                    method: method.to_string(),
                    secs: limit.as_secs(),
                })
            }
        }
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let mut message = json!({ "jsonrpc": "2.0", "method": method });
        if let Some(p) = params {
            message["params"] = p;
        }
        self.transport.send(&message).await
    }

    /// Close the transport and fail every outstanding request.
    pub async fn close(&self) {
        self.transport.close().await;
        self.dispatcher.abort();
        lock_pending(&self.pending).clear();
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

fn spawn_dispatcher(server_id: String, transport: Arc<Transport>, pending: Pending) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = transport.receive().await {
            route_inbound(&server_id, message, &pending);
        }
        // Channel gone: wake every waiter with a closed-channel error.
        lock_pending(&pending).clear();
        tracing::debug!(server_id = %server_id, "MCP: dispatcher stopped");
    })
}

fn route_inbound(server_id: &str, message: Value, pending: &Pending) {
    let is_response = message.get("result").is_some() || message.get("error").is_some();
    let id = message.get("id").and_then(response_id);

    match (is_response, id) {
        (true, Some(id)) => {
            let Some(tx) = lock_pending(pending).remove(&id) else {
                tracing::warn!(server_id, id, "MCP: discarding response for unknown request id");
                return;
            };
            let _ = tx.send(parse_response(message));
        }
        (true, None) => {
            tracing::warn!(server_id, "MCP: discarding response without usable id: {}", message);
        }
        (false, _) => {
            // Server-initiated requests and notifications are not serviced.
            let method = message.get("method").and_then(Value::as_str).unwrap_or("?");
            tracing::debug!(server_id, method, "MCP: ignoring server-initiated message");
        }
    }
}

/// Ids are numeric on the way out, but some servers echo them as strings.
fn response_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_response(mut message: Value) -> Result<Value, McpError> {
    if let Some(error) = message.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        let msg = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown MCP error")
            .to_string();
        return Err(McpError::Protocol { code, message: msg });
    }
    Ok(message.get_mut("result").map(Value::take).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::error::METHOD_NOT_FOUND;
    use crate::mcp::transport::StdioTransport;

    #[test]
    fn parse_response_extracts_result() {
        let v = parse_response(json!({ "jsonrpc": "2.0", "id": 1, "result": { "tools": [] } })).unwrap();
        assert_eq!(v, json!({ "tools": [] }));
    }

    #[test]
    fn parse_response_maps_structured_error() {
        let err = parse_response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": METHOD_NOT_FOUND, "message": "Method not found" }
        }))
        .unwrap_err();
        assert!(err.is_method_not_found());
    }

    #[test]
    fn response_ids_accept_numbers_and_numeric_strings() {
        assert_eq!(response_id(&json!(5)), Some(5));
        assert_eq!(response_id(&json!("12")), Some(12));
        assert_eq!(response_id(&json!("abc")), None);
        assert_eq!(response_id(&Value::Null), None);
    }

    #[tokio::test]
    async fn unmatched_responses_are_dropped() {
        let pending: Pending = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        lock_pending(&pending).insert(2, tx);

        route_inbound("s", json!({ "id": 99, "result": {} }), &pending);
        assert!(rx.try_recv().is_err());
        assert_eq!(lock_pending(&pending).len(), 1);

        route_inbound("s", json!({ "id": 2, "result": { "ok": true } }), &pending);
        assert_eq!(rx.await.unwrap().unwrap(), json!({ "ok": true }));
        assert!(lock_pending(&pending).is_empty());
    }

    #[tokio::test]
    async fn notifications_do_not_consume_waiters() {
        let pending: Pending = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let (tx, _rx) = oneshot::channel();
        lock_pending(&pending).insert(1, tx);

        route_inbound("s", json!({ "method": "notifications/tools/list_changed" }), &pending);
        route_inbound("s", json!({ "id": 1, "method": "sampling/createMessage" }), &pending);
        assert_eq!(lock_pending(&pending).len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abandoned_request_releases_its_waiter() {
        // Reads requests and never answers.
        let args = vec!["-c".to_string(), "cat > /dev/null".to_string()];
        let stdio = StdioTransport::spawn("silent", "sh", &args, &HashMap::new()).unwrap();
        let client = McpClient::with_transport("silent", Arc::new(Transport::Stdio(stdio)), Duration::from_secs(30));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            client.request_with_timeout("tools/list", None, None),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(client.pending_requests(), 0);

        let err = client
            .request_with_timeout("tools/list", None, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "got {err:?}");
        assert_eq!(client.pending_requests(), 0);
        client.close().await;
    }
}
