// Streamable HTTP transport.
//
// Every outbound message is a POST to the server URL. Replies come back as a
// JSON body or as an SSE body; both are fed into one inbound channel so the
// protocol client correlates them by id. After the handshake a long-lived GET
// event stream carries server-initiated pushes into the same channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::mcp::error::McpError;
use crate::text::truncate_str;

const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";
const DELETE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpTransport {
    server_id: String,
    url: Url,
    headers: HeaderMap,
    client: Client,
    session_id: RwLock<Option<String>>,
    inbound_tx: mpsc::UnboundedSender<Value>,
    inbound: Mutex<mpsc::UnboundedReceiver<Value>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(
        server_id: &str,
        url: &str,
        headers: &HashMap<String, String>,
        client: Client,
    ) -> Result<Self, McpError> {
        let connect_err = |reason: String| McpError::Connect {
            server_id: server_id.to_string(),
            reason,
        };
        let url = Url::parse(url).map_err(|e| connect_err(format!("invalid url: {}", e)))?;

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| connect_err(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| connect_err(format!("invalid value for header '{}': {}", name, e)))?;
            header_map.insert(name, value);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            server_id: server_id.to_string(),
            url,
            headers: header_map,
            client,
            session_id: RwLock::new(None),
            inbound_tx: tx,
            inbound: Mutex::new(rx),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    async fn request(&self, method: reqwest::Method, accept: &'static str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, accept);
        if let Some(sid) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, sid);
        }
        req
    }

    pub async fn send(&self, message: &Value) -> Result<(), McpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::Transport("http transport is closed".into()));
        }

        let response = self
            .request(reqwest::Method::POST, ACCEPT_BOTH)
            .await
            .header(CONTENT_TYPE, "application/json")
            .json(message)
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("POST {} failed: {}", self.url, e)))?;

        self.remember_session(&response).await;

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!(
                "MCP server returned HTTP {}: {}",
                status,
                truncate_str(&body, 500)
            )));
        }

        if is_event_stream(&response) {
            self.spawn_sse_reader(response, "post");
            return Ok(());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| McpError::Transport(format!("failed to read response body: {}", e)))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| McpError::Transport(format!("MCP response is not valid JSON: {}", e)))?;
        let messages = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        for msg in messages {
            let _ = self.inbound_tx.send(msg);
        }
        Ok(())
    }

    pub async fn receive(&self) -> Option<Value> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            msg = async { self.inbound.lock().await.recv().await } => msg,
        }
    }

    /// Open the server-push stream. Servers without one answer 405, which is fine.
    pub async fn open_event_stream(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let result = self.request(reqwest::Method::GET, "text/event-stream").await.send().await;
        match result {
            Ok(resp) if resp.status().is_success() && is_event_stream(&resp) => {
                tracing::debug!(server_id = %self.server_id, "MCP: server event stream open");
                self.spawn_sse_reader(resp, "get");
            }
            Ok(resp) => {
                tracing::debug!(
                    server_id = %self.server_id,
                    status = %resp.status(),
                    "MCP: server offers no event stream"
                );
            }
            Err(e) => {
                tracing::debug!(server_id = %self.server_id, "MCP: event stream unavailable: {}", e);
            }
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let Some(sid) = self.session_id.write().await.take() else {
            return;
        };
        let result = self
            .client
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, sid)
            .timeout(DELETE_TIMEOUT)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(server_id = %self.server_id, "MCP: session DELETE failed: {}", e);
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn remember_session(&self, response: &Response) {
        if let Some(sid) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut lock = self.session_id.write().await;
            if lock.as_deref() != Some(sid) {
                *lock = Some(sid.to_string());
            }
        }
    }

    fn spawn_sse_reader(&self, response: Response, origin: &'static str) {
        let tx = self.inbound_tx.clone();
        let cancel = self.cancel.clone();
        let server_id = self.server_id.clone();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            for data in decoder.push(&bytes) {
                                forward_sse_data(&server_id, &data, &tx);
                            }
                        }
                        Some(Err(e)) => {
                            tracing::debug!(server_id = %server_id, origin, "MCP: SSE read failed: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }
            for data in decoder.finish() {
                forward_sse_data(&server_id, &data, &tx);
            }
        });
    }
}

fn forward_sse_data(server_id: &str, data: &str, tx: &mpsc::UnboundedSender<Value>) {
    match super::decode_messages(data) {
        Ok(messages) => {
            for msg in messages {
                let _ = tx.send(msg);
            }
        }
        Err(e) => tracing::warn!(server_id, "MCP: discarding non-JSON SSE event: {}", e),
    }
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

// ── SSE decoding ────────────────────────────────────────────────────────────

/// Incremental `text/event-stream` decoder yielding the `data` payload of each
/// complete event. Multi-line `data:` fields are joined with `\n`.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            self.accept_line(line, &mut events);
        }
        events
    }

    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            self.accept_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn accept_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // `event:`, `id:` and `retry:` carry nothing the client needs.
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if self.data.is_empty() {
            return;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        if !payload.trim().is_empty() {
            events.push(payload);
        }
    }
}
