//! Byte-level channels to a capability server.
//!
//! A [`Transport`] carries raw JSON-RPC messages only; framing of requests and
//! correlation of responses live in [`crate::mcp::client`]. The variant is
//! picked once, from the descriptor's transport kind, when the channel is
//! opened.

mod http;
mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use serde_json::Value;

use super::error::McpError;
use super::types::{ServerDescriptor, TransportKind};

pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl Transport {
    /// Spawn the subprocess or prepare the HTTP channel for `descriptor`.
    ///
    /// Never retries; a failure here means no resources were left behind.
    pub fn open(descriptor: &ServerDescriptor, http: &reqwest::Client) -> Result<Self, McpError> {
        descriptor.validate()?;
        match descriptor.transport {
            TransportKind::Stdio => {
                let command = descriptor.command.as_deref().unwrap_or_default();
                StdioTransport::spawn(&descriptor.id, command, &descriptor.args, &descriptor.env)
                    .map(Transport::Stdio)
            }
            TransportKind::Http => {
                let url = descriptor.url.as_deref().unwrap_or_default();
                HttpTransport::new(&descriptor.id, url, &descriptor.headers, http.clone())
                    .map(Transport::Http)
            }
        }
    }

    pub async fn send(&self, message: &Value) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.send(message).await,
            Transport::Http(t) => t.send(message).await,
        }
    }

    /// Next inbound message, or `None` once the channel is gone.
    pub async fn receive(&self) -> Option<Value> {
        match self {
            Transport::Stdio(t) => t.receive().await,
            Transport::Http(t) => t.receive().await,
        }
    }

    /// Called once the handshake succeeded. Opens the server-push stream on
    /// HTTP; nothing to do for stdio where stdout is already a push channel.
    pub async fn start_listening(&self) {
        if let Transport::Http(t) = self {
            t.open_event_stream().await;
        }
    }

    /// Release the subprocess or HTTP session. Safe to call repeatedly.
    pub async fn close(&self) {
        match self {
            Transport::Stdio(t) => t.close().await,
            Transport::Http(t) => t.close().await,
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            Transport::Stdio(t) => t.is_alive(),
            Transport::Http(t) => t.is_alive(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stdio(_) => TransportKind::Stdio,
            Transport::Http(_) => TransportKind::Http,
        }
    }
}

/// Split one line of newline-delimited JSON into messages. Batches arrive
/// as arrays and are flattened.
pub(crate) fn decode_messages(line: &str) -> Result<Vec<Value>, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_single_and_batched_messages() {
        let one = decode_messages(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert_eq!(one.len(), 1);

        let many = decode_messages(r#"[{"id":1,"result":{}},{"id":2,"result":{}}]"#).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1]["id"], 2);

        assert!(decode_messages("not json").is_err());
    }
}
