//! Outbound chat-stream events and the sink the bridge writes them into.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Literal payload of the final SSE line.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCallPayload {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponsePayload {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        text: String,
        /// Present (and `false`) only on the fallback message after a failure.
        #[serde(rename = "isStreaming", skip_serializing_if = "Option::is_none")]
        is_streaming: Option<bool>,
    },
    FunctionCall { function: FunctionCallPayload },
    FunctionResponse { function: FunctionResponsePayload },
    #[serde(skip_serializing)]
    Done,
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        StreamEvent::Text {
            text: text.into(),
            is_streaming: None,
        }
    }

    pub fn fallback(text: impl Into<String>) -> Self {
        StreamEvent::Text {
            text: text.into(),
            is_streaming: Some(false),
        }
    }

    pub fn function_call(name: &str, arguments: Value) -> Self {
        StreamEvent::FunctionCall {
            function: FunctionCallPayload {
                name: name.to_string(),
                arguments,
            },
        }
    }

    pub fn function_response(name: &str, response: Value) -> Self {
        StreamEvent::FunctionResponse {
            function: FunctionResponsePayload {
                name: name.to_string(),
                response,
            },
        }
    }

    /// The `data:` payload for this event.
    pub fn to_data(&self) -> String {
        match self {
            StreamEvent::Done => DONE_SENTINEL.to_string(),
            event => serde_json::to_string(event).unwrap_or_else(|e| {
                tracing::error!("bridge: failed to encode stream event: {}", e);
                String::from("{}")
            }),
        }
    }
}

/// The client went away; nothing more will be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Producer half of the chat stream.
///
/// Cancellation is observed two ways: the receiver being dropped (client
/// disconnected) and the token handed to [`EventSink::new`].
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Channel-backed sink plus its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx, CancellationToken::new()), rx)
    }

    pub async fn emit(&self, event: StreamEvent) -> Result<(), Disconnected> {
        if self.cancel.is_cancelled() {
            return Err(Disconnected);
        }
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
            return Err(Disconnected);
        }
        Ok(())
    }

    /// Resolves once the client is gone or the turn was cancelled.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => self.cancel.cancel(),
        }
    }
}
