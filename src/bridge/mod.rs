//! Streaming tool-call bridge.
//!
//! Drives one chat turn: offers the pool's tools to the model, forwards text
//! as it arrives, routes model-issued function calls to the server that
//! advertised the tool, feeds results back for another round, and finally
//! hands the assembled [`ConversationTurn`] to the [`TurnStore`].
//!
//! Turn state: `Streaming → Completed | Failed | Cancelled`.

pub mod events;
pub mod manifest;
pub mod turn;

pub use events::{EventSink, StreamEvent};
pub use manifest::ToolManifest;
pub use turn::{ConversationTurn, PriorTurn, TurnStatus};

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{Map, Value, json};

use crate::mcp::gateway::McpGateway;
use crate::model::{Content, FunctionCall, ModelError, ModelProvider, ModelRequest};
use crate::store::TurnStore;
use events::Disconnected;
use turn::{RecordedCall, RecordedResponse};

pub const DEFAULT_FALLBACK_MESSAGE: &str = "죄송합니다. 오류가 발생했습니다. 다시 시도해주세요.";

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Prior turns forwarded to the model.
    pub history_limit: usize,
    /// Model streams opened per turn (the first one plus follow-ups after tool calls).
    pub max_tool_rounds: usize,
    pub fallback_message: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            history_limit: 10,
            max_tool_rounds: 10,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

/// What the chat endpoint hands the bridge.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub user_text: String,
    pub prior_turns: Vec<PriorTurn>,
    pub tools_enabled: bool,
}

enum TurnAbort {
    Cancelled,
    Stream(ModelError),
}

impl From<Disconnected> for TurnAbort {
    fn from(_: Disconnected) -> Self {
        TurnAbort::Cancelled
    }
}

#[derive(Clone)]
pub struct ChatBridge {
    gateway: McpGateway,
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn TurnStore>,
    settings: BridgeSettings,
}

impl ChatBridge {
    pub fn new(
        gateway: McpGateway,
        provider: Arc<dyn ModelProvider>,
        store: Arc<dyn TurnStore>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            gateway,
            provider,
            store,
            settings,
        }
    }

    /// Run one turn to completion, writing events into `sink`.
    ///
    /// Always persists the turn, whatever its outcome. `[DONE]` is emitted
    /// unless the client is already gone.
    pub async fn run(&self, input: TurnInput, sink: EventSink) -> ConversationTurn {
        let mut turn = ConversationTurn::new(input.user_text, input.prior_turns, self.settings.history_limit);

        let manifest = if input.tools_enabled {
            ToolManifest::build(self.gateway.pool()).await
        } else {
            ToolManifest::default()
        };
        tracing::info!(
            turn_id = %turn.id,
            tools = manifest.len(),
            history = turn.prior_turns.len(),
            model = self.provider.model_name(),
            "bridge: turn started"
        );
        if input.tools_enabled && manifest.is_empty() {
            tracing::debug!(turn_id = %turn.id, "bridge: no connected server offers tools, answering without them");
        }

        match self.drive(&mut turn, &manifest, &sink).await {
            Ok(()) => turn.finish(TurnStatus::Completed),
            Err(TurnAbort::Cancelled) => {
                tracing::info!(turn_id = %turn.id, "bridge: client disconnected, turn cancelled");
                turn.finish(TurnStatus::Cancelled);
            }
            Err(TurnAbort::Stream(e)) => {
                tracing::error!(turn_id = %turn.id, "bridge: model stream failed: {}", e);
                turn.fail(e.to_string());
                let _ = sink.emit(StreamEvent::fallback(&self.settings.fallback_message)).await;
            }
        }

        if turn.status != TurnStatus::Cancelled {
            let _ = sink.emit(StreamEvent::Done).await;
        }

        if let Err(e) = self.store.save_turn(&turn).await {
            tracing::error!(turn_id = %turn.id, "bridge: failed to persist turn: {}", e);
        }
        tracing::info!(
            turn_id = %turn.id,
            status = turn.status.as_str(),
            calls = turn.function_calls.len(),
            chars = turn.accumulated_text.len(),
            "bridge: turn finished"
        );
        turn
    }

    async fn drive(&self, turn: &mut ConversationTurn, manifest: &ToolManifest, sink: &EventSink) -> Result<(), TurnAbort> {
        let mut contents: Vec<Content> = turn
            .prior_turns
            .iter()
            .map(|p| crate::model::gemini::history_content(&p.role, &p.text))
            .collect();
        contents.push(Content::user_text(turn.user_text.clone()));
        let tools = manifest.declarations();

        for round in 0..self.settings.max_tool_rounds {
            let request = ModelRequest {
                contents: contents.clone(),
                tools: tools.clone(),
            };
            let mut stream = tokio::select! {
                _ = sink.cancelled() => return Err(TurnAbort::Cancelled),
                opened = self.provider.stream(request) => opened.map_err(TurnAbort::Stream)?,
            };

            let mut model_parts: Vec<Value> = Vec::new();
            let mut response_parts: Vec<Value> = Vec::new();

            loop {
                let next = tokio::select! {
                    _ = sink.cancelled() => return Err(TurnAbort::Cancelled),
                    next = stream.next() => next,
                };
                let Some(chunk) = next else { break };
                let chunk = chunk.map_err(TurnAbort::Stream)?;

                if let Some(text) = chunk.text.filter(|t| !t.is_empty()) {
                    turn.accumulated_text.push_str(&text);
                    model_parts.push(json!({ "text": text }));
                    sink.emit(StreamEvent::text(text)).await?;
                }

                for call in chunk.function_calls {
                    let arguments = Value::Object(call.args.clone());
                    sink.emit(StreamEvent::function_call(&call.name, arguments.clone())).await?;
                    turn.function_calls.push(RecordedCall {
                        name: call.name.clone(),
                        arguments,
                    });

                    let result = self.dispatch(manifest, &call, sink).await?;
                    turn.function_responses.push(RecordedResponse {
                        name: call.name.clone(),
                        result: result.clone(),
                    });
                    sink.emit(StreamEvent::function_response(&call.name, result.clone())).await?;

                    response_parts.push(json!({
                        "functionResponse": { "name": call.name, "response": as_response_object(result) }
                    }));
                    model_parts.push(call.raw_part);
                }
            }

            if response_parts.is_empty() {
                return Ok(());
            }
            tracing::debug!(turn_id = %turn.id, round, calls = response_parts.len(), "bridge: feeding tool results back");
            contents.push(Content {
                role: "model".into(),
                parts: model_parts,
            });
            contents.push(Content {
                role: "user".into(),
                parts: response_parts,
            });
        }

        tracing::warn!(
            turn_id = %turn.id,
            "bridge: stopped after {} tool rounds",
            self.settings.max_tool_rounds
        );
        Ok(())
    }

    /// Invoke the tool on the server that advertised it.
    ///
    /// Failures come back as `{"error": ...}` so the turn continues. The call
    /// runs on its own task: if the client leaves, it still completes but its
    /// result is dropped.
    async fn dispatch(&self, manifest: &ToolManifest, call: &FunctionCall, sink: &EventSink) -> Result<Value, TurnAbort> {
        let Some(entry) = manifest.resolve(&call.name) else {
            tracing::warn!(tool = %call.name, "bridge: model called a tool no server offers");
            return Ok(json!({ "error": format!("Unknown tool: {}", call.name) }));
        };

        let gateway = self.gateway.clone();
        let server_id = entry.server_id.clone();
        let tool_name = call.name.clone();
        let args: Map<String, Value> = call.args.clone();
        tracing::debug!(server_id = %server_id, tool = %tool_name, "bridge: dispatching tool call");
        let task = tokio::spawn(async move { gateway.call_tool(&server_id, &tool_name, args).await });

        tokio::select! {
            _ = sink.cancelled() => {
                tracing::debug!(tool = %call.name, "bridge: turn cancelled while tool call in flight, result will be discarded");
                Err(TurnAbort::Cancelled)
            }
            joined = task => Ok(match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::warn!(tool = %call.name, "bridge: tool call failed: {}", e);
                    json!({ "error": e.to_string() })
                }
                Err(e) => {
                    tracing::error!(tool = %call.name, "bridge: tool task aborted: {}", e);
                    json!({ "error": format!("tool call aborted: {}", e) })
                }
            }),
        }
    }
}

/// `functionResponse.response` must be an object.
fn as_response_object(result: Value) -> Value {
    match result {
        Value::Object(_) => result,
        other => json!({ "result": other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_object_results_are_wrapped() {
        assert_eq!(as_response_object(json!("ok")), json!({ "result": "ok" }));
        assert_eq!(as_response_object(json!({ "a": 1 })), json!({ "a": 1 }));
    }

    #[test]
    fn default_settings() {
        let s = BridgeSettings::default();
        assert_eq!(s.history_limit, 10);
        assert_eq!(s.fallback_message, DEFAULT_FALLBACK_MESSAGE);
    }
}
