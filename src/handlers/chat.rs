// ---------------------------------------------------------------------------
// handlers/chat.rs: Streaming chat endpoint (SSE)
// ---------------------------------------------------------------------------

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::bridge::{EventSink, PriorTurn, TurnInput};
use crate::state::AppState;

use super::ApiError;

/// Buffered events between the bridge and a slow client.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct HistoryPart {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<HistoryPart>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default = "default_enable_mcp", rename = "enableMCP", alias = "enableMcp")]
    pub enable_mcp: bool,
}

fn default_enable_mcp() -> bool {
    true
}

impl ChatRequest {
    fn into_turn_input(self) -> TurnInput {
        let prior_turns = self
            .history
            .into_iter()
            .map(|m| PriorTurn {
                role: m.role,
                text: m.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("\n"),
            })
            .filter(|p| !p.text.is_empty())
            .collect();
        TurnInput {
            user_text: self.message,
            prior_turns,
            tools_enabled: self.enable_mcp,
        }
    }
}

/// POST /api/chat/stream
///
/// Responds with `data: <event json>` lines ending in `data: [DONE]`. The turn
/// runs on its own task; dropping the response (client disconnect) closes the
/// channel, which the bridge observes as cancellation.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message is required".into()));
    }

    let input = req.into_turn_input();
    tracing::debug!(
        history = input.prior_turns.len(),
        tools_enabled = input.tools_enabled,
        "chat: stream requested"
    );

    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let bridge = state.bridge.clone();
    tokio::spawn(async move {
        bridge.run(input, sink).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok(Event::default().data(event.to_data())));
    Ok(Sse::new(stream))
}
