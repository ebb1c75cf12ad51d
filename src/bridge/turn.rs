//! The record one chat turn accumulates while it streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Streaming => "streaming",
            TurnStatus::Completed => "completed",
            TurnStatus::Failed => "failed",
            TurnStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorTurn {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub name: String,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub id: Uuid,
    pub user_text: String,
    pub prior_turns: Vec<PriorTurn>,
    pub accumulated_text: String,
    pub function_calls: Vec<RecordedCall>,
    pub function_responses: Vec<RecordedResponse>,
    pub status: TurnStatus,
    /// Set when the turn failed.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ConversationTurn {
    /// Start a turn, keeping only the most recent `history_limit` prior turns.
    pub fn new(user_text: impl Into<String>, mut prior_turns: Vec<PriorTurn>, history_limit: usize) -> Self {
        if prior_turns.len() > history_limit {
            prior_turns.drain(..prior_turns.len() - history_limit);
        }
        Self {
            id: Uuid::new_v4(),
            user_text: user_text.into(),
            prior_turns,
            accumulated_text: String::new(),
            function_calls: Vec::new(),
            function_responses: Vec::new(),
            status: TurnStatus::Streaming,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self, status: TurnStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.finish(TurnStatus::Failed);
    }
}
