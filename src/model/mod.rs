//! LLM provider seam.
//!
//! The bridge only needs a stream of chunks, each carrying an optional text
//! fragment and zero or more function calls. [`ModelProvider`] hides the
//! provider's wire format behind that shape.

pub mod gemini;

pub use gemini::GeminiProvider;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// One conversation entry in provider form: `role` is `user` or `model`,
/// `parts` are provider-native part objects (`text`, `functionCall`,
/// `functionResponse`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Value>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            parts: vec![json!({ "text": text.into() })],
        }
    }
}

/// A tool offered to the model for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub contents: Vec<Content>,
    /// Empty means the request is sent without tool calling.
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Map<String, Value>,
    /// The part exactly as the provider sent it; echoed back on the next round.
    pub raw_part: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelChunk {
    pub text: Option<String>,
    pub function_calls: Vec<FunctionCall>,
}

impl ModelChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            function_calls: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(str::is_empty) && self.function_calls.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("model stream failed: {0}")]
    Stream(String),

    #[error("model API failed after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

pub type ModelStream = BoxStream<'static, Result<ModelChunk, ModelError>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Open a streaming completion. Errors before the first byte come back
    /// here; errors mid-stream arrive as `Err` items.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError>;

    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chunk_detection() {
        assert!(ModelChunk::default().is_empty());
        assert!(ModelChunk::text("").is_empty());
        assert!(!ModelChunk::text("hi").is_empty());
    }

    #[test]
    fn user_text_content_has_user_role() {
        let c = Content::user_text("2+2?");
        assert_eq!(c.role, "user");
        assert_eq!(c.parts[0]["text"], "2+2?");
    }
}
