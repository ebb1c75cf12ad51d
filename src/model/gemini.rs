// ---------------------------------------------------------------------------
// model/gemini.rs: Gemini streamGenerateContent provider + SSE parsing
// ---------------------------------------------------------------------------

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::Rng;
use serde_json::{Map, Value, json};

use crate::text::truncate_str;

use super::{Content, FunctionCall, ModelChunk, ModelError, ModelProvider, ModelRequest, ModelStream, ToolDeclaration};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ── Retry with exponential backoff constants ────────────────────────────────
/// Maximum number of retry attempts for transient Gemini API errors (429, 503, timeout).
const GEMINI_MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff (doubles each attempt: 1s, 2s, 4s).
const GEMINI_BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Maximum random jitter added to each backoff delay.
const GEMINI_BACKOFF_JITTER_MS: u64 = 500;
/// Whole-request ceiling; a stream that runs longer is cut off.
const GEMINI_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// JSON-Schema keywords Gemini rejects in function parameters.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties"];

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    max_output_tokens: u32,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            max_output_tokens: 2048,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_generation(mut self, temperature: f64, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn stream_url(&self) -> Result<reqwest::Url, ModelError> {
        let raw = format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, self.model);
        reqwest::Url::parse(&raw).map_err(|e| ModelError::Request(format!("invalid Gemini URL '{}': {}", raw, e)))
    }

    fn build_body(&self, request: &ModelRequest) -> Value {
        let mut body = json!({
            "contents": request.contents,
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
            }
        });
        if !request.tools.is_empty() {
            body["tools"] = json!([{ "functionDeclarations": build_function_declarations(&request.tools) }]);
            body["toolConfig"] = json!({ "functionCallingConfig": { "mode": "AUTO" } });
        }
        body
    }

    /// Send a streaming Gemini API request with retry + exponential backoff.
    /// Returns the successful response, or the last error after all retries are exhausted.
    async fn request_with_retry(&self, url: &reqwest::Url, body: &Value) -> Result<reqwest::Response, ModelError> {
        let mut last_err = String::new();

        for attempt in 0..=GEMINI_MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: base * 2^(attempt-1) + random jitter
                let backoff = GEMINI_BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=GEMINI_BACKOFF_JITTER_MS));
                let delay = backoff + jitter;
                tracing::warn!(
                    "gemini_retry: attempt {}/{} after {:?} backoff",
                    attempt + 1,
                    GEMINI_MAX_RETRIES + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let result = self
                .client
                .post(url.clone())
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .timeout(GEMINI_REQUEST_TIMEOUT)
                .send()
                .await;

            if !is_retryable(&result) {
                return match result {
                    Ok(resp) if resp.status().is_success() => Ok(resp),
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        let err_body = resp.text().await.unwrap_or_default();
                        Err(ModelError::Api {
                            status,
                            body: truncate_str(&err_body, 500),
                        })
                    }
                    Err(e) => Err(ModelError::Request(e.to_string())),
                };
            }

            last_err = match &result {
                Ok(resp) => format!("HTTP {}", resp.status()),
                Err(e) => e.to_string(),
            };
            tracing::warn!("gemini_retry: transient error on attempt {}: {}", attempt + 1, last_err);
        }

        Err(ModelError::RetriesExhausted {
            attempts: GEMINI_MAX_RETRIES + 1,
            last: last_err,
        })
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        let url = self.stream_url()?;
        let body = self.build_body(&request);
        tracing::debug!(
            model = %self.model,
            contents = request.contents.len(),
            tools = request.tools.len(),
            "gemini: opening stream"
        );

        let resp = self.request_with_retry(&url, &body).await?;
        let stream = async_stream::stream! {
            let mut parser = SseParser::new();
            let mut bytes = resp.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(b) => {
                        for item in parser.feed_bytes(&b) {
                            yield item;
                        }
                    }
                    Err(e) => {
                        yield Err(ModelError::Stream(e.to_string()));
                        return;
                    }
                }
            }
            for item in parser.flush() {
                yield item;
            }
        };
        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Whether a reqwest error or HTTP status is a transient failure worth retrying.
fn is_retryable(result: &Result<reqwest::Response, reqwest::Error>) -> bool {
    match result {
        Ok(resp) => {
            let status = resp.status().as_u16();
            status == 429 || status == 503
        }
        Err(e) => e.is_timeout() || e.is_connect(),
    }
}

// ---------------------------------------------------------------------------
// Function declarations
// ---------------------------------------------------------------------------

pub fn build_function_declarations(tools: &[ToolDeclaration]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            let mut parameters = t.parameters.clone();
            sanitize_schema(&mut parameters);
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": parameters,
            })
        })
        .collect()
}

/// Strip schema keywords the function-declaration dialect does not accept,
/// at every nesting level.
pub fn sanitize_schema(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            for key in UNSUPPORTED_SCHEMA_KEYS {
                map.remove(*key);
            }
            for v in map.values_mut() {
                sanitize_schema(v);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize_schema),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// SSE Parser
// ---------------------------------------------------------------------------

struct SseParser {
    buffer: String,
    /// Trailing bytes of a UTF-8 sequence split across network chunks.
    partial: Vec<u8>,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            partial: Vec::new(),
        }
    }

    fn parse_event(json_val: &Value) -> Option<Result<ModelChunk, ModelError>> {
        if let Some(err) = json_val.get("error") {
            let status = err.get("code").and_then(Value::as_u64).unwrap_or(500) as u16;
            let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
            return Some(Err(ModelError::Api {
                status,
                body: message.to_string(),
            }));
        }

        let candidate = json_val.get("candidates").and_then(|c| c.get(0));
        let Some(parts) = candidate
            .and_then(|c0| c0.get("content"))
            .and_then(|ct| ct.get("parts"))
            .and_then(Value::as_array)
        else {
            // Log diagnostic info for chunks that might indicate safety blocks or errors
            if let Some(reason) = json_val
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(Value::as_str)
            {
                tracing::warn!("stream: Gemini blocked request (blockReason={})", reason);
            }
            if let Some(reason) = candidate
                .and_then(|c0| c0.get("finishReason"))
                .and_then(Value::as_str)
                .filter(|r| *r != "STOP")
            {
                tracing::warn!("stream: Gemini chunk has no 'parts' (finishReason={})", reason);
            }
            return None;
        };

        let mut chunk = ModelChunk::default();
        for part in parts {
            if let Some(text) = part["text"].as_str().filter(|t| !t.is_empty()) {
                chunk.text.get_or_insert_with(String::new).push_str(text);
            }
            if let Some(name) = part.get("functionCall").and_then(|fc| fc["name"].as_str()) {
                let args = part["functionCall"]["args"].as_object().cloned().unwrap_or_else(Map::new);
                chunk.function_calls.push(FunctionCall {
                    name: name.to_string(),
                    args,
                    raw_part: part.clone(),
                });
            }
        }
        (!chunk.is_empty()).then_some(Ok(chunk))
    }

    fn parse_block(block: &str, out: &mut Vec<Result<ModelChunk, ModelError>>) {
        for line in block.lines() {
            let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                continue;
            };
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            match serde_json::from_str::<Value>(data) {
                Ok(jv) => out.extend(Self::parse_event(&jv)),
                Err(e) => tracing::warn!("stream: skipping unparseable Gemini SSE data: {}", e),
            }
        }
    }

    fn feed(&mut self, chunk: &str) -> Vec<Result<ModelChunk, ModelError>> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);
            Self::parse_block(&block, &mut events);
        }
        events
    }

    fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<Result<ModelChunk, ModelError>> {
        self.partial.extend_from_slice(bytes);
        let keep_from = match std::str::from_utf8(&self.partial) {
            Ok(_) => self.partial.len(),
            // Incomplete sequence at the end: hold it for the next chunk.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.partial.len(),
        };
        let tail = self.partial.split_off(keep_from);
        let text = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial = tail;
        self.feed(&text)
    }

    fn flush(&mut self) -> Vec<Result<ModelChunk, ModelError>> {
        let mut events = Vec::new();
        if !self.partial.is_empty() {
            let tail = std::mem::take(&mut self.partial);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_block(&rest, &mut events);
        events
    }
}

/// Map chat-UI history roles onto provider roles.
pub fn provider_role(role: &str) -> &'static str {
    match role {
        "model" | "ai" | "assistant" | "bot" => "model",
        _ => "user",
    }
}

/// Convenience for callers assembling history turns.
pub fn history_content(role: &str, text: &str) -> Content {
    Content {
        role: provider_role(role).to_string(),
        parts: vec![json!({ "text": text })],
    }
}
