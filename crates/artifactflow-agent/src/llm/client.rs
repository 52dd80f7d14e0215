//! Anthropic Messages API client with streaming SSE.
//!
//! Implements [`ChatModel`] over the Messages API. Extended-thinking deltas
//! are surfaced as [`StreamChunk::Reasoning`], text deltas as
//! [`StreamChunk::Content`]; usage arrives with `message_start` (input) and
//! `message_delta` (output).

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{AgentError, LlmErrorKind, Result, classify_message};
use crate::llm::types::{ChatMessage, ChatOutcome, ChatRequest, Role, StreamChunk, TokenUsage};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default Anthropic API base URL.
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default maximum tokens per response.
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ---------------------------------------------------------------------------
// ChatModel trait
// ---------------------------------------------------------------------------

/// A chat-completion backend.
///
/// `on_chunk` receives tagged fragments as they arrive; the returned
/// [`ChatOutcome`] is the aggregated result. Tests swap in a scripted mock.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<ChatOutcome>;
}

/// Shared handle to a chat model.
pub type SharedChatModel = Arc<dyn ChatModel>;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Configuration for the Anthropic client.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Model used when the request leaves `model` empty.
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
}

impl AnthropicConfig {
    /// Configuration with the production endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_owned(),
            default_model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// An LLM client for the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicClient {
    config: Arc<AnthropicConfig>,
    http: reqwest::Client,
}

impl AnthropicClient {
    /// Create a new client with the given configuration.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingApiKey {
                provider: "anthropic".into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| {
                AgentError::llm(LlmErrorKind::Other, format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    // -----------------------------------------------------------------------
    // Internal: request building
    // -----------------------------------------------------------------------

    /// Build the JSON body for the Messages API.
    fn build_request_body(&self, request: &ChatRequest) -> Value {
        // Anthropic expects the system prompt as a top-level field.
        let (system_text, messages) = split_system_messages(&request.messages);

        let mut body = json!({
            "model": if request.model.is_empty() {
                &self.config.default_model
            } else {
                &request.model
            },
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages,
            "stream": true,
        });

        if let Some(system) = system_text {
            body["system"] = json!(system);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }

    /// Send the HTTP request to the Messages API endpoint.
    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| {
                AgentError::llm(LlmErrorKind::Auth, format!("invalid API key header: {e}"))
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], "sending LLM request");

        self.http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    LlmErrorKind::Timeout
                } else {
                    LlmErrorKind::Other
                };
                AgentError::llm(kind, e.to_string())
            })
    }

    /// Map a non-success HTTP status + body to a classified error.
    fn status_error(status: reqwest::StatusCode, body: &str) -> AgentError {
        let kind = match status.as_u16() {
            429 => LlmErrorKind::RateLimited,
            401 | 403 => LlmErrorKind::Auth,
            408 | 504 => LlmErrorKind::Timeout,
            _ => classify_message(body),
        };
        AgentError::llm(kind, format!("API returned {status}: {body}"))
    }

    // -----------------------------------------------------------------------
    // Internal: streaming consumption
    // -----------------------------------------------------------------------

    async fn consume_stream(
        &self,
        resp: reqwest::Response,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<ChatOutcome> {
        let mut accumulator = StreamAccumulator::default();
        let mut byte_stream = resp.bytes_stream();

        // Buffer for partial lines that span chunk boundaries.
        let mut line_buffer = String::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result
                .map_err(|e| AgentError::llm(LlmErrorKind::Other, format!("stream read error: {e}")))?;

            let text = std::str::from_utf8(&chunk).map_err(|e| {
                AgentError::llm(LlmErrorKind::Parse, format!("invalid UTF-8 in stream: {e}"))
            })?;

            line_buffer.push_str(text);

            // SSE lines are delimited by `\n`.
            while let Some(newline_pos) = line_buffer.find('\n') {
                let line = line_buffer[..newline_pos].to_owned();
                line_buffer = line_buffer[newline_pos + 1..].to_owned();

                if accumulator.apply_line(line.trim_end(), on_chunk)? {
                    return Ok(accumulator.finish(on_chunk));
                }
            }
        }

        // Stream ended without message_stop; return what we have.
        Ok(accumulator.finish(on_chunk))
    }
}

#[async_trait]
impl ChatModel for AnthropicClient {
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<ChatOutcome> {
        let body = self.build_request_body(request);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &text));
        }

        self.consume_stream(resp, on_chunk).await
    }
}

/// Split system messages out and convert the rest to the Anthropic wire
/// format. Multiple system messages are concatenated.
fn split_system_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => match &mut system {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&msg.content);
                }
                None => system = Some(msg.content.clone()),
            },
            Role::User => wire.push(json!({"role": "user", "content": msg.content})),
            Role::Assistant => wire.push(json!({"role": "assistant", "content": msg.content})),
        }
    }

    (system, wire)
}

// ---------------------------------------------------------------------------
// Stream accumulator
// ---------------------------------------------------------------------------

/// Accumulates SSE data lines into a complete response, forwarding tagged
/// chunks as they arrive.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    reasoning: String,
    usage: TokenUsage,
}

impl StreamAccumulator {
    /// Apply one SSE line. Returns `true` when the message is complete.
    fn apply_line(
        &mut self,
        line: &str,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<bool> {
        // `event:` lines and comments carry no payload we need; the data
        // lines repeat the event type.
        let Some(data) = line.strip_prefix("data: ") else {
            return Ok(false);
        };

        let value: Value = serde_json::from_str(data).map_err(|e| {
            AgentError::llm(LlmErrorKind::Parse, format!("invalid SSE payload: {e}"))
        })?;

        match value["type"].as_str().unwrap_or_default() {
            "message_start" => {
                if let Some(input) = value.pointer("/message/usage/input_tokens") {
                    self.usage.input_tokens = input.as_u64().unwrap_or(0) as u32;
                }
            }
            "content_block_delta" => match value.pointer("/delta/type").and_then(|t| t.as_str()) {
                Some("text_delta") => {
                    if let Some(text) = value.pointer("/delta/text").and_then(|t| t.as_str()) {
                        self.content.push_str(text);
                        on_chunk(StreamChunk::Content(text.to_owned()));
                    }
                }
                Some("thinking_delta") => {
                    if let Some(text) = value.pointer("/delta/thinking").and_then(|t| t.as_str()) {
                        self.reasoning.push_str(text);
                        on_chunk(StreamChunk::Reasoning(text.to_owned()));
                    }
                }
                _ => {}
            },
            "message_delta" => {
                if let Some(output) = value.pointer("/usage/output_tokens") {
                    self.usage.output_tokens = output.as_u64().unwrap_or(0) as u32;
                }
                on_chunk(StreamChunk::Usage(self.usage));
            }
            "message_stop" => return Ok(true),
            "error" => {
                let message = value
                    .pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("stream error");
                return Err(AgentError::llm(classify_message(message), message));
            }
            // ping and content_block_start/stop carry nothing we track.
            _ => {}
        }

        Ok(false)
    }

    fn finish(self, on_chunk: &mut (dyn FnMut(StreamChunk) + Send)) -> ChatOutcome {
        let outcome = ChatOutcome {
            content: self.content,
            reasoning: if self.reasoning.is_empty() {
                None
            } else {
                Some(self.reasoning)
            },
            usage: self.usage,
        };
        on_chunk(StreamChunk::Final(outcome.clone()));
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
