//! Core types for LLM interaction.
//!
//! Provider-agnostic at this layer; [`super::client`] translates them into
//! the Anthropic wire format. Agents express tool use as XML inside plain
//! text, so the request surface is text-only messages.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user (or a tool result fed back as user text).
    User,
    /// Output from the LLM.
    Assistant,
}

/// A single message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced this message.
    pub role: Role,
    /// The textual content.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests & usage
// ---------------------------------------------------------------------------

/// A full request to send to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier; empty selects the client default.
    pub model: String,
    /// The conversation, system messages included.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum tokens the model may generate.
    pub max_tokens: Option<u32>,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub input_tokens: u32,
    /// Tokens generated.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// A tagged fragment of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// A delta of visible output text.
    Content(String),
    /// A delta of the model's reasoning trace.
    Reasoning(String),
    /// Token usage, reported when the provider knows it.
    Usage(TokenUsage),
    /// The final aggregated response; always the last chunk.
    Final(ChatOutcome),
}

/// The aggregated result of one LLM call.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    /// Full visible output text.
    pub content: String,
    /// Full reasoning trace, when the model emitted one.
    pub reasoning: Option<String>,
    /// Total token usage for the call.
    pub usage: TokenUsage,
}
