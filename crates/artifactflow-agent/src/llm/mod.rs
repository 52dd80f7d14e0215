//! LLM client layer.
//!
//! [`client::ChatModel`] is the seam between the agent runtime and concrete
//! providers; [`client::AnthropicClient`] is the production implementation
//! and [`mock::MockChatModel`] the scripted test double.

pub mod client;
pub mod mock;
pub mod types;

pub use client::{AnthropicClient, AnthropicConfig, ChatModel, SharedChatModel};
pub use mock::{MockChatModel, MockReply};
pub use types::{ChatMessage, ChatOutcome, ChatRequest, Role, StreamChunk, TokenUsage};
