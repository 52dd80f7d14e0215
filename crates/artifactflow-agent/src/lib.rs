//! Agent layer for ArtifactFlow.
//!
//! Contains the LLM client seam ([`llm::ChatModel`]), the retry policy, the
//! XML tool-call parser, agent definitions (lead + workers), and the
//! single-turn runtime that the graph drives. Tool execution and routing
//! interpretation live upstream in the engine.

pub mod definition;
pub mod error;
pub mod llm;
pub mod retry;
pub mod runtime;
pub mod xml;

pub use definition::{
    AgentDefinition, AgentRole, ArtifactBrief, LEAD_AGENT, PromptContext, WorkerProfile,
    crawl_agent, default_worker_profiles, lead_agent, search_agent,
};
pub use error::{AgentError, LlmErrorKind, Result};
pub use llm::{
    AnthropicClient, AnthropicConfig, ChatMessage, ChatModel, ChatOutcome, ChatRequest,
    MockChatModel, MockReply, Role, SharedChatModel, StreamChunk, TokenUsage,
};
pub use retry::{RetryPolicy, call_with_retry};
pub use runtime::{
    AgentEvent, AgentTurnResponse, PendingToolResult, Routing, TurnInput, render_tool_result,
    run_turn,
};
pub use xml::{ParsedToolCall, parse_tool_call};
