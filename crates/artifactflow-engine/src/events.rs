//! Unified event model.
//!
//! Every layer speaks the same envelope: controller-level events
//! (`metadata`, `complete`, `error`), agent-level events (`agent_start`,
//! `llm_chunk`, `llm_complete`, `agent_complete`), and graph-level events
//! (`tool_start`, `tool_complete`, `permission_request`). The SSE layer
//! serializes the envelope's `data` verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution event types, in the order layers produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Controller layer.
    Metadata,
    Complete,
    Error,

    // Agent layer.
    AgentStart,
    LlmChunk,
    LlmComplete,
    AgentComplete,

    // Graph layer.
    ToolStart,
    ToolComplete,
    PermissionRequest,
}

impl EventType {
    /// Wire-format name (SSE `event:` field).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::AgentStart => "agent_start",
            Self::LlmChunk => "llm_chunk",
            Self::LlmComplete => "llm_complete",
            Self::AgentComplete => "agent_complete",
            Self::ToolStart => "tool_start",
            Self::ToolComplete => "tool_complete",
            Self::PermissionRequest => "permission_request",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single execution event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Agent name, for agent- and tool-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Tool name, for tool-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Type-specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Event {
    /// Create an event stamped now.
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            agent: None,
            tool: None,
            data: None,
        }
    }

    /// Attach the producing agent.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Attach the tool name.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Attach the payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------------------------------------------------------------------------
// Execution metrics
// ---------------------------------------------------------------------------

/// Aggregate counters for one run, reported in the `complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Number of LLM invocations.
    pub llm_calls: u32,
    /// Number of tool executions.
    pub tool_calls: u32,
    /// Total prompt tokens across all calls.
    pub input_tokens: u32,
    /// Total generated tokens across all calls.
    pub output_tokens: u32,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration; set by [`ExecutionMetrics::finalize`].
    pub duration_ms: Option<u64>,
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self {
            llm_calls: 0,
            tool_calls: 0,
            input_tokens: 0,
            output_tokens: 0,
            started_at: Utc::now(),
            duration_ms: None,
        }
    }
}

impl ExecutionMetrics {
    /// Record one LLM call's token usage.
    pub fn record_llm_call(&mut self, usage: artifactflow_agent::TokenUsage) {
        self.llm_calls += 1;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
    }

    /// Record one tool execution.
    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    /// Stamp the total duration. Idempotent: the first call wins.
    pub fn finalize(&mut self) {
        if self.duration_ms.is_none() {
            let elapsed = Utc::now().signed_duration_since(self.started_at);
            self.duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
