//! Transient per-run state.
//!
//! [`RunState`] is owned by the executing task. It never touches disk:
//! interrupted runs are parked in memory by the controller, and the only
//! durable traces of a run are message responses and artifact mutations.

use std::collections::HashMap;

use serde_json::Value;

use artifactflow_agent::ChatMessage;
use artifactflow_tools::{ToolPermission, ToolResult};

use crate::events::ExecutionMetrics;

/// Where the graph is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The lead agent runs next (or a tool result is headed back to it).
    LeadExecuting,
    /// A worker agent runs next.
    SubagentExecuting,
    /// Suspended on a `confirm`-level tool, awaiting the user's decision.
    WaitingPermission,
    /// Terminal.
    Completed,
}

/// A tool invocation ready to execute (permission already cleared).
#[derive(Debug, Clone)]
pub struct PendingTool {
    /// The agent that requested the tool.
    pub from_agent: String,
    pub tool_name: String,
    pub params: Value,
}

/// A tool invocation suspended on user confirmation.
#[derive(Debug, Clone)]
pub struct PendingPermission {
    /// The agent that requested the tool.
    pub from_agent: String,
    pub tool_name: String,
    pub params: Value,
    pub permission_level: ToolPermission,
}

/// A tool result on its way back to the agent that requested it.
#[derive(Debug, Clone)]
pub struct DeliveredToolResult {
    /// The agent the result is addressed to.
    pub to_agent: String,
    pub tool_name: String,
    pub result: ToolResult,
}

/// Per-agent working memory for one run.
#[derive(Debug, Clone, Default)]
pub struct AgentMemory {
    /// The agent's assistant/tool-result exchange this run.
    pub tool_interactions: Vec<ChatMessage>,
    /// Consecutive tool rounds used, bounded by the agent's
    /// `max_tool_rounds`.
    pub tool_rounds: u32,
}

/// The complete transient state of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: String,
    pub conversation_id: String,
    pub message_id: String,
    /// The user task driving this run.
    pub current_task: String,
    /// Compressed prior conversation, ready for LLM context.
    pub conversation_history: Vec<ChatMessage>,
    pub phase: Phase,
    /// The agent the next step targets.
    pub current_agent: String,
    /// Instruction carried to a worker on subagent routing.
    pub subagent_instruction: Option<String>,
    /// Tool cleared for execution before the next agent step.
    pub pending_tool: Option<PendingTool>,
    /// Tool suspended on user confirmation.
    pub pending_permission: Option<PendingPermission>,
    /// Tool result awaiting delivery to its agent.
    pub delivered_result: Option<DeliveredToolResult>,
    /// The lead's final answer, set when the run completes.
    pub final_response: Option<String>,
    /// Per-agent working memory.
    pub memories: HashMap<String, AgentMemory>,
    pub metrics: ExecutionMetrics,
    /// Total graph steps taken, bounded by the graph's step cap.
    pub steps: u32,
}

impl RunState {
    /// Initial state for a new run, entering at the lead agent.
    pub fn new(
        run_id: impl Into<String>,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        task: impl Into<String>,
        conversation_history: Vec<ChatMessage>,
        lead_agent: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            current_task: task.into(),
            conversation_history,
            phase: Phase::LeadExecuting,
            current_agent: lead_agent.into(),
            subagent_instruction: None,
            pending_tool: None,
            pending_permission: None,
            delivered_result: None,
            final_response: None,
            memories: HashMap::new(),
            metrics: ExecutionMetrics::default(),
            steps: 0,
        }
    }

    /// Mutable working memory for an agent, created on first use.
    pub fn memory_mut(&mut self, agent: &str) -> &mut AgentMemory {
        self.memories.entry(agent.to_string()).or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_enters_at_lead() {
        let state = RunState::new("r1", "c1", "m1", "do the thing", Vec::new(), "lead_agent");
        assert_eq!(state.phase, Phase::LeadExecuting);
        assert_eq!(state.current_agent, "lead_agent");
        assert_eq!(state.steps, 0);
        assert!(state.final_response.is_none());
    }

    #[test]
    fn memory_is_created_on_first_use() {
        let mut state = RunState::new("r1", "c1", "m1", "t", Vec::new(), "lead_agent");
        assert!(state.memories.is_empty());

        state.memory_mut("search_agent").tool_rounds += 1;
        assert_eq!(state.memories["search_agent"].tool_rounds, 1);

        // Same entry on repeat access.
        state.memory_mut("search_agent").tool_rounds += 1;
        assert_eq!(state.memories["search_agent"].tool_rounds, 2);
    }
}
