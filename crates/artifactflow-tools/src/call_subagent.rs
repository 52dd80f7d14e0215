//! The `call_subagent` routing pseudo-tool.
//!
//! This tool has no runtime side effect. Its `execute` only validates the
//! parameters and echoes them back as routing data; the graph inspects the
//! parsed call to redirect control to the target worker and must never run
//! it in the tool-execution step.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::base::{Tool, ToolParameter, ToolResult};

/// Name of the routing pseudo-tool, checked by the graph.
pub const CALL_SUBAGENT: &str = "call_subagent";

/// Routing pseudo-tool for delegating work to a specialized worker agent.
pub struct CallSubagentTool {
    /// Worker names that may be targeted.
    valid_targets: Vec<String>,
}

impl CallSubagentTool {
    /// Create the tool with the set of registered worker names.
    pub fn new(valid_targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            valid_targets: valid_targets.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Tool for CallSubagentTool {
    fn name(&self) -> &str {
        CALL_SUBAGENT
    }

    fn description(&self) -> &str {
        "Delegate a specific task to a specialized sub-agent. Provide a clear, \
         detailed instruction; the sub-agent's findings are returned to you as \
         the tool result."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required(
                "agent_type",
                "string",
                "Name of the sub-agent to call (one of the registered workers)",
            ),
            ToolParameter::required(
                "instruction",
                "string",
                "Specific task instruction for the sub-agent",
            ),
        ]
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let agent_type = params["agent_type"].as_str().unwrap_or_default();
        let instruction = params["instruction"].as_str().unwrap_or_default().trim();

        if !self.valid_targets.iter().any(|t| t == agent_type) {
            return ToolResult::err(format!(
                "Invalid agent_type '{agent_type}'. Must be one of: {}",
                self.valid_targets.join(", ")
            ));
        }
        if instruction.is_empty() {
            return ToolResult::err("instruction parameter cannot be empty");
        }

        debug!(target = %agent_type, "subagent routing request validated");

        ToolResult::ok(json!({
            "agent_type": agent_type,
            "instruction": instruction,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
