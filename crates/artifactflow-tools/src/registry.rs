//! Tool registry and per-agent toolkits.
//!
//! The registry owns every tool behind `Arc<dyn Tool>`; toolkits are
//! immutable slices of the registry handed to one agent. Tools never
//! reference back into agents, so ownership stays acyclic.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::base::{Tool, ToolPermission, ToolResult};

/// Errors raised while assembling toolkits.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A toolkit asked for a tool that is not registered.
    #[error("tool not registered: {0}")]
    UnknownTool(String),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Flat name→tool map, populated during startup and read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A repeated name replaces the previous entry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "tool already registered, overwriting");
        }
        debug!(tool = %name, permission = %tool.permission(), "registered tool");
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Names of all registered tools.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build an immutable toolkit for one agent from the named tools.
    pub fn toolkit(&self, agent_name: &str, tool_names: &[&str]) -> Result<Toolkit, RegistryError> {
        let mut tools = Vec::with_capacity(tool_names.len());
        for name in tool_names {
            let tool = self
                .get(name)
                .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;
            tools.push(tool);
        }
        debug!(agent = %agent_name, tools = tools.len(), "toolkit created");
        Ok(Toolkit {
            agent_name: agent_name.to_string(),
            tools: Arc::new(tools),
        })
    }
}

// ---------------------------------------------------------------------------
// Toolkit
// ---------------------------------------------------------------------------

/// An immutable view of a subset of registry tools, bound to one agent.
#[derive(Clone)]
pub struct Toolkit {
    agent_name: String,
    tools: Arc<Vec<Arc<dyn Tool>>>,
}

impl Toolkit {
    /// The agent this toolkit belongs to.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// The tools in declaration order.
    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Whether the toolkit is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool through this toolkit.
    ///
    /// Restricted tools fail closed here; `confirm` gating is the graph's
    /// responsibility (it only calls execute once the user has approved).
    pub async fn execute(&self, name: &str, params: Value) -> ToolResult {
        let tool = match self.get(name) {
            Some(t) => t,
            None => {
                return ToolResult::err(format!(
                    "Tool '{name}' is not available to agent '{}'",
                    self.agent_name
                ));
            }
        };

        if tool.permission() == ToolPermission::Restricted {
            return ToolResult::err(format!("Tool '{name}' requires special authorization"));
        }

        tool.call(params).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ToolParameter;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticTool {
        name: &'static str,
        permission: ToolPermission,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "static test tool"
        }

        fn permission(&self) -> ToolPermission {
            self.permission
        }

        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }

        async fn execute(&self, _params: Value) -> ToolResult {
            ToolResult::ok(json!({"ran": self.name}))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool {
            name: "alpha",
            permission: ToolPermission::Public,
        }));
        registry.register(Arc::new(StaticTool {
            name: "locked",
            permission: ToolPermission::Restricted,
        }));
        registry
    }

    #[test]
    fn toolkit_is_a_subset() {
        let registry = registry();
        let toolkit = registry.toolkit("agent", &["alpha"]).unwrap();
        assert!(toolkit.get("alpha").is_some());
        assert!(toolkit.get("locked").is_none());
    }

    #[test]
    fn toolkit_unknown_tool_errors() {
        let registry = registry();
        let err = registry.toolkit("agent", &["missing"]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn execute_runs_public_tool() {
        let registry = registry();
        let toolkit = registry.toolkit("agent", &["alpha"]).unwrap();
        let result = toolkit.execute("alpha", json!({})).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn restricted_tool_fails_closed() {
        let registry = registry();
        let toolkit = registry.toolkit("agent", &["locked"]).unwrap();
        let result = toolkit.execute("locked", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("authorization"));
    }

    #[tokio::test]
    async fn tool_outside_toolkit_is_unavailable() {
        let registry = registry();
        let toolkit = registry.toolkit("agent", &["alpha"]).unwrap();
        let result = toolkit.execute("locked2", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not available"));
    }
}
