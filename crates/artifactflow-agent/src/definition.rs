//! Agent definitions.
//!
//! An agent is a plain record (name, model settings, toolkit, and a role)
//! rather than a class hierarchy. The role tag selects the prompt shape:
//! the lead plans and delegates, workers execute one focused mission.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use artifactflow_tools::{Toolkit, generate_tool_instruction};

use crate::retry::RetryPolicy;

/// Name of the distinguished coordinator agent.
pub const LEAD_AGENT: &str = "lead_agent";

// ---------------------------------------------------------------------------
// Roles & context
// ---------------------------------------------------------------------------

/// What the lead knows about a registered worker, for its system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

/// The role an agent plays in the graph.
#[derive(Debug, Clone)]
pub enum AgentRole {
    /// The coordinator: plans, delegates to workers, integrates results.
    Lead {
        /// Workers the lead may delegate to via `call_subagent`.
        workers: Vec<WorkerProfile>,
    },
    /// A specialized worker with one mission.
    Worker {
        /// Mission text injected into the worker's system prompt.
        mission: String,
    },
}

/// Artifact metadata surfaced in the lead's system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBrief {
    pub id: String,
    pub content_type: String,
    pub title: String,
    pub version: i64,
    /// Truncated content preview.
    pub preview: String,
}

/// Dynamic context assembled by the engine before each turn.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// Current artifacts in the session (previews only).
    pub artifacts: Vec<ArtifactBrief>,
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// A complete agent definition.
#[derive(Clone)]
pub struct AgentDefinition {
    /// Unique agent name (graph node name).
    pub name: String,
    /// Short description, shown to the lead for workers.
    pub description: String,
    /// Model identifier; empty selects the client default.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum consecutive tool rounds before a final answer is forced.
    pub max_tool_rounds: u32,
    /// Role-specific prompt shape.
    pub role: AgentRole,
    /// Tools available to this agent.
    pub toolkit: Option<Toolkit>,
    /// LLM retry configuration.
    pub retry: RetryPolicy,
}

impl AgentDefinition {
    /// Whether this agent is the lead.
    pub fn is_lead(&self) -> bool {
        matches!(self.role, AgentRole::Lead { .. })
    }

    /// Build the full system prompt for one turn.
    ///
    /// `include_tools` is false on a forced final turn: the tool
    /// instruction block is withheld and a closing notice appended so the
    /// model cannot route again.
    pub fn build_system_prompt(&self, context: &PromptContext, include_tools: bool) -> String {
        let mut prompt = match &self.role {
            AgentRole::Lead { workers } => self.lead_prompt(workers, context),
            AgentRole::Worker { mission } => self.worker_prompt(mission, context),
        };

        if include_tools {
            if let Some(ref toolkit) = self.toolkit {
                let instruction = generate_tool_instruction(toolkit);
                if !instruction.is_empty() {
                    prompt.push_str("\n\n");
                    prompt.push_str(&instruction);
                }
            }
        } else {
            prompt.push_str(
                "\n\n<final_answer_notice>\nYou have used all available tool rounds. \
                 Respond with your final answer now; do not emit any tool call.\n\
                 </final_answer_notice>",
            );
        }

        prompt
    }

    fn lead_prompt(&self, workers: &[WorkerProfile], context: &PromptContext) -> String {
        let current_time = Utc::now().format("%Y/%m/%d %H:%M:%S %a");

        let mut prompt = format!(
            r#"<system_time>IMPORTANT: Current time is "{current_time}"</system_time>

<agent_role>
You are {name}, the lead agent coordinating a multi-agent research system.

## Your Role

1. **Task Planning**: Analyze requests and create structured task plans
2. **Coordination**: Delegate specific tasks to specialized sub-agents
3. **Integration**: Synthesize findings into coherent result artifacts
4. **Quality Control**: Know when the task is done; avoid over-processing
</agent_role>

<task_planning_strategy>
Choose your approach by complexity:
- Simple question → answer directly, no artifacts
- Moderate task → optionally track progress in a task plan
- Complex investigation → create the task plan first, then execute it step
  by step, updating status after each sub-agent call
</task_planning_strategy>

<artifact_management>
Use the exact id "task_plan" for the task plan artifact; it is cleared at
the start of every new user turn. Result artifacts keep descriptive ids
("research_report", "analysis.py", ...) and survive across turns. Create
early, update often; prefer update_artifact for small changes and
rewrite_artifact for restructuring.
</artifact_management>"#,
            name = self.name,
        );

        if workers.is_empty() {
            prompt.push_str("\n\n<note>No sub-agents are registered. Work independently.</note>");
        } else {
            prompt.push_str("\n\n<available_subagents>\nDelegate with the call_subagent tool:\n\n");
            for worker in workers {
                prompt.push_str(&format!("### {}\n- {}\n", worker.name, worker.description));
                for capability in &worker.capabilities {
                    prompt.push_str(&format!("  - {capability}\n"));
                }
                prompt.push('\n');
            }
            prompt.push_str(
                "Give each sub-agent one clear, specific instruction and fold its \
                 findings into your artifacts.\n</available_subagents>",
            );
        }

        if !context.artifacts.is_empty() {
            prompt.push_str(&format!(
                "\n\n<artifacts_inventory count=\"{}\">\n\
                 Previews only; use read_artifact for full content. Update \
                 existing artifacts instead of creating duplicates.\n\n",
                context.artifacts.len()
            ));
            for artifact in &context.artifacts {
                prompt.push_str(&format!(
                    "<artifact id=\"{}\" content_type=\"{}\" title=\"{}\" version=\"{}\">\n{}\n</artifact>\n",
                    artifact.id, artifact.content_type, artifact.title, artifact.version, artifact.preview
                ));
            }
            prompt.push_str("</artifacts_inventory>");
        }

        prompt
    }

    fn worker_prompt(&self, mission: &str, context: &PromptContext) -> String {
        let current_time = Utc::now().format("%Y/%m/%d %H:%M:%S %a");

        let mut prompt = format!(
            r#"<system_time>IMPORTANT: Current time is "{current_time}"</system_time>

<agent_role>
You are {name}, {description}.

## Team Context

You are part of a multi-agent research team. The lead agent coordinates
overall strategy; you focus on your mission and report findings back.
</agent_role>

{mission}"#,
            name = self.name,
            description = self.description,
        );

        // Workers see the shared task plan for context, nothing else.
        if let Some(task_plan) = context.artifacts.iter().find(|a| a.id == "task_plan") {
            prompt.push_str(&format!(
                "\n\n<team_task_plan>\n<artifact id=\"task_plan\" content_type=\"{}\">\n{}\n</artifact>\n</team_task_plan>",
                task_plan.content_type, task_plan.preview
            ));
        }

        prompt
    }

    /// Shape the final content before it leaves the agent.
    pub fn format_final_response(&self, content: &str) -> String {
        match self.role {
            AgentRole::Lead { .. } => content.to_string(),
            AgentRole::Worker { .. } => content.trim().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// The coordinator.
pub fn lead_agent(
    model: impl Into<String>,
    toolkit: Toolkit,
    workers: Vec<WorkerProfile>,
) -> AgentDefinition {
    AgentDefinition {
        name: LEAD_AGENT.into(),
        description: "Task coordinator and information integrator".into(),
        model: model.into(),
        temperature: 0.7,
        max_tool_rounds: 5,
        role: AgentRole::Lead { workers },
        toolkit: Some(toolkit),
        retry: RetryPolicy::default(),
    }
}

/// Web search specialist.
pub fn search_agent(model: impl Into<String>, toolkit: Toolkit) -> AgentDefinition {
    AgentDefinition {
        name: "search_agent".into(),
        description: "a web search and information retrieval specialist".into(),
        model: model.into(),
        temperature: 0.5,
        max_tool_rounds: 3,
        role: AgentRole::Worker {
            mission: r#"<mission>
Execute targeted web searches and return relevant, high-quality findings.

- Start broad to map the landscape, then refine queries (2-6 words each)
- Assess relevance, credibility, and recency before including a source
- Stop searching once you have sufficient coverage

Return findings as:
<search_results>
  <result>
    <title>Page Title</title>
    <url>https://...</url>
    <content>Comprehensive, contextually relevant content</content>
  </result>
</search_results>
</mission>"#
                .into(),
        },
        toolkit: Some(toolkit),
        retry: RetryPolicy::default(),
    }
}

/// Web content extraction specialist.
pub fn crawl_agent(model: impl Into<String>, toolkit: Toolkit) -> AgentDefinition {
    AgentDefinition {
        name: "crawl_agent".into(),
        description: "a web content extraction specialist".into(),
        model: model.into(),
        temperature: 0.5,
        max_tool_rounds: 3,
        role: AgentRole::Worker {
            mission: r#"<mission>
Fetch the URLs you are instructed to crawl and distill their content.

- Your instruction must include concrete URLs; ask for none, invent none
- Extract the substantive content, dropping navigation and boilerplate
- Preserve facts, figures, and quotes close to the original text

Return findings as:
<extracted_content>
  <page>
    <url>https://...</url>
    <content>Distilled page content</content>
  </page>
</extracted_content>
</mission>"#
                .into(),
        },
        toolkit: Some(toolkit),
        retry: RetryPolicy::default(),
    }
}

/// Worker profiles advertised to the lead, matching the standard team.
pub fn default_worker_profiles() -> Vec<WorkerProfile> {
    vec![
        WorkerProfile {
            name: "search_agent".into(),
            description: "Web search specialist".into(),
            capabilities: vec!["Web search".into(), "Information retrieval".into()],
        },
        WorkerProfile {
            name: "crawl_agent".into(),
            description: "Web content extraction specialist".into(),
            capabilities: vec![
                "Deep content extraction".into(),
                "Web scraping".into(),
                "IMPORTANT: Instructions must include a specific URL to crawl".into(),
            ],
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
