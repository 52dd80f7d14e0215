//! The agent graph state machine.
//!
//! A fixed graph: one lead node, one node per worker, one permission node.
//! `RunState.phase` plus `current_agent` drive the routing table:
//!
//! | Phase after node       | Next                        |
//! |------------------------|-----------------------------|
//! | `WaitingPermission`    | permission node (suspend)   |
//! | `SubagentExecuting`    | the routed worker           |
//! | `LeadExecuting`        | lead                        |
//! | `Completed`            | terminal                    |
//!
//! Suspension is plain control flow: when a `confirm`-level tool is
//! requested the driver emits `permission_request` and returns the run
//! state to its caller, which parks it until a resume call delivers the
//! approval exactly once. No new LLM calls happen in between.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info, warn};

use artifactflow_agent::{
    AgentDefinition, AgentEvent, ArtifactBrief, ChatMessage, ChatModel, PendingToolResult,
    PromptContext, Routing, TurnInput, render_tool_result, run_turn,
};
use artifactflow_store::ArtifactStore;
use artifactflow_tools::{CALL_SUBAGENT, ToolPermission, ToolResult};

use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventType};
use crate::state::{DeliveredToolResult, PendingPermission, PendingTool, Phase, RunState};

/// Default total-step cap, distinct from per-agent `max_tool_rounds`.
const DEFAULT_MAX_STEPS: u32 = 100;

/// Sink for events produced while the graph runs.
pub type EventSink<'a> = &'a mut (dyn FnMut(Event) + Send);

/// How a drive of the graph ended.
#[derive(Debug)]
pub enum GraphOutcome {
    /// The run reached `Completed`; `final_response` is set.
    Finished(Box<RunState>),
    /// The run suspended on a permission interrupt; the state must be
    /// parked and resumed with the user's decision.
    Interrupted(Box<RunState>),
}

/// The compiled graph: agent definitions plus the artifact store used to
/// build prompt context.
pub struct Graph {
    agents: HashMap<String, AgentDefinition>,
    lead_name: String,
    artifacts: Option<ArtifactStore>,
    max_steps: u32,
}

impl Graph {
    /// Build a graph from agent definitions. Exactly one lead is required.
    pub fn new(
        agents: Vec<AgentDefinition>,
        artifacts: Option<ArtifactStore>,
    ) -> EngineResult<Self> {
        let leads: Vec<&AgentDefinition> = agents.iter().filter(|a| a.is_lead()).collect();
        if leads.len() != 1 {
            return Err(EngineError::NoLeadAgent);
        }
        let lead_name = leads[0].name.clone();

        Ok(Self {
            agents: agents.into_iter().map(|a| (a.name.clone(), a)).collect(),
            lead_name,
            artifacts,
            max_steps: DEFAULT_MAX_STEPS,
        })
    }

    /// Override the total-step cap.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// The lead agent's node name (graph entry point).
    pub fn lead_name(&self) -> &str {
        &self.lead_name
    }

    /// Drive a fresh run until it finishes or suspends.
    pub async fn run(
        &self,
        state: RunState,
        model: &dyn ChatModel,
        emit: EventSink<'_>,
    ) -> EngineResult<GraphOutcome> {
        self.drive(state, model, emit).await
    }

    /// Resume a suspended run with the user's permission decision.
    ///
    /// The decision is consumed exactly once: approved executes the pending
    /// tool, denied synthesizes a "Permission denied by user" result.
    /// Either way control returns to the agent that requested the tool.
    pub async fn resume(
        &self,
        mut state: RunState,
        approved: bool,
        model: &dyn ChatModel,
        emit: EventSink<'_>,
    ) -> EngineResult<GraphOutcome> {
        if state.phase != Phase::WaitingPermission {
            return Err(EngineError::InvalidResume {
                run_id: state.run_id.clone(),
                reason: "run is not waiting for permission".into(),
            });
        }
        let pending = state.pending_permission.take().ok_or_else(|| {
            EngineError::InvalidResume {
                run_id: state.run_id.clone(),
                reason: "no pending permission recorded".into(),
            }
        })?;

        info!(
            run_id = %state.run_id,
            tool = %pending.tool_name,
            approved,
            "resuming after permission decision"
        );

        let result = if approved {
            self.execute_tool(
                &mut state,
                &PendingTool {
                    from_agent: pending.from_agent.clone(),
                    tool_name: pending.tool_name.clone(),
                    params: pending.params.clone(),
                },
                emit,
            )
            .await
        } else {
            let result = ToolResult::err("Permission denied by user");
            emit(
                Event::new(EventType::ToolComplete)
                    .with_agent(pending.from_agent.clone())
                    .with_tool(pending.tool_name.clone())
                    .with_data(json!({
                        "success": false,
                        "duration_ms": 0,
                        "error": "Permission denied by user",
                    })),
            );
            result
        };

        self.return_result_to_agent(&mut state, &pending.from_agent, &pending.tool_name, result);
        self.drive(state, model, emit).await
    }

    // -----------------------------------------------------------------------
    // Driver loop
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        mut state: RunState,
        model: &dyn ChatModel,
        emit: EventSink<'_>,
    ) -> EngineResult<GraphOutcome> {
        loop {
            match state.phase {
                Phase::Completed => {
                    debug!(run_id = %state.run_id, steps = state.steps, "graph finished");
                    return Ok(GraphOutcome::Finished(Box::new(state)));
                }
                Phase::WaitingPermission => {
                    let pending = state.pending_permission.as_ref().ok_or_else(|| {
                        EngineError::Internal("waiting for permission without a request".into())
                    })?;
                    emit(
                        Event::new(EventType::PermissionRequest)
                            .with_agent(pending.from_agent.clone())
                            .with_tool(pending.tool_name.clone())
                            .with_data(json!({
                                "params": pending.params,
                                "permission_level": pending.permission_level.as_str(),
                            })),
                    );
                    info!(
                        run_id = %state.run_id,
                        tool = %pending.tool_name,
                        "graph suspended on permission request"
                    );
                    return Ok(GraphOutcome::Interrupted(Box::new(state)));
                }
                Phase::LeadExecuting | Phase::SubagentExecuting => {
                    state.steps += 1;
                    if state.steps > self.max_steps {
                        return Err(EngineError::StepLimitExceeded(self.max_steps));
                    }

                    // A cleared tool executes before the agent re-enters.
                    if let Some(tool) = state.pending_tool.take() {
                        let result = self.execute_tool(&mut state, &tool, emit).await;
                        self.return_result_to_agent(
                            &mut state,
                            &tool.from_agent,
                            &tool.tool_name,
                            result,
                        );
                        continue;
                    }

                    self.run_agent_node(&mut state, model, emit).await?;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Agent node
    // -----------------------------------------------------------------------

    async fn run_agent_node(
        &self,
        state: &mut RunState,
        model: &dyn ChatModel,
        emit: EventSink<'_>,
    ) -> EngineResult<()> {
        let agent_name = state.current_agent.clone();
        let agent = self
            .agents
            .get(&agent_name)
            .ok_or_else(|| EngineError::UnknownAgent(agent_name.clone()))?;

        debug!(run_id = %state.run_id, agent = %agent_name, step = state.steps, "entering agent node");

        // Deliver a pending tool result if it is addressed to this agent.
        let pending_result = match state.delivered_result.take() {
            Some(delivered) if delivered.to_agent == agent_name => Some(delivered),
            Some(other) => {
                // Misrouted result; put it back rather than lose it.
                state.delivered_result = Some(other);
                None
            }
            None => None,
        };

        let instruction = if agent.is_lead() {
            state.current_task.clone()
        } else {
            state.subagent_instruction.clone().unwrap_or_default()
        };

        let memory = state.memory_mut(&agent_name);
        let forced_final = memory.tool_rounds >= agent.max_tool_rounds;
        let tool_interactions = memory.tool_interactions.clone();

        // Only the lead sees prior conversation turns; workers get just
        // their instruction and the shared task plan.
        let history = if agent.is_lead() {
            state.conversation_history.clone()
        } else {
            Vec::new()
        };

        let input = TurnInput {
            instruction,
            history,
            tool_interactions,
            pending_tool_result: pending_result.as_ref().map(|d| PendingToolResult {
                tool_name: d.tool_name.clone(),
                result: d.result.clone(),
            }),
            forced_final,
            context: self.prompt_context(&state.conversation_id).await,
        };

        // Wrap runtime events into the wire envelope as they stream out.
        let response = {
            let name = agent_name.clone();
            let mut forward = |event: AgentEvent| {
                let wrapped = match event {
                    AgentEvent::Start => Event::new(EventType::AgentStart).with_agent(name.clone()),
                    AgentEvent::LlmChunk { content, reasoning } => {
                        let mut data = serde_json::Map::new();
                        if let Some(c) = content {
                            data.insert("content".into(), json!(c));
                        }
                        if let Some(r) = reasoning {
                            data.insert("reasoning_content".into(), json!(r));
                        }
                        Event::new(EventType::LlmChunk)
                            .with_agent(name.clone())
                            .with_data(serde_json::Value::Object(data))
                    }
                    AgentEvent::LlmComplete { usage } => Event::new(EventType::LlmComplete)
                        .with_agent(name.clone())
                        .with_data(json!({ "token_usage": usage })),
                    AgentEvent::Complete { ref response } => Event::new(EventType::AgentComplete)
                        .with_agent(name.clone())
                        .with_data(json!({ "content": response.content })),
                };
                emit(wrapped);
            };

            run_turn(model, agent, &input, &mut forward).await?
        };

        state.metrics.record_llm_call(response.usage);
        self.merge_response(state, agent, pending_result, response);

        Ok(())
    }

    /// Merge an agent's turn response into the run state: record the
    /// exchange in its memory and translate routing into the next phase.
    fn merge_response(
        &self,
        state: &mut RunState,
        agent: &AgentDefinition,
        delivered: Option<DeliveredToolResult>,
        response: artifactflow_agent::AgentTurnResponse,
    ) {
        let agent_name = agent.name.clone();
        let is_lead = agent.is_lead();

        // The delivered tool result and the new assistant content both
        // become part of the agent's working memory.
        {
            let memory = state.memory_mut(&agent_name);
            if let Some(ref d) = delivered {
                memory
                    .tool_interactions
                    .push(ChatMessage::user(render_tool_result(
                        &d.tool_name,
                        &d.result,
                    )));
            }
            memory
                .tool_interactions
                .push(ChatMessage::assistant(response.content.clone()));
        }

        match response.routing {
            Some(Routing::ToolCall { tool_name, params }) => {
                state.memory_mut(&agent_name).tool_rounds += 1;

                let permission = agent
                    .toolkit
                    .as_ref()
                    .and_then(|tk| tk.get(&tool_name))
                    .map(|t| t.permission())
                    .unwrap_or(ToolPermission::Public);

                if permission == ToolPermission::Confirm {
                    state.pending_permission = Some(PendingPermission {
                        from_agent: agent_name,
                        tool_name,
                        params,
                        permission_level: permission,
                    });
                    state.phase = Phase::WaitingPermission;
                } else {
                    state.pending_tool = Some(PendingTool {
                        from_agent: agent_name.clone(),
                        tool_name,
                        params,
                    });
                    state.phase = if is_lead {
                        Phase::LeadExecuting
                    } else {
                        Phase::SubagentExecuting
                    };
                }
            }
            Some(Routing::Subagent {
                target,
                instruction,
            }) => {
                debug!(from = %agent_name, to = %target, "subagent routing");
                state.subagent_instruction = Some(instruction);
                state.current_agent = target;
                state.phase = Phase::SubagentExecuting;
            }
            None => {
                if is_lead {
                    state.final_response = Some(response.content);
                    state.phase = Phase::Completed;
                } else {
                    // A worker's findings flow back to the lead as a
                    // synthetic call_subagent tool result.
                    self.return_result_to_agent(
                        state,
                        &self.lead_name,
                        CALL_SUBAGENT,
                        ToolResult::ok(json!({
                            "agent_type": agent_name,
                            "report": response.content,
                        })),
                    );
                    state.subagent_instruction = None;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tool execution step
    // -----------------------------------------------------------------------

    /// Execute a cleared tool through the originating agent's toolkit.
    async fn execute_tool(
        &self,
        state: &mut RunState,
        tool: &PendingTool,
        emit: EventSink<'_>,
    ) -> ToolResult {
        emit(
            Event::new(EventType::ToolStart)
                .with_agent(tool.from_agent.clone())
                .with_tool(tool.tool_name.clone())
                .with_data(json!({ "params": tool.params })),
        );

        let started = Instant::now();
        let result = match self
            .agents
            .get(&tool.from_agent)
            .and_then(|a| a.toolkit.as_ref())
        {
            Some(toolkit) => toolkit.execute(&tool.tool_name, tool.params.clone()).await,
            None => ToolResult::err(format!("agent '{}' has no toolkit", tool.from_agent)),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        state.metrics.record_tool_call();

        if !result.success {
            warn!(
                tool = %tool.tool_name,
                agent = %tool.from_agent,
                error = result.error.as_deref().unwrap_or("unknown"),
                "tool execution failed"
            );
        }

        let mut data = json!({
            "success": result.success,
            "duration_ms": duration_ms,
        });
        if let Some(ref error) = result.error {
            data["error"] = json!(error);
        }
        if let Some(ref payload) = result.data {
            data["result_data"] = payload.clone();
        }

        emit(
            Event::new(EventType::ToolComplete)
                .with_agent(tool.from_agent.clone())
                .with_tool(tool.tool_name.clone())
                .with_data(data),
        );

        result
    }

    /// Address a tool result to an agent and route control back to it.
    fn return_result_to_agent(
        &self,
        state: &mut RunState,
        agent: &str,
        tool_name: &str,
        result: ToolResult,
    ) {
        state.delivered_result = Some(DeliveredToolResult {
            to_agent: agent.to_string(),
            tool_name: tool_name.to_string(),
            result,
        });
        state.current_agent = agent.to_string();
        state.phase = if agent == self.lead_name {
            Phase::LeadExecuting
        } else {
            Phase::SubagentExecuting
        };
    }

    /// Build the prompt context (artifact inventory) for the session.
    async fn prompt_context(&self, session_id: &str) -> PromptContext {
        let Some(ref artifacts) = self.artifacts else {
            return PromptContext::default();
        };

        match artifacts.list(session_id, None).await {
            Ok(summaries) => PromptContext {
                artifacts: summaries
                    .into_iter()
                    .map(|s| ArtifactBrief {
                        id: s.id,
                        content_type: s.content_type,
                        title: s.title,
                        version: s.version,
                        preview: s.content.unwrap_or_default(),
                    })
                    .collect(),
            },
            Err(e) => {
                warn!(error = %e, "failed to build artifact inventory");
                PromptContext::default()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
