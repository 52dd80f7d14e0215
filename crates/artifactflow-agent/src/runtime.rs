//! Single-turn agent runtime.
//!
//! One call to [`run_turn`] is one LLM invocation: compose the message
//! list, call the model with retry, stream tagged chunks out as events,
//! then parse the full content for a tool call and attach routing. The
//! agent never executes tools; interpreting the routing is the graph's
//! job, which keeps permission gating in one place.

use serde_json::Value;
use tracing::{debug, info};

use artifactflow_tools::{CALL_SUBAGENT, ToolResult};

use crate::definition::{AgentDefinition, PromptContext};
use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel, ChatRequest, StreamChunk, TokenUsage};
use crate::retry::call_with_retry;
use crate::xml::parse_tool_call;

// ---------------------------------------------------------------------------
// Turn input / output
// ---------------------------------------------------------------------------

/// Where the graph should send control after this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    /// Delegate to a worker agent.
    Subagent { target: String, instruction: String },
    /// Execute a tool and re-enter this agent with the result.
    ToolCall { tool_name: String, params: Value },
}

/// The result of one agent turn.
#[derive(Debug, Clone)]
pub struct AgentTurnResponse {
    /// Final (or intermediate) content produced this turn.
    pub content: String,
    /// Reasoning trace, when the model emitted one.
    pub reasoning: Option<String>,
    /// Requested routing; `None` means the agent is done.
    pub routing: Option<Routing>,
    /// Token usage for this turn.
    pub usage: TokenUsage,
}

/// A tool result being delivered back to the agent that requested it.
#[derive(Debug, Clone)]
pub struct PendingToolResult {
    pub tool_name: String,
    pub result: ToolResult,
}

/// Everything the runtime needs for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    /// The instruction driving this turn (user task for the lead, the
    /// lead's instruction for a worker).
    pub instruction: String,
    /// Prior conversation turns (user/assistant pairs).
    pub history: Vec<ChatMessage>,
    /// This run's accumulated assistant/tool exchange for the agent.
    pub tool_interactions: Vec<ChatMessage>,
    /// Tool result to deliver, when resuming after tool execution.
    pub pending_tool_result: Option<PendingToolResult>,
    /// When true, withhold tools and force a final answer.
    pub forced_final: bool,
    /// Dynamic prompt context (artifact inventory).
    pub context: PromptContext,
}

/// Progress events emitted during a turn. The engine wraps these into the
/// wire-format envelopes.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The agent began its turn.
    Start,
    /// Cumulative streamed output so far.
    LlmChunk {
        content: Option<String>,
        reasoning: Option<String>,
    },
    /// The LLM call finished.
    LlmComplete { usage: TokenUsage },
    /// The turn is over; routing may be attached.
    Complete { response: AgentTurnResponse },
}

// ---------------------------------------------------------------------------
// Turn execution
// ---------------------------------------------------------------------------

/// Run one agent turn. Transient LLM failures are retried per the agent's
/// policy; exhaustion propagates as an error and terminates the run.
pub async fn run_turn(
    model: &dyn ChatModel,
    agent: &AgentDefinition,
    input: &TurnInput,
    emit: &mut (dyn FnMut(AgentEvent) + Send),
) -> Result<AgentTurnResponse> {
    emit(AgentEvent::Start);

    let messages = compose_messages(agent, input);
    let request = ChatRequest {
        model: agent.model.clone(),
        messages,
        temperature: Some(agent.temperature),
        max_tokens: None,
    };

    debug!(
        agent = %agent.name,
        messages = request.messages.len(),
        forced_final = input.forced_final,
        "invoking LLM"
    );

    // Cumulative accumulation: llm_chunk events carry the full text so far.
    let mut content_acc = String::new();
    let mut reasoning_acc = String::new();

    let outcome = call_with_retry(agent.retry, async || {
        // A fresh attempt restarts accumulation.
        content_acc.clear();
        reasoning_acc.clear();
        let mut forward = |chunk: StreamChunk| match chunk {
            StreamChunk::Content(delta) => {
                content_acc.push_str(&delta);
                emit(AgentEvent::LlmChunk {
                    content: Some(content_acc.clone()),
                    reasoning: None,
                });
            }
            StreamChunk::Reasoning(delta) => {
                reasoning_acc.push_str(&delta);
                emit(AgentEvent::LlmChunk {
                    content: None,
                    reasoning: Some(reasoning_acc.clone()),
                });
            }
            StreamChunk::Usage(_) | StreamChunk::Final(_) => {}
        };
        model.stream_chat(&request, &mut forward).await
    })
    .await?;

    emit(AgentEvent::LlmComplete {
        usage: outcome.usage,
    });

    // Parse the full content for a tool call and derive routing. On a
    // forced final turn any stray call is ignored outright.
    let routing = if input.forced_final {
        None
    } else {
        match parse_tool_call(&outcome.content) {
            Some(call) => Some(resolve_routing(agent, call.name, call.params).await),
            None => None,
        }
    };

    let content = if routing.is_none() {
        agent.format_final_response(&outcome.content)
    } else {
        outcome.content.clone()
    };

    let response = AgentTurnResponse {
        content,
        reasoning: outcome.reasoning,
        routing,
        usage: outcome.usage,
    };

    info!(
        agent = %agent.name,
        routed = response.routing.is_some(),
        output_tokens = response.usage.output_tokens,
        "agent turn complete"
    );

    emit(AgentEvent::Complete {
        response: response.clone(),
    });

    Ok(response)
}

/// Turn a parsed tool call into routing.
///
/// `call_subagent` with valid parameters becomes subagent routing; with
/// invalid parameters it stays a tool call so the graph surfaces the
/// validation error as a tool result the model can correct.
async fn resolve_routing(agent: &AgentDefinition, tool_name: String, params: Value) -> Routing {
    if tool_name == CALL_SUBAGENT {
        if let Some(ref toolkit) = agent.toolkit {
            let validation = toolkit.execute(CALL_SUBAGENT, params.clone()).await;
            if validation.success {
                let data = validation.data.unwrap_or_default();
                return Routing::Subagent {
                    target: data["agent_type"].as_str().unwrap_or_default().to_string(),
                    instruction: data["instruction"].as_str().unwrap_or_default().to_string(),
                };
            }
        }
    }

    Routing::ToolCall { tool_name, params }
}

/// Compose the message list:
/// `[system, …history, {user, instruction}, …tool_interactions, tool_result?]`.
fn compose_messages(agent: &AgentDefinition, input: &TurnInput) -> Vec<ChatMessage> {
    let include_tools = !input.forced_final;
    let mut messages = Vec::with_capacity(input.history.len() + input.tool_interactions.len() + 3);

    messages.push(ChatMessage::system(
        agent.build_system_prompt(&input.context, include_tools),
    ));
    messages.extend(input.history.iter().cloned());
    messages.push(ChatMessage::user(input.instruction.clone()));
    messages.extend(input.tool_interactions.iter().cloned());

    if let Some(ref pending) = input.pending_tool_result {
        messages.push(ChatMessage::user(render_tool_result(
            &pending.tool_name,
            &pending.result,
        )));
    }

    messages
}

/// Render a tool result as the XML block agents are taught to expect.
pub fn render_tool_result(name: &str, result: &ToolResult) -> String {
    let mut xml = format!(
        "<tool_result>\n  <name>{name}</name>\n  <success>{}</success>",
        result.success
    );

    if let Some(ref data) = result.data {
        let rendered =
            serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        xml.push_str(&format!("\n  <data>\n{rendered}\n  </data>"));
    }
    if let Some(ref error) = result.error {
        xml.push_str(&format!("\n  <error>{error}</error>"));
    }

    xml.push_str("\n</tool_result>");
    xml
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
