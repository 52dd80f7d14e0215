//! Execution controller.
//!
//! Orchestrates one logical operation ("new message" or "resume after
//! permission") between the HTTP boundary and the graph: prepares state,
//! persists the user message, drives the graph, forwards events into the
//! run's stream buffer, and persists the final response before the
//! terminal event. Graph execution is independent of the client
//! connection: a disconnected consumer never aborts persistence.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use artifactflow_agent::{
    ChatMessage, LEAD_AGENT, SharedChatModel, crawl_agent, default_worker_profiles, lead_agent,
    search_agent,
};
use artifactflow_store::{ArtifactStore, ConversationStore};
use artifactflow_tools::{
    CallSubagentTool, CreateArtifactTool, PermissionOverride, ReadArtifactTool,
    RewriteArtifactTool, Tool, ToolPermission, ToolRegistry, UpdateArtifactTool, WebFetchTool,
    WebSearchTool,
};

use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventType};
use crate::graph::{Graph, GraphOutcome};
use crate::history::{CompressionLevel, compress_messages};
use crate::state::RunState;
use crate::stream::StreamManager;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Model identifier handed to every agent (empty = client default).
    pub model: String,
    /// Hard per-run execution cap.
    pub stream_timeout: Duration,
    /// When false, error details are replaced with a generic message
    /// before they reach the stream.
    pub debug: bool,
    /// History compression level applied at history-building time.
    pub compression: CompressionLevel,
    /// Per-deployment permission overrides, by tool name.
    pub permission_overrides: HashMap<String, ToolPermission>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            stream_timeout: Duration::from_secs(300),
            debug: false,
            compression: CompressionLevel::Normal,
            permission_overrides: HashMap::new(),
        }
    }
}

/// Identifiers allocated for a freshly started run.
#[derive(Debug, Clone)]
pub struct StartedRun {
    pub conversation_id: String,
    pub message_id: String,
    pub run_id: String,
}

/// The execution controller. One instance serves the whole process;
/// per-run state lives in [`RunState`] and the suspended-run map.
pub struct ExecutionController {
    conversations: ConversationStore,
    artifacts: ArtifactStore,
    model: SharedChatModel,
    streams: Arc<StreamManager>,
    /// Runs parked on a permission interrupt, keyed by run id.
    suspended: Mutex<HashMap<String, RunState>>,
    config: ControllerConfig,
}

impl ExecutionController {
    pub fn new(
        conversations: ConversationStore,
        artifacts: ArtifactStore,
        model: SharedChatModel,
        streams: Arc<StreamManager>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            conversations,
            artifacts,
            model,
            streams,
            suspended: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// The stream manager events flow through.
    pub fn streams(&self) -> &Arc<StreamManager> {
        &self.streams
    }

    /// Whether a run is parked on a permission interrupt.
    pub fn is_suspended(&self, run_id: &str) -> bool {
        self.suspended.lock().expect("suspended map lock").contains_key(run_id)
    }

    // -----------------------------------------------------------------------
    // New message
    // -----------------------------------------------------------------------

    /// Synchronous preparation for a new message: allocate ids, make sure
    /// the conversation exists, and open the run's stream buffer. The
    /// returned ids go back to the client immediately; the heavy work runs
    /// in [`ExecutionController::drive_new_message`].
    pub async fn start_message(
        &self,
        conversation_id: Option<String>,
    ) -> EngineResult<StartedRun> {
        let conversation_id =
            conversation_id.unwrap_or_else(|| format!("conv-{}", Uuid::now_v7().simple()));
        let message_id = format!("msg-{}", Uuid::now_v7().simple());
        let run_id = format!("run-{}", Uuid::now_v7().simple());

        self.conversations.ensure_exists(&conversation_id).await?;
        self.streams.create(&run_id)?;

        Ok(StartedRun {
            conversation_id,
            message_id,
            run_id,
        })
    }

    /// Background body for a new-message run. Never returns an error: every
    /// failure becomes an `error` event and a persisted error response.
    pub async fn drive_new_message(
        self: Arc<Self>,
        run: StartedRun,
        content: String,
        parent_message_id: Option<String>,
    ) {
        let mut writer = EventWriter::new(
            Arc::clone(&self.streams),
            run.run_id.clone(),
            self.config.debug,
        );

        let this: &Self = &self;
        let fut: Pin<Box<dyn Future<Output = EngineResult<()>> + Send + '_>> =
            Box::pin(this.run_new_message(&run, &content, parent_message_id, &mut writer));
        let result = tokio::time::timeout(self.config.stream_timeout, fut).await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => this.fail_run(&run, &e, &mut writer).await,
            Err(_elapsed) => {
                let e = EngineError::Timeout(self.config.stream_timeout.as_secs());
                this.fail_run(&run, &e, &mut writer).await;
            }
        }
    }

    async fn run_new_message(
        &self,
        run: &StartedRun,
        content: &str,
        parent_message_id: Option<String>,
        writer: &mut EventWriter,
    ) -> EngineResult<()> {
        let conversation_id = &run.conversation_id;

        // An omitted parent defaults to the conversation's active branch.
        let conversation = self.conversations.get(conversation_id).await?;
        let parent = parent_message_id.or(conversation.active_branch);

        // Prior conversation, compressed at history-building time.
        let entries = self
            .conversations
            .format_history(conversation_id, parent.as_deref())
            .await?;
        let history: Vec<ChatMessage> = entries
            .into_iter()
            .map(|e| match e.role.as_str() {
                "assistant" => ChatMessage::assistant(e.content),
                _ => ChatMessage::user(e.content),
            })
            .collect();
        let history = compress_messages(&history, self.config.compression);

        // Scratch artifacts from the previous turn are dropped.
        self.artifacts.ensure_session_exists(conversation_id).await?;
        if let Err(e) = self.artifacts.clear_temporary(conversation_id, None).await {
            warn!(error = %e, "failed to clear temporary artifacts");
        }

        // Persist the user message; this also advances the active branch.
        self.conversations
            .add_message(
                conversation_id,
                &run.message_id,
                content,
                &run.run_id,
                parent.as_deref(),
            )
            .await?;

        info!(
            conversation_id = %conversation_id,
            run_id = %run.run_id,
            "processing new message"
        );

        writer.push(Event::new(EventType::Metadata).with_data(json!({
            "conversation_id": run.conversation_id,
            "message_id": run.message_id,
            "run_id": run.run_id,
        })));

        let graph = self.build_graph(conversation_id)?;
        let state = RunState::new(
            &run.run_id,
            conversation_id,
            &run.message_id,
            content,
            history,
            graph.lead_name(),
        );

        let mut sink = |event: Event| writer.push(event);
        let outcome = graph.run(state, self.model.as_ref(), &mut sink).await?;
        self.finish_run(run, outcome, writer).await
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    /// Validate a resume request and open a fresh stream buffer for it.
    ///
    /// The message must belong to the conversation and the run, and the run
    /// must actually be parked on a permission interrupt.
    pub async fn start_resume(
        &self,
        conversation_id: &str,
        run_id: &str,
        message_id: &str,
    ) -> EngineResult<()> {
        let message = self.conversations.get_message(message_id).await?;
        if message.conversation_id != conversation_id || message.run_id != run_id {
            return Err(EngineError::InvalidResume {
                run_id: run_id.to_string(),
                reason: "message does not belong to this conversation and run".into(),
            });
        }
        if !self.is_suspended(run_id) {
            return Err(EngineError::InvalidResume {
                run_id: run_id.to_string(),
                reason: "run is not awaiting a permission decision".into(),
            });
        }

        // A stale buffer from the interrupted stream may linger; replace it.
        if self.streams.create(run_id).is_err() {
            self.streams.close(run_id);
            self.streams.create(run_id)?;
        }
        Ok(())
    }

    /// Background body for a resumed run.
    pub async fn drive_resume(
        self: Arc<Self>,
        conversation_id: String,
        run_id: String,
        message_id: String,
        approved: bool,
    ) {
        let run = StartedRun {
            conversation_id,
            message_id,
            run_id,
        };
        let mut writer = EventWriter::new(
            Arc::clone(&self.streams),
            run.run_id.clone(),
            self.config.debug,
        );

        let this: &Self = &self;
        let fut: Pin<Box<dyn Future<Output = EngineResult<()>> + Send + '_>> =
            Box::pin(this.run_resume(&run, approved, &mut writer));
        let result = tokio::time::timeout(self.config.stream_timeout, fut).await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => this.fail_run(&run, &e, &mut writer).await,
            Err(_elapsed) => {
                let e = EngineError::Timeout(self.config.stream_timeout.as_secs());
                this.fail_run(&run, &e, &mut writer).await;
            }
        }
    }

    async fn run_resume(
        &self,
        run: &StartedRun,
        approved: bool,
        writer: &mut EventWriter,
    ) -> EngineResult<()> {
        let state = self
            .suspended
            .lock()
            .expect("suspended map lock")
            .remove(&run.run_id)
            .ok_or_else(|| EngineError::InvalidResume {
                run_id: run.run_id.clone(),
                reason: "suspended state disappeared".into(),
            })?;

        info!(run_id = %run.run_id, approved, "resuming suspended run");

        writer.push(Event::new(EventType::Metadata).with_data(json!({
            "conversation_id": run.conversation_id,
            "message_id": run.message_id,
            "run_id": run.run_id,
            "resuming": true,
        })));

        let graph = self.build_graph(&run.conversation_id)?;
        let mut sink = |event: Event| writer.push(event);
        let outcome = graph
            .resume(state, approved, self.model.as_ref(), &mut sink)
            .await?;
        self.finish_run(run, outcome, writer).await
    }

    // -----------------------------------------------------------------------
    // Shared tail
    // -----------------------------------------------------------------------

    /// Persist results and emit the terminal event. Message persistence
    /// happens before `complete` hits the buffer.
    async fn finish_run(
        &self,
        run: &StartedRun,
        outcome: GraphOutcome,
        writer: &mut EventWriter,
    ) -> EngineResult<()> {
        match outcome {
            GraphOutcome::Finished(mut state) => {
                let response = state.final_response.clone().unwrap_or_default();
                self.conversations
                    .update_response(&run.message_id, &response)
                    .await?;
                state.metrics.finalize();

                info!(run_id = %run.run_id, "run completed");
                writer.push(Event::new(EventType::Complete).with_data(json!({
                    "interrupted": false,
                    "response": response,
                    "execution_metrics": state.metrics,
                })));
            }
            GraphOutcome::Interrupted(mut state) => {
                state.metrics.finalize();
                let pending = state.pending_permission.clone().ok_or_else(|| {
                    EngineError::Internal("interrupted without a pending permission".into())
                })?;

                let interrupt_data = json!({
                    "agent": pending.from_agent,
                    "tool": pending.tool_name,
                    "params": pending.params,
                    "permission_level": pending.permission_level.as_str(),
                });
                let metrics = state.metrics.clone();

                self.suspended
                    .lock()
                    .expect("suspended map lock")
                    .insert(run.run_id.clone(), *state);

                info!(run_id = %run.run_id, "run suspended awaiting permission");
                writer.push(Event::new(EventType::Complete).with_data(json!({
                    "interrupted": true,
                    "interrupt_type": "tool_permission",
                    "interrupt_data": interrupt_data,
                    "execution_metrics": metrics,
                })));
            }
        }
        Ok(())
    }

    /// Record a run failure: persist an error response and emit `error`.
    async fn fail_run(&self, run: &StartedRun, e: &EngineError, writer: &mut EventWriter) {
        error!(run_id = %run.run_id, error = %e, "run failed");

        if let Err(store_err) = self
            .conversations
            .update_response(&run.message_id, &format!("Error: {e}"))
            .await
        {
            warn!(error = %store_err, "failed to persist error response");
        }

        writer.push(
            Event::new(EventType::Error).with_data(json!({ "error": e.to_string() })),
        );
    }

    // -----------------------------------------------------------------------
    // Graph assembly
    // -----------------------------------------------------------------------

    /// Assemble the per-run registry (artifact tools bound to the session),
    /// toolkits, and the standard agent team.
    fn build_graph(&self, session_id: &str) -> EngineResult<Graph> {
        let mut registry = ToolRegistry::new();
        let mut register = |tool: Arc<dyn Tool>| {
            match self.config.permission_overrides.get(tool.name()) {
                Some(&permission) => {
                    registry.register(Arc::new(PermissionOverride::new(tool, permission)));
                }
                None => registry.register(tool),
            }
        };
        register(Arc::new(CreateArtifactTool::new(
            self.artifacts.clone(),
            session_id,
        )));
        register(Arc::new(UpdateArtifactTool::new(
            self.artifacts.clone(),
            session_id,
        )));
        register(Arc::new(RewriteArtifactTool::new(
            self.artifacts.clone(),
            session_id,
        )));
        register(Arc::new(ReadArtifactTool::new(
            self.artifacts.clone(),
            session_id,
        )));
        register(Arc::new(CallSubagentTool::new([
            "search_agent",
            "crawl_agent",
        ])));
        register(Arc::new(WebSearchTool::new()));
        register(Arc::new(WebFetchTool::new()));

        let lead_toolkit = registry.toolkit(
            LEAD_AGENT,
            &[
                "create_artifact",
                "update_artifact",
                "rewrite_artifact",
                "read_artifact",
                "call_subagent",
            ],
        )?;
        let search_toolkit = registry.toolkit("search_agent", &["web_search"])?;
        let crawl_toolkit = registry.toolkit("crawl_agent", &["web_fetch"])?;

        let agents = vec![
            lead_agent(
                self.config.model.clone(),
                lead_toolkit,
                default_worker_profiles(),
            ),
            search_agent(self.config.model.clone(), search_toolkit),
            crawl_agent(self.config.model.clone(), crawl_toolkit),
        ];

        Graph::new(agents, Some(self.artifacts.clone()))
    }
}

// ---------------------------------------------------------------------------
// Event writer
// ---------------------------------------------------------------------------

/// Pushes events into the run's buffer, dropping them once the consumer is
/// gone for good. The graph keeps running either way so persisted state
/// stays consistent.
struct EventWriter {
    streams: Arc<StreamManager>,
    run_id: String,
    debug: bool,
    closed: bool,
}

impl EventWriter {
    fn new(streams: Arc<StreamManager>, run_id: String, debug: bool) -> Self {
        Self {
            streams,
            run_id,
            debug,
            closed: false,
        }
    }

    fn push(&mut self, event: Event) {
        if self.closed {
            return;
        }
        let event = if self.debug {
            event
        } else {
            sanitize_error(event)
        };
        if !self.streams.push(&self.run_id, event) {
            info!(run_id = %self.run_id, "stream closed, graph continues without a consumer");
            self.closed = true;
        }
    }
}

/// Replace internal error details with a generic message (non-debug mode).
fn sanitize_error(mut event: Event) -> Event {
    if event.event_type == EventType::Error {
        if let Some(ref mut data) = event.data {
            data["error"] = json!("Internal server error");
        }
    }
    event
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_error_detail() {
        let event = Event::new(EventType::Error)
            .with_data(json!({"error": "stack trace with secrets"}));
        let sanitized = sanitize_error(event);
        assert_eq!(sanitized.data.unwrap()["error"], "Internal server error");
    }

    #[test]
    fn sanitize_leaves_other_events_alone() {
        let event = Event::new(EventType::Complete).with_data(json!({"response": "hi"}));
        let sanitized = sanitize_error(event.clone());
        assert_eq!(sanitized.data, event.data);
    }

    #[test]
    fn default_config_matches_contract() {
        let config = ControllerConfig::default();
        assert_eq!(config.stream_timeout, Duration::from_secs(300));
        assert!(!config.debug);
    }
}
