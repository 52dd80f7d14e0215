//! Engine error types.

use thiserror::Error;

/// Alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An agent-layer failure (LLM exhaustion, parse errors).
    #[error("agent error: {0}")]
    Agent(#[from] artifactflow_agent::AgentError),

    /// A persistence failure.
    #[error("store error: {0}")]
    Store(#[from] artifactflow_store::StoreError),

    /// Toolkit assembly failed.
    #[error("registry error: {0}")]
    Registry(#[from] artifactflow_tools::RegistryError),

    /// The graph routed to an agent that is not registered.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// A graph was built without exactly one lead agent.
    #[error("graph requires exactly one lead agent")]
    NoLeadAgent,

    /// The total-step cap was exceeded (runaway loop).
    #[error("graph exceeded step limit of {0}")]
    StepLimitExceeded(u32),

    /// A resume arrived for a run that is not suspended.
    #[error("run {run_id} cannot be resumed: {reason}")]
    InvalidResume { run_id: String, reason: String },

    /// A stream buffer already exists for this run.
    #[error("stream already exists: {0}")]
    StreamExists(String),

    /// No stream buffer exists for this run.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The run exceeded its hard execution timeout.
    #[error("execution timed out after {0}s")]
    Timeout(u64),

    /// Unexpected internal failure.
    #[error("internal engine error: {0}")]
    Internal(String),
}
