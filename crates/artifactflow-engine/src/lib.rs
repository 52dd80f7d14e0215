//! Execution engine for ArtifactFlow.
//!
//! Sits between the HTTP boundary and LLM/tool I/O: the graph state
//! machine routes between the lead and its workers, the controller
//! translates runs into persisted conversations and buffered events, the
//! stream manager decouples producers from SSE consumers, and the task
//! manager bounds concurrent LLM-bearing runs.

pub mod controller;
pub mod error;
pub mod events;
pub mod graph;
pub mod history;
pub mod state;
pub mod stream;
pub mod tasks;

pub use controller::{ControllerConfig, ExecutionController, StartedRun};
pub use error::{EngineError, EngineResult};
pub use events::{Event, EventType, ExecutionMetrics};
pub use graph::{EventSink, Graph, GraphOutcome};
pub use history::{CompressionLevel, PRESERVE_RECENT, compress_messages, should_compress};
pub use state::{
    AgentMemory, DeliveredToolResult, PendingPermission, PendingTool, Phase, RunState,
};
pub use stream::{StreamConsumer, StreamItem, StreamManager, StreamStatus};
pub use tasks::TaskManager;
