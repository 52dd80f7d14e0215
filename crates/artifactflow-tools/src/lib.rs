//! Tool system for ArtifactFlow agents.
//!
//! The registry owns every tool; agents see immutable [`Toolkit`] slices.
//! Stateless tools (search, fetch, routing) are shared; artifact tools are
//! bound to the run's artifact session when the run is prepared.

pub mod artifact_ops;
pub mod base;
pub mod call_subagent;
pub mod prompt;
pub mod registry;
pub mod web_fetch;
pub mod web_search;

pub use artifact_ops::{
    CreateArtifactTool, ReadArtifactTool, RewriteArtifactTool, UpdateArtifactTool,
};
pub use base::{PermissionOverride, Tool, ToolParameter, ToolPermission, ToolResult, validate_params};
pub use call_subagent::{CALL_SUBAGENT, CallSubagentTool};
pub use prompt::generate_tool_instruction;
pub use registry::{RegistryError, ToolRegistry, Toolkit};
pub use web_fetch::WebFetchTool;
pub use web_search::{SearchHit, WebSearchTool};
