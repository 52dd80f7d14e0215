//! Shared application state.
//!
//! One [`AppState`] is built at startup, wrapped in an `Arc`, and handed to
//! every handler. Stores are cheap clones over one database handle; the
//! controller, stream manager, and task manager are process-wide.

use std::sync::Arc;

use artifactflow_engine::{ExecutionController, StreamManager, TaskManager};
use artifactflow_store::{ArtifactStore, ConversationStore, UserStore};

use crate::auth::AuthService;
use crate::config::ServerConfig;

/// State accessible from every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub auth: AuthService,
    pub users: UserStore,
    pub conversations: ConversationStore,
    pub artifacts: ArtifactStore,
    pub controller: Arc<ExecutionController>,
    pub streams: Arc<StreamManager>,
    pub tasks: Arc<TaskManager>,
}

/// Shared handle used as the axum router state.
pub type SharedState = Arc<AppState>;
