//! Router assembly and server lifecycle.
//!
//! [`build_state`] wires the stores, controller, stream manager, and task
//! manager together; [`serve`] binds the listener and runs until shutdown,
//! then drains the task manager and closes remaining stream buffers.

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use artifactflow_agent::SharedChatModel;
use artifactflow_engine::{
    ControllerConfig, ExecutionController, StreamManager, TaskManager,
};
use artifactflow_store::{ArtifactStore, ConversationStore, Database, UserStore};

use crate::auth::AuthService;
use crate::config::ServerConfig;
use crate::routes;
use crate::state::{AppState, SharedState};

/// Grace window for in-flight runs at shutdown.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(30);

/// Wire up all process-wide state.
pub fn build_state(config: ServerConfig, db: Database, model: SharedChatModel) -> SharedState {
    let conversations = ConversationStore::new(db.clone());
    let artifacts = ArtifactStore::new(db.clone());
    let users = UserStore::new(db);

    let streams = StreamManager::new(config.stream_ttl);
    let tasks = TaskManager::new(config.max_concurrent_tasks);
    let auth = AuthService::new(&config.jwt_secret, config.jwt_expiry_days);

    let controller = ExecutionController::new(
        conversations.clone(),
        artifacts.clone(),
        model,
        Arc::clone(&streams),
        ControllerConfig {
            model: config.model.clone(),
            stream_timeout: config.stream_timeout,
            debug: config.debug,
            ..ControllerConfig::default()
        },
    );

    Arc::new(AppState {
        config,
        auth,
        users,
        conversations,
        artifacts,
        controller,
        streams,
        tasks,
    })
}

/// Build the axum router with all routes registered.
pub fn router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let api = Router::new()
        .nest("/auth", routes::auth::routes())
        .nest("/chat", routes::chat::routes())
        .nest("/artifacts", routes::artifacts::routes())
        .nest("/stream", routes::stream::routes());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Bind and serve until interrupted, then shut down gracefully: the task
/// manager drains with a timeout and remaining stream buffers close.
pub async fn serve(state: SharedState) -> anyhow::Result<()> {
    let addr = state.config.bind_addr();
    let tasks = Arc::clone(&state.tasks);
    let streams = Arc::clone(&state.streams);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "artifactflow server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down: draining background tasks");
    tasks.shutdown(SHUTDOWN_GRACE).await;
    streams.close_all();
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received");
}
