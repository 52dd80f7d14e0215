//! HTTP/SSE server for ArtifactFlow.
//!
//! Exposes the execution engine over a small REST surface plus one SSE
//! stream per run. Authentication is bearer-JWT; persistence and execution
//! live in the engine and store crates.

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::AuthService;
pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use server::{build_state, router, serve};
pub use state::{AppState, SharedState};
