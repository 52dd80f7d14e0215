//! ArtifactFlow server binary.
//!
//! `artifactflow serve` runs the HTTP server; `artifactflow create-admin`
//! bootstraps the first admin account.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use artifactflow_agent::{AnthropicClient, AnthropicConfig, SharedChatModel};
use artifactflow_server::{ServerConfig, auth, build_state, serve};
use artifactflow_store::{Database, UserRole, UserStore};

#[derive(Parser)]
#[command(name = "artifactflow", about = "Multi-agent orchestration server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Create an admin user.
    CreateAdmin {
        /// Login name for the new admin.
        username: String,
        /// Password (minimum 8 characters).
        #[arg(long)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_env()?;

    if let Some(parent) = std::path::Path::new(&config.database_url).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
    }
    let db = Database::open_and_migrate(config.database_url.clone()).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let model: SharedChatModel = Arc::new(AnthropicClient::new(AnthropicConfig::new(
                config.anthropic_api_key.clone(),
                config.model.clone(),
            ))?);

            let state = build_state(config, db, model);
            serve(state).await
        }
        Command::CreateAdmin { username, password } => {
            anyhow::ensure!(
                password.len() >= 8,
                "password must be at least 8 characters"
            );
            let users = UserStore::new(db);
            let password_hash =
                auth::hash_password(&password).context("hashing admin password")?;
            let user = users
                .create(&username, &password_hash, UserRole::Admin)
                .await?;
            println!("admin user created: {} ({})", user.username, user.id);
            Ok(())
        }
    }
}
