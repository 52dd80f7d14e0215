//! Server configuration from environment variables.
//!
//! All keys use the `ARTIFACTFLOW_` prefix. `JWT_SECRET` is mandatory and
//! checked at startup so a misconfigured deployment fails fast instead of
//! issuing unverifiable tokens.

use std::time::Duration;

use anyhow::{Context, bail};

/// Environment variable prefix.
const ENV_PREFIX: &str = "ARTIFACTFLOW_";

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// SQLite database path.
    pub database_url: String,
    /// HS256 signing secret. Required.
    pub jwt_secret: String,
    /// Token lifetime in days.
    pub jwt_expiry_days: i64,
    /// Concurrent graph executions.
    pub max_concurrent_tasks: usize,
    /// Hard per-run execution cap.
    pub stream_timeout: Duration,
    /// Unconsumed stream buffer lifetime.
    pub stream_ttl: Duration,
    /// SSE heartbeat interval.
    pub sse_ping_interval: Duration,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    /// When true, error events keep their detail.
    pub debug: bool,
    /// Model identifier handed to the agents.
    pub model: String,
    /// Anthropic API key.
    pub anthropic_api_key: String,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid {ENV_PREFIX}{key}: {raw}")),
        None => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = match env_var("JWT_SECRET") {
            Some(secret) => secret,
            None => bail!(
                "{ENV_PREFIX}JWT_SECRET is not set. Generate one with: \
                 head -c 32 /dev/urandom | base64"
            ),
        };

        // The API key may also come unprefixed, as the SDK convention.
        let anthropic_api_key = env_var("ANTHROPIC_API_KEY")
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .unwrap_or_default();

        Ok(Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8000)?,
            database_url: env_or("DATABASE_URL", "data/artifactflow.db"),
            jwt_secret,
            jwt_expiry_days: env_parse("JWT_EXPIRY_DAYS", 7)?,
            max_concurrent_tasks: env_parse("MAX_CONCURRENT_TASKS", 10)?,
            stream_timeout: Duration::from_secs(env_parse("STREAM_TIMEOUT", 300u64)?),
            stream_ttl: Duration::from_secs(env_parse("STREAM_TTL", 30u64)?),
            sse_ping_interval: Duration::from_secs(env_parse("SSE_PING_INTERVAL", 15u64)?),
            cors_origins: env_or("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            debug: env_parse("DEBUG", false)?,
            model: env_or("MODEL", "claude-sonnet-4-20250514"),
            anthropic_api_key,
        })
    }

    /// The `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // Environment mutation is process-global; this single test covers the
    // whole from_env surface to avoid interleaving.
    #[test]
    fn from_env_reads_prefixed_keys() {
        // SAFETY: test-only env mutation before any reads in this test.
        unsafe {
            std::env::set_var("ARTIFACTFLOW_JWT_SECRET", "test-secret");
            std::env::set_var("ARTIFACTFLOW_PORT", "9100");
            std::env::set_var("ARTIFACTFLOW_CORS_ORIGINS", "http://a.test, http://b.test");
            std::env::set_var("ARTIFACTFLOW_DEBUG", "true");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.jwt_secret, "test-secret");
        assert_eq!(config.port, 9100);
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert!(config.debug);
        assert_eq!(config.stream_timeout, Duration::from_secs(300));
        assert_eq!(config.max_concurrent_tasks, 10);
        assert_eq!(config.bind_addr(), "0.0.0.0:9100");

        unsafe {
            std::env::remove_var("ARTIFACTFLOW_JWT_SECRET");
            std::env::remove_var("ARTIFACTFLOW_PORT");
            std::env::remove_var("ARTIFACTFLOW_CORS_ORIGINS");
            std::env::remove_var("ARTIFACTFLOW_DEBUG");
        }

        // With the secret gone, startup must fail fast.
        assert!(ServerConfig::from_env().is_err());
    }
}
