//! Retry policy for LLM calls.
//!
//! Backoff strategy depends on how the call failed:
//! rate limiting doubles the wait per attempt, timeouts retry quickly at the
//! base delay, auth errors fail fast, and everything else backs off
//! linearly.

use std::time::Duration;

use tracing::{error, warn};

use crate::error::{AgentError, LlmErrorKind, Result};

/// Per-agent retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// The wait before retrying attempt `attempt` (0-based) after `kind`.
    /// `None` means the error is not retryable.
    fn backoff(&self, kind: LlmErrorKind, attempt: u32) -> Option<Duration> {
        match kind {
            LlmErrorKind::Auth => None,
            LlmErrorKind::RateLimited => Some(self.base_delay * 2u32.saturating_pow(attempt)),
            LlmErrorKind::Timeout => Some(self.base_delay),
            LlmErrorKind::Parse | LlmErrorKind::Other => {
                Some(self.base_delay * (attempt + 1))
            }
        }
    }
}

/// Run `operation` with the policy's retry semantics.
///
/// The async closure may lend mutable state (stream accumulators, event
/// sinks) across attempts. Non-LLM errors are treated as non-retryable and
/// propagate immediately.
pub async fn call_with_retry<T, F>(policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: AsyncFnMut() -> Result<T>,
{
    let attempts = policy.max_attempts.max(1);

    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(kind) = err.llm_kind() else {
                    return Err(err);
                };

                let last_attempt = attempt + 1 >= attempts;
                match policy.backoff(kind, attempt) {
                    Some(wait) if !last_attempt => {
                        warn!(
                            attempt = attempt + 1,
                            max = attempts,
                            kind = ?kind,
                            wait_ms = wait.as_millis() as u64,
                            error = %err,
                            "LLM call failed, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    }
                    _ => {
                        error!(kind = ?kind, error = %err, "LLM call failed permanently");
                        return Err(err);
                    }
                }
            }
        }
    }

    Err(AgentError::Internal("retry loop exhausted".into()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
