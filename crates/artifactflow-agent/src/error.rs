//! Agent error types.
//!
//! LLM failures carry a [`LlmErrorKind`] so the retry layer can pick the
//! right backoff strategy without string matching at the call site.

use thiserror::Error;

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

/// How an LLM call failed, for retry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// The provider signalled rate limiting (HTTP 429 or equivalent).
    RateLimited,
    /// The request timed out.
    Timeout,
    /// Invalid or missing credentials. Never retried.
    Auth,
    /// The response could not be parsed.
    Parse,
    /// Anything else (transient network errors, 5xx, ...).
    Other,
}

/// Unified error type for the agent crate.
#[derive(Debug, Error)]
pub enum AgentError {
    /// An LLM call failed.
    #[error("llm error ({kind:?}): {message}")]
    Llm { kind: LlmErrorKind, message: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Construct an LLM error of the given kind.
    pub fn llm(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self::Llm {
            kind,
            message: message.into(),
        }
    }

    /// The error's retry classification, if it is an LLM error.
    pub fn llm_kind(&self) -> Option<LlmErrorKind> {
        match self {
            Self::Llm { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Classify a provider error message into a retry kind.
///
/// Used when the failure reaches us as text (an HTTP error body) rather
/// than a typed condition.
pub fn classify_message(message: &str) -> LlmErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("rate") && lower.contains("limit") || lower.contains("429") {
        LlmErrorKind::RateLimited
    } else if lower.contains("timeout") || lower.contains("timed out") {
        LlmErrorKind::Timeout
    } else if lower.contains("auth")
        || lower.contains("api key")
        || lower.contains("unauthorized")
        || lower.contains("401")
        || lower.contains("403")
    {
        LlmErrorKind::Auth
    } else {
        LlmErrorKind::Other
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
