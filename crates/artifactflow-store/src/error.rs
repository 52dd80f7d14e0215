//! Error types for the artifactflow-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The requested record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A record with the same key already exists.
    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// Optimistic-lock failure: another writer mutated the artifact first.
    #[error(
        "version conflict on artifact `{artifact_id}`: expected lock_version {expected}, actual {actual}"
    )]
    VersionConflict {
        artifact_id: String,
        expected: i64,
        actual: i64,
    },

    /// `old_str` did not match exactly one occurrence in the artifact content.
    #[error(
        "`old_str` matched {occurrences} occurrence(s) in artifact `{artifact_id}`; exactly one required"
    )]
    AmbiguousMatch {
        artifact_id: String,
        occurrences: usize,
    },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
