//! SQLite persistence layer for ArtifactFlow.
//!
//! One [`Database`] handle backs three stores:
//!
//! - [`ConversationStore`]: the message tree with branch history;
//! - [`ArtifactStore`]: versioned artifacts with optimistic locking;
//! - [`UserStore`]: user accounts.
//!
//! All operations are async; the underlying rusqlite connection runs on the
//! blocking thread pool. Schema changes go through [`migration`].

pub mod artifact;
pub mod conversation;
pub mod db;
pub mod error;
pub mod migration;
pub mod user;

pub use artifact::{
    Artifact, ArtifactStore, ArtifactSummary, ArtifactVersion, TEMPORARY_ARTIFACT_IDS, UpdateType,
    VersionDiff, VersionInfo,
};
pub use conversation::{Conversation, ConversationStore, HistoryEntry, Message};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use user::{User, UserRole, UserStore, UserUpdate};
