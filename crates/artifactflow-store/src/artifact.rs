//! Versioned artifact persistence with optimistic locking.
//!
//! Artifacts are named content objects scoped to one artifact session (which
//! shares its id with the owning conversation). Every content mutation bumps
//! `current_version` and `lock_version` and appends a full snapshot to the
//! append-only version log. Updates compare-and-swap on `lock_version`, so
//! of two concurrent writers that observed the same lock exactly one
//! succeeds; the other gets [`StoreError::VersionConflict`] and must retry
//! with fresh state. The store never blocks on contended artifacts.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// An artifact row (current state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Identifier, unique within the session.
    pub id: String,
    /// The owning artifact session (= conversation id).
    pub session_id: String,
    /// Content type hint ("markdown", "python", ...).
    pub content_type: String,
    /// Display title.
    pub title: String,
    /// Current full content.
    pub content: String,
    /// Dense version counter, starts at 1.
    pub current_version: i64,
    /// Optimistic-lock counter; bumps on every content mutation.
    pub lock_version: i64,
    /// Unix timestamp when the artifact was created.
    pub created_at: i64,
    /// Unix timestamp when the artifact was last updated.
    pub updated_at: i64,
}

/// How a version came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    /// Initial creation.
    Create,
    /// Targeted `old_str` → `new_str` replacement.
    Update,
    /// Full content replacement.
    Rewrite,
}

impl UpdateType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Rewrite => "rewrite",
        }
    }

    fn from_str(s: &str) -> StoreResult<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "rewrite" => Ok(Self::Rewrite),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown update type: {other}"
            ))),
        }
    }
}

/// One entry of the append-only version log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactVersion {
    /// The artifact this version belongs to.
    pub artifact_id: String,
    /// The owning session.
    pub session_id: String,
    /// Version number, dense from 1.
    pub version: i64,
    /// Full content snapshot after the mutation.
    pub content: String,
    /// The kind of mutation that produced this version.
    pub update_type: UpdateType,
    /// For `update`: the `(old, new)` replacement pairs.
    pub changes: Option<Vec<(String, String)>>,
    /// Unix timestamp when the version was recorded.
    pub created_at: i64,
}

/// Listing entry: artifact metadata with a truncated content preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub id: String,
    pub content_type: String,
    pub title: String,
    pub version: i64,
    pub lock_version: i64,
    pub updated_at: i64,
    /// Content, truncated to the preview length when longer.
    pub content: Option<String>,
}

/// Listing entry for the version history (no full content).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: i64,
    pub update_type: UpdateType,
    pub created_at: i64,
    pub change_count: usize,
}

/// Both endpoints of a version comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDiff {
    pub from_version: i64,
    pub to_version: i64,
    pub from_content: String,
    pub to_content: String,
    pub to_update_type: UpdateType,
    pub to_changes: Option<Vec<(String, String)>>,
}

/// Scratch artifacts dropped at the start of each top-level turn.
pub const TEMPORARY_ARTIFACT_IDS: &[&str] = &["task_plan"];

/// Default preview truncation for [`ArtifactStore::list`].
const PREVIEW_LENGTH: usize = 200;

fn map_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artifact> {
    Ok(Artifact {
        id: row.get(0)?,
        session_id: row.get(1)?,
        content_type: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        current_version: row.get(5)?,
        lock_version: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const ARTIFACT_COLS: &str = "id, session_id, content_type, title, content, \
                             current_version, lock_version, created_at, updated_at";

// ═══════════════════════════════════════════════════════════════════════
//  ArtifactStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD, versioning, and optimistic-lock updates over artifacts.
#[derive(Clone)]
pub struct ArtifactStore {
    db: Database,
}

impl ArtifactStore {
    /// Create a new artifact store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Idempotently create the artifact session row.
    ///
    /// Normally the session is created together with its conversation; this
    /// covers callers that bind a session directly.
    pub async fn ensure_session_exists(&self, session_id: &str) -> StoreResult<()> {
        let session_id = session_id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO artifact_sessions (id, created_at, updated_at) \
                     VALUES (?1, ?2, ?2)",
                    rusqlite::params![session_id, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Create an artifact and its initial version in one transaction.
    #[instrument(skip(self, content))]
    pub async fn create(
        &self,
        session_id: &str,
        artifact_id: &str,
        content_type: &str,
        title: &str,
        content: &str,
    ) -> StoreResult<Artifact> {
        let session_id = session_id.to_string();
        let artifact_id = artifact_id.to_string();
        let content_type = content_type.to_string();
        let title = title.to_string();
        let content = content.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let session_exists: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM artifact_sessions WHERE id = ?1",
                    rusqlite::params![session_id],
                    |row| row.get(0),
                )?;
                if session_exists == 0 {
                    return Err(StoreError::NotFound {
                        entity: "artifact session",
                        id: session_id,
                    });
                }

                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO artifacts \
                     (id, session_id, content_type, title, content, current_version, lock_version, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, 1, ?6, ?6)",
                    rusqlite::params![artifact_id, session_id, content_type, title, content, now],
                )?;
                if inserted == 0 {
                    return Err(StoreError::Duplicate {
                        entity: "artifact",
                        id: format!("{session_id}/{artifact_id}"),
                    });
                }

                tx.execute(
                    "INSERT INTO artifact_versions (artifact_id, session_id, version, content, update_type, created_at) \
                     VALUES (?1, ?2, 1, ?3, 'create', ?4)",
                    rusqlite::params![artifact_id, session_id, content, now],
                )?;
                tx.commit()?;

                Ok(Artifact {
                    id: artifact_id,
                    session_id,
                    content_type,
                    title,
                    content,
                    current_version: 1,
                    lock_version: 1,
                    created_at: now,
                    updated_at: now,
                })
            })
            .await
    }

    /// Fetch an artifact's current state.
    #[instrument(skip(self))]
    pub async fn get(&self, session_id: &str, artifact_id: &str) -> StoreResult<Artifact> {
        let session_id = session_id.to_string();
        let artifact_id = artifact_id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {ARTIFACT_COLS} FROM artifacts WHERE id = ?1 AND session_id = ?2"),
                    rusqlite::params![artifact_id, session_id],
                    map_artifact,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "artifact",
                        id: format!("{session_id}/{artifact_id}"),
                    },
                    other => StoreError::Sqlite(other),
                })
            })
            .await
    }

    /// Replace the unique occurrence of `old_str` with `new_str`.
    ///
    /// The occurrence check, CAS, and version append all run inside one
    /// transaction, so a conflicting writer can never interleave between
    /// the read and the write.
    #[instrument(skip(self, old_str, new_str))]
    pub async fn update(
        &self,
        session_id: &str,
        artifact_id: &str,
        old_str: &str,
        new_str: &str,
        expected_lock: i64,
    ) -> StoreResult<Artifact> {
        let session_id_owned = session_id.to_string();
        let artifact_id_owned = artifact_id.to_string();
        let old_str = old_str.to_string();
        let new_str = new_str.to_string();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let (content, lock_version): (String, i64) = tx
                    .query_row(
                        "SELECT content, lock_version FROM artifacts WHERE id = ?1 AND session_id = ?2",
                        rusqlite::params![artifact_id_owned, session_id_owned],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "artifact",
                            id: format!("{session_id_owned}/{artifact_id_owned}"),
                        },
                        other => StoreError::Sqlite(other),
                    })?;

                if lock_version != expected_lock {
                    return Err(StoreError::VersionConflict {
                        artifact_id: artifact_id_owned,
                        expected: expected_lock,
                        actual: lock_version,
                    });
                }

                let occurrences = content.matches(old_str.as_str()).count();
                if occurrences != 1 {
                    return Err(StoreError::AmbiguousMatch {
                        artifact_id: artifact_id_owned,
                        occurrences,
                    });
                }

                let new_content = content.replacen(old_str.as_str(), new_str.as_str(), 1);
                let changes = serde_json::to_string(&vec![(old_str, new_str)])?;

                apply_versioned_write(
                    &tx,
                    &session_id_owned,
                    &artifact_id_owned,
                    &new_content,
                    expected_lock,
                    UpdateType::Update,
                    Some(&changes),
                )?;
                tx.commit()?;

                Ok(())
            })
            .await?;

        let updated = self.get(session_id, artifact_id).await?;
        debug!(
            artifact_id = %artifact_id,
            version = updated.current_version,
            "artifact updated"
        );
        Ok(updated)
    }

    /// Replace the entire content. No ambiguity check.
    #[instrument(skip(self, new_content))]
    pub async fn rewrite(
        &self,
        session_id: &str,
        artifact_id: &str,
        new_content: &str,
        expected_lock: i64,
    ) -> StoreResult<Artifact> {
        let session_id_owned = session_id.to_string();
        let artifact_id_owned = artifact_id.to_string();
        let new_content = new_content.to_string();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let lock_version: i64 = tx
                    .query_row(
                        "SELECT lock_version FROM artifacts WHERE id = ?1 AND session_id = ?2",
                        rusqlite::params![artifact_id_owned, session_id_owned],
                        |row| row.get(0),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "artifact",
                            id: format!("{session_id_owned}/{artifact_id_owned}"),
                        },
                        other => StoreError::Sqlite(other),
                    })?;

                if lock_version != expected_lock {
                    return Err(StoreError::VersionConflict {
                        artifact_id: artifact_id_owned,
                        expected: expected_lock,
                        actual: lock_version,
                    });
                }

                apply_versioned_write(
                    &tx,
                    &session_id_owned,
                    &artifact_id_owned,
                    &new_content,
                    expected_lock,
                    UpdateType::Rewrite,
                    None,
                )?;
                tx.commit()?;

                Ok(())
            })
            .await?;

        self.get(session_id, artifact_id).await
    }

    /// Update the title only. Does not touch `lock_version`.
    #[instrument(skip(self))]
    pub async fn update_title(
        &self,
        session_id: &str,
        artifact_id: &str,
        title: &str,
    ) -> StoreResult<()> {
        let session_id = session_id.to_string();
        let artifact_id = artifact_id.to_string();
        let title = title.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE artifacts SET title = ?3, updated_at = ?4 WHERE id = ?1 AND session_id = ?2",
                    rusqlite::params![artifact_id, session_id, title, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "artifact",
                        id: format!("{session_id}/{artifact_id}"),
                    });
                }
                Ok(())
            })
            .await
    }

    /// Content of a given version, or the current content when `version` is
    /// `None`.
    pub async fn read(
        &self,
        session_id: &str,
        artifact_id: &str,
        version: Option<i64>,
    ) -> StoreResult<String> {
        match version {
            None => Ok(self.get(session_id, artifact_id).await?.content),
            Some(v) => Ok(self.get_version(session_id, artifact_id, v).await?.content),
        }
    }

    /// Summaries of all artifacts in a session, optionally filtered by
    /// content type. Content is truncated to a preview.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        session_id: &str,
        content_type: Option<&str>,
    ) -> StoreResult<Vec<ArtifactSummary>> {
        let session_id = session_id.to_string();
        let content_type = content_type.map(|s| s.to_string());
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTIFACT_COLS} FROM artifacts \
                     WHERE session_id = ?1 AND (?2 IS NULL OR content_type = ?2) \
                     ORDER BY created_at ASC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![session_id, content_type], map_artifact)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(rows
                    .into_iter()
                    .map(|a| {
                        let preview = if a.content.chars().count() > PREVIEW_LENGTH {
                            let truncated: String = a.content.chars().take(PREVIEW_LENGTH).collect();
                            format!("{truncated}[...]")
                        } else {
                            a.content
                        };
                        ArtifactSummary {
                            id: a.id,
                            content_type: a.content_type,
                            title: a.title,
                            version: a.current_version,
                            lock_version: a.lock_version,
                            updated_at: a.updated_at,
                            content: Some(preview),
                        }
                    })
                    .collect())
            })
            .await
    }

    /// One version from the append-only log.
    pub async fn get_version(
        &self,
        session_id: &str,
        artifact_id: &str,
        version: i64,
    ) -> StoreResult<ArtifactVersion> {
        let session_id = session_id.to_string();
        let artifact_id = artifact_id.to_string();
        self.db
            .execute(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT version, content, update_type, changes, created_at \
                         FROM artifact_versions \
                         WHERE artifact_id = ?1 AND session_id = ?2 AND version = ?3",
                        rusqlite::params![artifact_id, session_id, version],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, Option<String>>(3)?,
                                row.get::<_, i64>(4)?,
                            ))
                        },
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "artifact version",
                            id: format!("{session_id}/{artifact_id}@{version}"),
                        },
                        other => StoreError::Sqlite(other),
                    })?;

                let changes = match row.3 {
                    Some(json) => Some(serde_json::from_str(&json)?),
                    None => None,
                };

                Ok(ArtifactVersion {
                    artifact_id,
                    session_id,
                    version: row.0,
                    content: row.1,
                    update_type: UpdateType::from_str(&row.2)?,
                    changes,
                    created_at: row.4,
                })
            })
            .await
    }

    /// The version history of an artifact (metadata only).
    pub async fn list_versions(
        &self,
        session_id: &str,
        artifact_id: &str,
    ) -> StoreResult<Vec<VersionInfo>> {
        // Surface NotFound for unknown artifacts instead of an empty list.
        self.get(session_id, artifact_id).await?;

        let session_id = session_id.to_string();
        let artifact_id = artifact_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT version, update_type, changes, created_at FROM artifact_versions \
                     WHERE artifact_id = ?1 AND session_id = ?2 ORDER BY version ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![artifact_id, session_id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(version, update_type, changes, created_at)| {
                        let change_count = match changes {
                            Some(json) => {
                                serde_json::from_str::<Vec<(String, String)>>(&json)?.len()
                            }
                            None => 0,
                        };
                        Ok(VersionInfo {
                            version,
                            update_type: UpdateType::from_str(&update_type)?,
                            created_at,
                            change_count,
                        })
                    })
                    .collect()
            })
            .await
    }

    /// Both endpoints of a version comparison.
    pub async fn diff(
        &self,
        session_id: &str,
        artifact_id: &str,
        from_version: i64,
        to_version: i64,
    ) -> StoreResult<VersionDiff> {
        let from = self.get_version(session_id, artifact_id, from_version).await?;
        let to = self.get_version(session_id, artifact_id, to_version).await?;
        Ok(VersionDiff {
            from_version,
            to_version,
            from_content: from.content,
            to_content: to.content,
            to_update_type: to.update_type,
            to_changes: to.changes,
        })
    }

    /// Delete an artifact; its versions cascade.
    pub async fn delete(&self, session_id: &str, artifact_id: &str) -> StoreResult<bool> {
        let session_id = session_id.to_string();
        let artifact_id = artifact_id.to_string();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM artifacts WHERE id = ?1 AND session_id = ?2",
                    rusqlite::params![artifact_id, session_id],
                )?;
                Ok(deleted > 0)
            })
            .await
    }

    /// Drop scratch artifacts (the task plan) at the start of a new
    /// top-level turn. Returns how many were deleted.
    #[instrument(skip(self))]
    pub async fn clear_temporary(
        &self,
        session_id: &str,
        ids: Option<&[&str]>,
    ) -> StoreResult<usize> {
        let targets: Vec<String> = ids
            .unwrap_or(TEMPORARY_ARTIFACT_IDS)
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut deleted = 0;
        for id in targets {
            if self.delete(session_id, &id).await? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            debug!(session_id = %session_id, deleted, "temporary artifacts cleared");
        }
        Ok(deleted)
    }
}

/// Write the new content with a CAS on `lock_version` and append the version
/// row. Must run inside an open transaction whose lock check already passed;
/// the CAS here is the authoritative guard against writers racing outside
/// the transaction on a different connection.
fn apply_versioned_write(
    tx: &rusqlite::Transaction<'_>,
    session_id: &str,
    artifact_id: &str,
    new_content: &str,
    expected_lock: i64,
    update_type: UpdateType,
    changes_json: Option<&str>,
) -> StoreResult<()> {
    let now = Utc::now().timestamp();

    let updated = tx.execute(
        "UPDATE artifacts SET content = ?4, \
             current_version = current_version + 1, \
             lock_version = lock_version + 1, \
             updated_at = ?5 \
         WHERE id = ?1 AND session_id = ?2 AND lock_version = ?3",
        rusqlite::params![artifact_id, session_id, expected_lock, new_content, now],
    )?;
    if updated == 0 {
        // The pre-check passed, so only a concurrent bump explains this.
        let actual: i64 = tx.query_row(
            "SELECT lock_version FROM artifacts WHERE id = ?1 AND session_id = ?2",
            rusqlite::params![artifact_id, session_id],
            |row| row.get(0),
        )?;
        return Err(StoreError::VersionConflict {
            artifact_id: artifact_id.to_string(),
            expected: expected_lock,
            actual,
        });
    }

    let new_version: i64 = tx.query_row(
        "SELECT current_version FROM artifacts WHERE id = ?1 AND session_id = ?2",
        rusqlite::params![artifact_id, session_id],
        |row| row.get(0),
    )?;

    tx.execute(
        "INSERT INTO artifact_versions (artifact_id, session_id, version, content, update_type, changes, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            artifact_id,
            session_id,
            new_version,
            new_content,
            update_type.as_str(),
            changes_json,
            now
        ],
    )?;

    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> ArtifactStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = ArtifactStore::new(db.clone());

        // Artifact sessions hang off conversations.
        db.execute(|conn| {
            conn.execute_batch(
                "INSERT INTO conversations (id, created_at, updated_at) VALUES ('s1', 0, 0);
                 INSERT INTO artifact_sessions (id, created_at, updated_at) VALUES ('s1', 0, 0);",
            )?;
            Ok(())
        })
        .await
        .unwrap();

        store
    }

    #[tokio::test]
    async fn create_sets_initial_versions() {
        let store = setup().await;
        let artifact = store
            .create("s1", "plan", "markdown", "Plan", "A\nB")
            .await
            .unwrap();
        assert_eq!(artifact.current_version, 1);
        assert_eq!(artifact.lock_version, 1);

        let versions = store.list_versions("s1", "plan").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].update_type, UpdateType::Create);
    }

    #[tokio::test]
    async fn create_duplicate_fails() {
        let store = setup().await;
        store
            .create("s1", "plan", "markdown", "Plan", "x")
            .await
            .unwrap();
        let err = store
            .create("s1", "plan", "markdown", "Plan", "y")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn create_missing_session_fails() {
        let store = setup().await;
        let err = store
            .create("nope", "plan", "markdown", "Plan", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_replaces_unique_occurrence() {
        let store = setup().await;
        store
            .create("s1", "plan", "markdown", "Plan", "A\nB")
            .await
            .unwrap();

        let updated = store.update("s1", "plan", "A", "A'", 1).await.unwrap();
        assert_eq!(updated.content, "A'\nB");
        assert_eq!(updated.current_version, 2);
        assert_eq!(updated.lock_version, 2);

        let versions = store.list_versions("s1", "plan").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].update_type, UpdateType::Update);
        assert_eq!(versions[1].change_count, 1);

        // Version 1 is still retrievable with its original content.
        let v1 = store.get_version("s1", "plan", 1).await.unwrap();
        assert_eq!(v1.content, "A\nB");
    }

    #[tokio::test]
    async fn update_zero_occurrences_is_ambiguous() {
        let store = setup().await;
        store
            .create("s1", "plan", "markdown", "Plan", "A\nB")
            .await
            .unwrap();

        let err = store.update("s1", "plan", "Z", "Y", 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::AmbiguousMatch { occurrences: 0, .. }
        ));

        // Original content unchanged, version not incremented.
        let artifact = store.get("s1", "plan").await.unwrap();
        assert_eq!(artifact.content, "A\nB");
        assert_eq!(artifact.current_version, 1);
    }

    #[tokio::test]
    async fn update_multiple_occurrences_is_ambiguous() {
        let store = setup().await;
        store
            .create("s1", "plan", "markdown", "Plan", "A A")
            .await
            .unwrap();

        let err = store.update("s1", "plan", "A", "B", 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::AmbiguousMatch { occurrences: 2, .. }
        ));
    }

    #[tokio::test]
    async fn update_with_stale_lock_conflicts() {
        let store = setup().await;
        store
            .create("s1", "plan", "markdown", "Plan", "A")
            .await
            .unwrap();
        store.update("s1", "plan", "A", "B", 1).await.unwrap();

        // A second writer that still holds lock 1 must fail.
        let err = store.update("s1", "plan", "B", "C", 1).await.unwrap_err();
        match err {
            StoreError::VersionConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected VersionConflict, got {other}"),
        }
    }

    #[tokio::test]
    async fn concurrent_updates_serialize() {
        let store = setup().await;
        store
            .create("s1", "plan", "markdown", "Plan", "A")
            .await
            .unwrap();

        let s1 = store.clone();
        let s2 = store.clone();
        let (r1, r2) = tokio::join!(
            s1.update("s1", "plan", "A", "B", 1),
            s2.update("s1", "plan", "A", "C", 1),
        );

        let successes = [r1.is_ok(), r2.is_ok()].iter().filter(|b| **b).count();
        assert_eq!(successes, 1, "exactly one concurrent update may succeed");

        let artifact = store.get("s1", "plan").await.unwrap();
        assert_eq!(artifact.lock_version, 2);
    }

    #[tokio::test]
    async fn rewrite_then_read_roundtrip() {
        let store = setup().await;
        store
            .create("s1", "notes", "markdown", "Notes", "old")
            .await
            .unwrap();

        let rewritten = store.rewrite("s1", "notes", "brand new", 1).await.unwrap();
        assert_eq!(rewritten.current_version, 2);

        let content = store.read("s1", "notes", None).await.unwrap();
        assert_eq!(content, "brand new");

        let versions = store.list_versions("s1", "notes").await.unwrap();
        assert_eq!(versions[1].update_type, UpdateType::Rewrite);
        assert_eq!(versions[1].change_count, 0);
    }

    #[tokio::test]
    async fn versions_are_dense_and_max_matches_current() {
        let store = setup().await;
        store
            .create("s1", "doc", "markdown", "Doc", "v1")
            .await
            .unwrap();
        store.rewrite("s1", "doc", "v2", 1).await.unwrap();
        store.rewrite("s1", "doc", "v3", 2).await.unwrap();

        let artifact = store.get("s1", "doc").await.unwrap();
        let versions = store.list_versions("s1", "doc").await.unwrap();

        let numbers: Vec<i64> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(artifact.current_version, *numbers.last().unwrap());
    }

    #[tokio::test]
    async fn title_update_does_not_bump_lock() {
        let store = setup().await;
        store
            .create("s1", "doc", "markdown", "Doc", "x")
            .await
            .unwrap();

        store.update_title("s1", "doc", "Renamed").await.unwrap();

        let artifact = store.get("s1", "doc").await.unwrap();
        assert_eq!(artifact.title, "Renamed");
        assert_eq!(artifact.lock_version, 1);
        assert_eq!(artifact.current_version, 1);
    }

    #[tokio::test]
    async fn list_truncates_preview() {
        let store = setup().await;
        let long = "x".repeat(500);
        store
            .create("s1", "big", "markdown", "Big", &long)
            .await
            .unwrap();
        store
            .create("s1", "small", "python", "Small", "tiny")
            .await
            .unwrap();

        let all = store.list("s1", None).await.unwrap();
        assert_eq!(all.len(), 2);
        let big = all.iter().find(|a| a.id == "big").unwrap();
        assert!(big.content.as_ref().unwrap().ends_with("[...]"));

        let filtered = store.list("s1", Some("python")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "small");
    }

    #[tokio::test]
    async fn diff_returns_both_endpoints() {
        let store = setup().await;
        store
            .create("s1", "doc", "markdown", "Doc", "one")
            .await
            .unwrap();
        store.rewrite("s1", "doc", "two", 1).await.unwrap();

        let diff = store.diff("s1", "doc", 1, 2).await.unwrap();
        assert_eq!(diff.from_content, "one");
        assert_eq!(diff.to_content, "two");
        assert_eq!(diff.to_update_type, UpdateType::Rewrite);
    }

    #[tokio::test]
    async fn clear_temporary_drops_task_plan() {
        let store = setup().await;
        store
            .create("s1", "task_plan", "markdown", "Plan", "steps")
            .await
            .unwrap();
        store
            .create("s1", "report", "markdown", "Report", "kept")
            .await
            .unwrap();

        let deleted = store.clear_temporary("s1", None).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(store.get("s1", "task_plan").await.is_err());
        assert!(store.get("s1", "report").await.is_ok());

        // Clearing again is a no-op.
        assert_eq!(store.clear_temporary("s1", None).await.unwrap(), 0);
    }
}
