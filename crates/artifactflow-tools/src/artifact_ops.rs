//! Artifact tools.
//!
//! These give agents CRUD access to the conversation's artifact session.
//! Each instance is bound to one session at run preparation time; the store
//! itself is shared. Optimistic-lock conflicts and ambiguous matches come
//! back as tool errors so the LLM can re-read the artifact and retry;
//! they never terminate the run.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use artifactflow_store::{ArtifactStore, StoreError};

use crate::base::{Tool, ToolParameter, ToolResult};

fn store_error_result(err: StoreError) -> ToolResult {
    match err {
        StoreError::VersionConflict { .. }
        | StoreError::AmbiguousMatch { .. }
        | StoreError::NotFound { .. }
        | StoreError::Duplicate { .. } => ToolResult::err(err.to_string()),
        other => ToolResult::err(format!("artifact operation failed: {other}")),
    }
}

fn artifact_payload(artifact: &artifactflow_store::Artifact) -> Value {
    json!({
        "id": artifact.id,
        "title": artifact.title,
        "content_type": artifact.content_type,
        "version": artifact.current_version,
        "lock_version": artifact.lock_version,
    })
}

// ---------------------------------------------------------------------------
// create_artifact
// ---------------------------------------------------------------------------

/// Creates a new artifact in the bound session.
pub struct CreateArtifactTool {
    store: ArtifactStore,
    session_id: String,
}

impl CreateArtifactTool {
    pub fn new(store: ArtifactStore, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl Tool for CreateArtifactTool {
    fn name(&self) -> &str {
        "create_artifact"
    }

    fn description(&self) -> &str {
        "Create a new artifact (document, report, code file) in this session. \
         Fails if the artifact id already exists; use update_artifact or \
         rewrite_artifact to change an existing one."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("id", "string", "Artifact id, unique in this session (e.g. \"research_report\")"),
            ToolParameter::required("content_type", "string", "Content type: \"markdown\", \"python\", \"txt\", ..."),
            ToolParameter::required("title", "string", "Human-readable title"),
            ToolParameter::required("content", "string", "Initial full content"),
        ]
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let id = params["id"].as_str().unwrap_or_default();
        let content_type = params["content_type"].as_str().unwrap_or_default();
        let title = params["title"].as_str().unwrap_or_default();
        let content = params["content"].as_str().unwrap_or_default();

        if id.is_empty() {
            return ToolResult::err("artifact id must not be empty");
        }

        match self
            .store
            .create(&self.session_id, id, content_type, title, content)
            .await
        {
            Ok(artifact) => {
                debug!(artifact_id = %id, session = %self.session_id, "artifact created");
                ToolResult::ok(artifact_payload(&artifact))
            }
            Err(e) => store_error_result(e),
        }
    }
}

// ---------------------------------------------------------------------------
// update_artifact
// ---------------------------------------------------------------------------

/// Replaces the unique occurrence of `old_str` in an artifact.
pub struct UpdateArtifactTool {
    store: ArtifactStore,
    session_id: String,
}

impl UpdateArtifactTool {
    pub fn new(store: ArtifactStore, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl Tool for UpdateArtifactTool {
    fn name(&self) -> &str {
        "update_artifact"
    }

    fn description(&self) -> &str {
        "Replace one unique occurrence of old_str with new_str in an artifact. \
         Pass the lock_version you last observed; on a version conflict, \
         read_artifact again and retry with the fresh lock_version."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("id", "string", "Artifact id"),
            ToolParameter::required("old_str", "string", "Exact text to replace; must occur exactly once"),
            ToolParameter::required("new_str", "string", "Replacement text"),
            ToolParameter::required("lock_version", "integer", "The lock_version observed when the artifact was last read"),
        ]
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let id = params["id"].as_str().unwrap_or_default();
        let old_str = params["old_str"].as_str().unwrap_or_default();
        let new_str = params["new_str"].as_str().unwrap_or_default();
        let expected_lock = match params["lock_version"].as_i64() {
            Some(v) => v,
            None => return ToolResult::err("lock_version must be an integer"),
        };

        match self
            .store
            .update(&self.session_id, id, old_str, new_str, expected_lock)
            .await
        {
            Ok(artifact) => ToolResult::ok(artifact_payload(&artifact)),
            Err(e) => store_error_result(e),
        }
    }
}

// ---------------------------------------------------------------------------
// rewrite_artifact
// ---------------------------------------------------------------------------

/// Replaces the entire content of an artifact.
pub struct RewriteArtifactTool {
    store: ArtifactStore,
    session_id: String,
}

impl RewriteArtifactTool {
    pub fn new(store: ArtifactStore, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl Tool for RewriteArtifactTool {
    fn name(&self) -> &str {
        "rewrite_artifact"
    }

    fn description(&self) -> &str {
        "Replace the entire content of an artifact. Use for major restructuring; \
         prefer update_artifact for small changes. Requires the observed \
         lock_version, like update_artifact."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("id", "string", "Artifact id"),
            ToolParameter::required("content", "string", "New full content"),
            ToolParameter::required("lock_version", "integer", "The lock_version observed when the artifact was last read"),
        ]
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let id = params["id"].as_str().unwrap_or_default();
        let content = params["content"].as_str().unwrap_or_default();
        let expected_lock = match params["lock_version"].as_i64() {
            Some(v) => v,
            None => return ToolResult::err("lock_version must be an integer"),
        };

        match self
            .store
            .rewrite(&self.session_id, id, content, expected_lock)
            .await
        {
            Ok(artifact) => ToolResult::ok(artifact_payload(&artifact)),
            Err(e) => store_error_result(e),
        }
    }
}

// ---------------------------------------------------------------------------
// read_artifact
// ---------------------------------------------------------------------------

/// Reads an artifact's content, current or at a given version.
pub struct ReadArtifactTool {
    store: ArtifactStore,
    session_id: String,
}

impl ReadArtifactTool {
    pub fn new(store: ArtifactStore, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl Tool for ReadArtifactTool {
    fn name(&self) -> &str {
        "read_artifact"
    }

    fn description(&self) -> &str {
        "Read an artifact's full content. Returns the current version unless a \
         historical version number is given; also returns the current \
         lock_version needed for updates."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("id", "string", "Artifact id"),
            ToolParameter::optional("version", "integer", "Historical version to read (default: current)"),
        ]
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let id = params["id"].as_str().unwrap_or_default();
        let version = params["version"].as_i64();

        let artifact = match self.store.get(&self.session_id, id).await {
            Ok(a) => a,
            Err(e) => return store_error_result(e),
        };

        let content = match version {
            None => artifact.content.clone(),
            Some(v) => match self.store.read(&self.session_id, id, Some(v)).await {
                Ok(c) => c,
                Err(e) => return store_error_result(e),
            },
        };

        ToolResult::ok(json!({
            "id": artifact.id,
            "title": artifact.title,
            "content_type": artifact.content_type,
            "version": version.unwrap_or(artifact.current_version),
            "lock_version": artifact.lock_version,
            "content": content,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use artifactflow_store::Database;

    async fn setup() -> ArtifactStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        db.execute(|conn| {
            conn.execute_batch(
                "INSERT INTO conversations (id, created_at, updated_at) VALUES ('s1', 0, 0);
                 INSERT INTO artifact_sessions (id, created_at, updated_at) VALUES ('s1', 0, 0);",
            )?;
            Ok(())
        })
        .await
        .unwrap();
        ArtifactStore::new(db)
    }

    #[tokio::test]
    async fn create_then_update_then_read() {
        let store = setup().await;
        let create = CreateArtifactTool::new(store.clone(), "s1");
        let update = UpdateArtifactTool::new(store.clone(), "s1");
        let read = ReadArtifactTool::new(store.clone(), "s1");

        let result = create
            .call(json!({
                "id": "plan",
                "content_type": "markdown",
                "title": "Plan",
                "content": "A\nB"
            }))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data.as_ref().unwrap()["lock_version"], 1);

        let result = update
            .call(json!({
                "id": "plan",
                "old_str": "A",
                "new_str": "A'",
                "lock_version": 1
            }))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data.as_ref().unwrap()["version"], 2);

        let result = read.call(json!({"id": "plan"})).await;
        assert!(result.success);
        assert_eq!(result.data.as_ref().unwrap()["content"], "A'\nB");

        // Version 1 is still readable.
        let result = read.call(json!({"id": "plan", "version": 1})).await;
        assert!(result.success);
        assert_eq!(result.data.as_ref().unwrap()["content"], "A\nB");
    }

    #[tokio::test]
    async fn stale_lock_surfaces_as_tool_error() {
        let store = setup().await;
        let create = CreateArtifactTool::new(store.clone(), "s1");
        let update = UpdateArtifactTool::new(store.clone(), "s1");

        create
            .call(json!({
                "id": "doc", "content_type": "markdown", "title": "Doc", "content": "x"
            }))
            .await;
        update
            .call(json!({"id": "doc", "old_str": "x", "new_str": "y", "lock_version": 1}))
            .await;

        let stale = update
            .call(json!({"id": "doc", "old_str": "y", "new_str": "z", "lock_version": 1}))
            .await;
        assert!(!stale.success);
        assert!(stale.error.unwrap().contains("version conflict"));
    }

    #[tokio::test]
    async fn duplicate_create_is_a_tool_error() {
        let store = setup().await;
        let create = CreateArtifactTool::new(store.clone(), "s1");

        let params = json!({
            "id": "doc", "content_type": "markdown", "title": "Doc", "content": "x"
        });
        assert!(create.call(params.clone()).await.success);
        let dup = create.call(params).await;
        assert!(!dup.success);
        assert!(dup.error.unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn rewrite_replaces_everything() {
        let store = setup().await;
        let create = CreateArtifactTool::new(store.clone(), "s1");
        let rewrite = RewriteArtifactTool::new(store.clone(), "s1");
        let read = ReadArtifactTool::new(store.clone(), "s1");

        create
            .call(json!({
                "id": "doc", "content_type": "markdown", "title": "Doc", "content": "old stuff"
            }))
            .await;
        let result = rewrite
            .call(json!({"id": "doc", "content": "new stuff", "lock_version": 1}))
            .await;
        assert!(result.success);

        let result = read.call(json!({"id": "doc"})).await;
        assert_eq!(result.data.unwrap()["content"], "new stuff");
    }

    #[tokio::test]
    async fn read_missing_artifact_is_not_found() {
        let store = setup().await;
        let read = ReadArtifactTool::new(store, "s1");
        let result = read.call(json!({"id": "ghost"})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }
}
