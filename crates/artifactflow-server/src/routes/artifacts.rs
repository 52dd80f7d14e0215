//! Artifact read routes.
//!
//! Read-only: mutation happens exclusively through agent tools during a
//! run. The session id equals the conversation id.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use artifactflow_store::{ArtifactSummary, VersionInfo};

use crate::error::ApiResult;
use crate::extract::CurrentUser;
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/{session_id}", get(list_artifacts))
        .route("/{session_id}/{artifact_id}", get(read_artifact))
        .route("/{session_id}/{artifact_id}/versions", get(list_versions))
        .route(
            "/{session_id}/{artifact_id}/versions/{version}",
            get(read_version),
        )
}

#[derive(Deserialize)]
pub struct ListFilter {
    pub content_type: Option<String>,
}

#[derive(Serialize)]
pub struct ArtifactDetail {
    pub id: String,
    pub session_id: String,
    pub content_type: String,
    pub title: String,
    pub content: String,
    pub version: i64,
    pub lock_version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Serialize)]
pub struct VersionDetail {
    pub version: i64,
    pub update_type: String,
    pub content: String,
    pub created_at: i64,
}

/// GET /api/v1/artifacts/{session_id}
async fn list_artifacts(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Path(session_id): Path<String>,
    Query(filter): Query<ListFilter>,
) -> ApiResult<Json<Vec<ArtifactSummary>>> {
    let artifacts = state
        .artifacts
        .list(&session_id, filter.content_type.as_deref())
        .await?;
    Ok(Json(artifacts))
}

/// GET /api/v1/artifacts/{session_id}/{artifact_id}
async fn read_artifact(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Path((session_id, artifact_id)): Path<(String, String)>,
) -> ApiResult<Json<ArtifactDetail>> {
    let artifact = state.artifacts.get(&session_id, &artifact_id).await?;
    Ok(Json(ArtifactDetail {
        id: artifact.id,
        session_id: artifact.session_id,
        content_type: artifact.content_type,
        title: artifact.title,
        content: artifact.content,
        version: artifact.current_version,
        lock_version: artifact.lock_version,
        created_at: artifact.created_at,
        updated_at: artifact.updated_at,
    }))
}

/// GET /api/v1/artifacts/{session_id}/{artifact_id}/versions
async fn list_versions(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Path((session_id, artifact_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<VersionInfo>>> {
    let versions = state
        .artifacts
        .list_versions(&session_id, &artifact_id)
        .await?;
    Ok(Json(versions))
}

/// GET /api/v1/artifacts/{session_id}/{artifact_id}/versions/{version}
async fn read_version(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Path((session_id, artifact_id, version)): Path<(String, String, i64)>,
) -> ApiResult<Json<VersionDetail>> {
    let v = state
        .artifacts
        .get_version(&session_id, &artifact_id, version)
        .await?;
    Ok(Json(VersionDetail {
        version: v.version,
        update_type: format!("{:?}", v.update_type).to_lowercase(),
        content: v.content,
        created_at: v.created_at,
    }))
}
