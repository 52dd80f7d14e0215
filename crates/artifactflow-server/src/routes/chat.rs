//! Chat routes: send messages, browse conversations, resume interrupts.
//!
//! POST /chat returns immediately with the run's stream URL; the graph
//! executes in the background through the task manager and events flow
//! into the run's buffer until the SSE consumer drains them.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ApiError, ApiResult};
use crate::extract::CurrentUser;
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", post(send_message).get(list_conversations))
        .route("/{id}", get(get_conversation).delete(delete_conversation))
        .route("/{id}/resume", post(resume_execution))
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ChatBody {
    pub content: String,
    pub conversation_id: Option<String>,
    pub parent_message_id: Option<String>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub message_id: String,
    pub run_id: String,
    pub stream_url: String,
}

#[derive(Deserialize)]
pub struct ResumeBody {
    pub run_id: String,
    pub message_id: String,
    pub approved: bool,
}

#[derive(Serialize)]
pub struct ResumeResponse {
    pub stream_url: String,
}

#[derive(Deserialize)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Serialize)]
pub struct ConversationList {
    pub conversations: Vec<ConversationSummary>,
    pub has_more: bool,
}

#[derive(Serialize)]
pub struct MessageView {
    pub id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub run_id: String,
    pub response: Option<String>,
    pub created_at: i64,
    pub children: Vec<String>,
}

#[derive(Serialize)]
pub struct ConversationDetail {
    pub id: String,
    pub title: Option<String>,
    pub active_branch: Option<String>,
    pub session_id: String,
    pub messages: Vec<MessageView>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn stream_url(run_id: &str) -> String {
    format!("/api/v1/stream/{run_id}")
}

/// POST /api/v1/chat
async fn send_message(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<ChatResponse>> {
    if body.content.trim().is_empty() {
        return Err(ApiError::Validation("content must not be empty".into()));
    }

    let run = state
        .controller
        .start_message(body.conversation_id)
        .await?;

    let controller = Arc::clone(&state.controller);
    let work: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
        Box::pin(controller.drive_new_message(run.clone(), body.content, body.parent_message_id));
    state.tasks.submit(&run.run_id, work);

    Ok(Json(ChatResponse {
        stream_url: stream_url(&run.run_id),
        conversation_id: run.conversation_id,
        message_id: run.message_id,
        run_id: run.run_id,
    }))
}

/// GET /api/v1/chat?limit&offset
async fn list_conversations(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<ConversationList>> {
    let limit = page.limit.unwrap_or(20).min(100);
    let offset = page.offset.unwrap_or(0);

    // Fetch one extra row to detect another page.
    let mut conversations = state.conversations.list(limit + 1, offset).await?;
    let has_more = conversations.len() as u32 > limit;
    conversations.truncate(limit as usize);

    Ok(Json(ConversationList {
        conversations: conversations
            .into_iter()
            .map(|c| ConversationSummary {
                id: c.id,
                title: c.title,
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect(),
        has_more,
    }))
}

/// GET /api/v1/chat/{id}
async fn get_conversation(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ConversationDetail>> {
    let conversation = state.conversations.get(&id).await?;
    let messages = state.conversations.messages(&id).await?;
    let children_map = state.conversations.branch_structure(&id).await?;

    Ok(Json(ConversationDetail {
        session_id: conversation.id.clone(),
        id: conversation.id,
        title: conversation.title,
        active_branch: conversation.active_branch,
        messages: messages
            .into_iter()
            .map(|m| MessageView {
                children: children_map.get(&m.id).cloned().unwrap_or_default(),
                id: m.id,
                parent_id: m.parent_id,
                content: m.content,
                run_id: m.run_id,
                response: m.response,
                created_at: m.created_at,
            })
            .collect(),
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
    }))
}

/// DELETE /api/v1/chat/{id}
async fn delete_conversation(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.conversations.delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/v1/chat/{id}/resume
async fn resume_execution(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Path(conversation_id): Path<String>,
    Json(body): Json<ResumeBody>,
) -> ApiResult<Json<ResumeResponse>> {
    state
        .controller
        .start_resume(&conversation_id, &body.run_id, &body.message_id)
        .await?;

    let controller = Arc::clone(&state.controller);
    let work: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
        Box::pin(controller.drive_resume(
            conversation_id,
            body.run_id.clone(),
            body.message_id,
            body.approved,
        ));
    state.tasks.submit(&body.run_id, work);

    Ok(Json(ResumeResponse {
        stream_url: stream_url(&body.run_id),
    }))
}
