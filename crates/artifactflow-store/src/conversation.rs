//! Conversation persistence: a tree of user messages with branch history.
//!
//! A conversation owns a forest of messages linked by `parent_id` and an
//! `active_branch` pointer naming the leaf the next message will attach to.
//! Branch switching is expressed purely by which leaf `active_branch`
//! references. Every conversation owns exactly one artifact session sharing
//! its id; the two rows are created in the same transaction.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A conversation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: String,
    /// Owning user, if the deployment tracks ownership.
    pub user_id: Option<String>,
    /// Optional display title.
    pub title: Option<String>,
    /// The message id the next turn will attach to, or `None` when empty.
    pub active_branch: Option<String>,
    /// Unix timestamp when the conversation was created.
    pub created_at: i64,
    /// Unix timestamp when the conversation was last updated.
    pub updated_at: i64,
}

/// A single message in a conversation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: String,
    /// The conversation this message belongs to.
    pub conversation_id: String,
    /// Parent message, or `None` for a root.
    pub parent_id: Option<String>,
    /// The user's message content.
    pub content: String,
    /// The run that produced (or will produce) this message's response.
    pub run_id: String,
    /// The agent's final response; `None` until the run completes.
    pub response: Option<String>,
    /// Unix timestamp when the message was created.
    pub created_at: i64,
}

/// One entry of a flattened conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// The message or response text.
    pub content: String,
}

fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        active_branch: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        parent_id: row.get(2)?,
        content: row.get(3)?,
        run_id: row.get(4)?,
        response: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const CONVERSATION_COLS: &str = "id, user_id, title, active_branch, created_at, updated_at";
const MESSAGE_COLS: &str = "id, conversation_id, parent_id, content, run_id, response, created_at";

// ═══════════════════════════════════════════════════════════════════════
//  ConversationStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD and tree queries over conversations and their messages.
#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    /// Create a new conversation store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a conversation and its artifact session in one transaction.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        id: &str,
        user_id: Option<&str>,
        title: Option<&str>,
    ) -> StoreResult<Conversation> {
        let id = id.to_string();
        let user_id = user_id.map(|s| s.to_string());
        let title = title.map(|s| s.to_string());
        let now = Utc::now().timestamp();

        let conversation = Conversation {
            id: id.clone(),
            user_id: user_id.clone(),
            title: title.clone(),
            active_branch: None,
            created_at: now,
            updated_at: now,
        };

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO conversations (id, user_id, title, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    rusqlite::params![id, user_id, title, now],
                )?;
                if inserted == 0 {
                    return Err(StoreError::Duplicate {
                        entity: "conversation",
                        id,
                    });
                }
                tx.execute(
                    "INSERT INTO artifact_sessions (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
                    rusqlite::params![id, now],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        debug!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    /// Idempotent create: returns the existing conversation if present.
    pub async fn ensure_exists(&self, id: &str) -> StoreResult<Conversation> {
        match self.get(id).await {
            Ok(conv) => Ok(conv),
            Err(StoreError::NotFound { .. }) => match self.create(id, None, None).await {
                Ok(conv) => Ok(conv),
                // Lost a race against a concurrent creator; re-read.
                Err(StoreError::Duplicate { .. }) => self.get(id).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Fetch a single conversation by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Conversation> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"),
                    rusqlite::params![id],
                    map_conversation,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "conversation",
                        id: id.clone(),
                    },
                    other => StoreError::Sqlite(other),
                })
            })
            .await
    }

    /// List conversations ordered by most recently updated, with pagination.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: u32, offset: u32) -> StoreResult<Vec<Conversation>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CONVERSATION_COLS} FROM conversations \
                     ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![limit, offset], map_conversation)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Count all conversations.
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let c: i64 =
                    conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
    }

    /// Update a conversation's title.
    #[instrument(skip(self))]
    pub async fn update_title(&self, id: &str, title: &str) -> StoreResult<()> {
        let id = id.to_string();
        let title = title.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE conversations SET title = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, title, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "conversation",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Delete a conversation; messages, the artifact session, artifacts and
    /// their versions go with it (foreign-key cascades).
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM conversations WHERE id = ?1", rusqlite::params![id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "conversation",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    // ── messages ─────────────────────────────────────────────────────

    /// Append a message to a conversation.
    ///
    /// When `parent_id` is `None`, the conversation's current
    /// `active_branch` becomes the parent. The new message becomes the
    /// active branch and the conversation's `updated_at` is bumped, all in
    /// one transaction.
    #[instrument(skip(self, content))]
    pub async fn add_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
        run_id: &str,
        parent_id: Option<&str>,
    ) -> StoreResult<Message> {
        let conversation_id = conversation_id.to_string();
        let message_id = message_id.to_string();
        let content = content.to_string();
        let run_id = run_id.to_string();
        let parent_id = parent_id.map(|s| s.to_string());
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let active_branch: Option<String> = tx
                    .query_row(
                        "SELECT active_branch FROM conversations WHERE id = ?1",
                        rusqlite::params![conversation_id],
                        |row| row.get(0),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "conversation",
                            id: conversation_id.clone(),
                        },
                        other => StoreError::Sqlite(other),
                    })?;

                let exists: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM messages WHERE id = ?1",
                    rusqlite::params![message_id],
                    |row| row.get(0),
                )?;
                if exists > 0 {
                    return Err(StoreError::Duplicate {
                        entity: "message",
                        id: message_id,
                    });
                }

                let parent = parent_id.or(active_branch);

                // A parent must live in the same conversation.
                if let Some(ref pid) = parent {
                    let parent_conv: String = tx
                        .query_row(
                            "SELECT conversation_id FROM messages WHERE id = ?1",
                            rusqlite::params![pid],
                            |row| row.get(0),
                        )
                        .map_err(|e| match e {
                            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                                entity: "message",
                                id: pid.clone(),
                            },
                            other => StoreError::Sqlite(other),
                        })?;
                    if parent_conv != conversation_id {
                        return Err(StoreError::InvalidArgument(format!(
                            "parent message `{pid}` belongs to a different conversation"
                        )));
                    }
                }

                tx.execute(
                    "INSERT INTO messages (id, conversation_id, parent_id, content, run_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![message_id, conversation_id, parent, content, run_id, now],
                )?;
                tx.execute(
                    "UPDATE conversations SET active_branch = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![conversation_id, message_id, now],
                )?;
                tx.commit()?;

                Ok(Message {
                    id: message_id,
                    conversation_id,
                    parent_id: parent,
                    content,
                    run_id,
                    response: None,
                    created_at: now,
                })
            })
            .await
    }

    /// Fetch a single message by id.
    pub async fn get_message(&self, message_id: &str) -> StoreResult<Message> {
        let message_id = message_id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                    rusqlite::params![message_id],
                    map_message,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "message",
                        id: message_id.clone(),
                    },
                    other => StoreError::Sqlite(other),
                })
            })
            .await
    }

    /// Set the agent's final response on a message and bump the
    /// conversation's `updated_at`.
    #[instrument(skip(self, response))]
    pub async fn update_response(&self, message_id: &str, response: &str) -> StoreResult<()> {
        let message_id = message_id.to_string();
        let response = response.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE messages SET response = ?2 WHERE id = ?1",
                    rusqlite::params![message_id, response],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "message",
                        id: message_id,
                    });
                }
                conn.execute(
                    "UPDATE conversations SET updated_at = ?2 \
                     WHERE id = (SELECT conversation_id FROM messages WHERE id = ?1)",
                    rusqlite::params![message_id, now],
                )?;
                Ok(())
            })
            .await
    }

    /// All messages of a conversation, ordered by creation time.
    pub async fn messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let conversation_id = conversation_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages \
                     WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![conversation_id], map_message)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    // ── tree queries ─────────────────────────────────────────────────

    /// Walk `parent_id` links from the target (or `active_branch`) up to a
    /// root, returning the ordered root→target path.
    #[instrument(skip(self))]
    pub async fn path(
        &self,
        conversation_id: &str,
        to_message_id: Option<&str>,
    ) -> StoreResult<Vec<Message>> {
        let conversation = self.get(conversation_id).await?;
        let target = match to_message_id
            .map(|s| s.to_string())
            .or(conversation.active_branch)
        {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };

        let all = self.messages(conversation_id).await?;
        let by_id: std::collections::HashMap<String, Message> =
            all.into_iter().map(|m| (m.id.clone(), m)).collect();

        let mut path = Vec::new();
        let mut current = Some(target);
        while let Some(id) = current {
            match by_id.get(&id) {
                Some(msg) => {
                    current = msg.parent_id.clone();
                    path.push(msg.clone());
                }
                None => break,
            }
        }
        path.reverse();
        Ok(path)
    }

    /// The children of a message: siblings at a branch point.
    pub async fn children(
        &self,
        conversation_id: &str,
        parent_id: &str,
    ) -> StoreResult<Vec<Message>> {
        let conversation_id = conversation_id.to_string();
        let parent_id = parent_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages \
                     WHERE conversation_id = ?1 AND parent_id = ?2 \
                     ORDER BY created_at ASC, id ASC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![conversation_id, parent_id], map_message)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Parent→children adjacency for the whole conversation tree.
    pub async fn branch_structure(
        &self,
        conversation_id: &str,
    ) -> StoreResult<std::collections::HashMap<String, Vec<String>>> {
        let messages = self.messages(conversation_id).await?;
        let mut branches: std::collections::HashMap<String, Vec<String>> =
            std::collections::HashMap::new();
        for msg in messages {
            if let Some(parent) = msg.parent_id {
                branches.entry(parent).or_default().push(msg.id);
            }
        }
        Ok(branches)
    }

    /// Flatten the path into an interleaved user/assistant transcript
    /// suitable for LLM context. Messages without a response contribute
    /// only their user entry.
    pub async fn format_history(
        &self,
        conversation_id: &str,
        to_message_id: Option<&str>,
    ) -> StoreResult<Vec<HistoryEntry>> {
        let path = self.path(conversation_id, to_message_id).await?;
        let mut history = Vec::with_capacity(path.len() * 2);
        for msg in path {
            history.push(HistoryEntry {
                role: "user".into(),
                content: msg.content,
            });
            if let Some(response) = msg.response {
                history.push(HistoryEntry {
                    role: "assistant".into(),
                    content: response,
                });
            }
        }
        Ok(history)
    }
}

// ── tests ────────────────────────────────────────────────────────────
