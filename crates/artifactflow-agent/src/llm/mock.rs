//! Scripted [`ChatModel`] for tests.
//!
//! Responses are consumed in order; each is either a text reply (optionally
//! with reasoning) or an error. Requests are recorded for assertions.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AgentError, LlmErrorKind, Result};
use crate::llm::client::ChatModel;
use crate::llm::types::{ChatOutcome, ChatRequest, StreamChunk, TokenUsage};

/// One scripted reply.
pub enum MockReply {
    /// Stream the text (and optional reasoning) as chunks, then succeed.
    Text {
        content: String,
        reasoning: Option<String>,
    },
    /// Fail with the given error kind.
    Error { kind: LlmErrorKind, message: String },
}

impl MockReply {
    /// A plain text reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            reasoning: None,
        }
    }

    /// A reply with a reasoning trace.
    pub fn with_reasoning(content: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            reasoning: Some(reasoning.into()),
        }
    }

    /// An error reply.
    pub fn error(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

/// A scripted chat model.
#[derive(Default)]
pub struct MockChatModel {
    replies: Mutex<Vec<MockReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatModel {
    /// Build a mock that serves `replies` in order.
    pub fn new(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<ChatOutcome> {
        self.requests.lock().unwrap().push(request.clone());

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(AgentError::Internal(
                    "mock chat model ran out of scripted replies".into(),
                ));
            }
            replies.remove(0)
        };

        match reply {
            MockReply::Text { content, reasoning } => {
                if let Some(ref r) = reasoning {
                    on_chunk(StreamChunk::Reasoning(r.clone()));
                }
                // Stream the content in two halves so callers see real
                // incremental behavior.
                let mut mid = content.len() / 2;
                while !content.is_char_boundary(mid) {
                    mid -= 1;
                }
                let (a, b) = content.split_at(mid);
                if !a.is_empty() {
                    on_chunk(StreamChunk::Content(a.to_owned()));
                }
                if !b.is_empty() {
                    on_chunk(StreamChunk::Content(b.to_owned()));
                }

                let usage = TokenUsage {
                    input_tokens: 10,
                    output_tokens: content.len() as u32 / 4 + 1,
                };
                on_chunk(StreamChunk::Usage(usage));

                let outcome = ChatOutcome {
                    content,
                    reasoning,
                    usage,
                };
                on_chunk(StreamChunk::Final(outcome.clone()));
                Ok(outcome)
            }
            MockReply::Error { kind, message } => Err(AgentError::llm(kind, message)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
