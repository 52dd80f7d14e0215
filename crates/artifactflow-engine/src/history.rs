//! History compression.
//!
//! Applied at history-building time, never at storage: when the
//! concatenated content exceeds the level's character budget, the most
//! recent messages are kept verbatim, the remaining budget is filled from
//! newest to oldest, and everything older collapses into one truncation
//! marker.

use artifactflow_agent::ChatMessage;

/// How aggressively to compress, by total character budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Effectively uncompressed.
    Full,
    /// The default for interactive runs.
    #[default]
    Normal,
    Compact,
    Minimal,
}

impl CompressionLevel {
    /// Maximum total characters for this level.
    pub fn max_chars(&self) -> usize {
        match self {
            Self::Full => 100_000,
            Self::Normal => 40_000,
            Self::Compact => 20_000,
            Self::Minimal => 5_000,
        }
    }
}

/// Number of recent messages always kept verbatim.
pub const PRESERVE_RECENT: usize = 5;

fn total_chars(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.content.chars().count()).sum()
}

/// Whether `messages` exceed the level's budget.
pub fn should_compress(messages: &[ChatMessage], level: CompressionLevel) -> bool {
    !messages.is_empty() && total_chars(messages) > level.max_chars()
}

/// Compress `messages` to fit the level's budget.
///
/// The most recent [`PRESERVE_RECENT`] messages survive unconditionally;
/// older messages are kept newest-first while they fit, and the rest are
/// replaced by a single `[N earlier messages truncated]` marker.
pub fn compress_messages(messages: &[ChatMessage], level: CompressionLevel) -> Vec<ChatMessage> {
    if messages.is_empty() || level == CompressionLevel::Full {
        return messages.to_vec();
    }

    let max_chars = level.max_chars();
    if total_chars(messages) <= max_chars {
        return messages.to_vec();
    }

    if messages.len() <= PRESERVE_RECENT {
        return messages.to_vec();
    }

    let split = messages.len() - PRESERVE_RECENT;
    let (older, recent) = messages.split_at(split);

    let recent_chars = total_chars(recent);
    let remaining = max_chars.saturating_sub(recent_chars);

    if remaining == 0 {
        // Recent messages alone already blow the budget; keep them plus
        // the marker.
        let mut result = vec![truncation_marker(older.len())];
        result.extend(recent.iter().cloned());
        return result;
    }

    // Fill the remaining budget from newest to oldest.
    let mut kept: Vec<ChatMessage> = Vec::new();
    let mut used = 0;
    for msg in older.iter().rev() {
        let len = msg.content.chars().count();
        if used + len > remaining {
            break;
        }
        kept.push(msg.clone());
        used += len;
    }
    kept.reverse();

    let truncated = older.len() - kept.len();
    let mut result = Vec::with_capacity(kept.len() + recent.len() + 1);
    if truncated > 0 {
        result.push(truncation_marker(truncated));
    }
    result.extend(kept);
    result.extend(recent.iter().cloned());
    result
}

fn truncation_marker(count: usize) -> ChatMessage {
    ChatMessage::system(format!("[{count} earlier messages truncated]"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
