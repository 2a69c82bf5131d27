//! Session model: an ordered conversation transcript plus metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::counter::TokenCounter;

use super::message::{Message, MessageCategory, MetadataValue};

/// Well-known session metadata plus a typed free-form map.
///
/// Lineage links (`continued_from` / `continued_to` / `branched_from`) are
/// first-class fields so the index and flattening code never have to parse
/// loose metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continued_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continued_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branched_from: Option<String>,
    /// Message id at which a branch diverged from its source checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_index: Option<u32>,
    /// Original session id when this is a synthesized recovery session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_from: Option<String>,
    /// True for sessions built by flattening a lineage chain.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flattened: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, MetadataValue>,
}

/// Conversation session: the unit of persistence.
///
/// The message sequence is append-only; trimming deletes entries but never
/// reorders survivors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    /// Milliseconds since epoch.
    pub created_at: i64,
    /// Milliseconds since epoch; bumped on every append.
    pub last_active: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl Session {
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("session-{}", uuid::Uuid::new_v4()),
            created_at: now,
            last_active: now,
            messages: Vec::new(),
            metadata: SessionMetadata::default(),
        }
    }

    /// Shallow copy carrying identity and metadata but no messages.
    /// Used by trimming to rebuild a session from survivors.
    pub fn empty_like(other: &Session) -> Self {
        Self {
            id: other.id.clone(),
            created_at: other.created_at,
            last_active: other.last_active,
            messages: Vec::new(),
            metadata: other.metadata.clone(),
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Sum of cached token counts. Uncounted messages contribute zero;
    /// call `update_token_counts` first when accuracy matters.
    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.tokens).sum()
    }

    pub fn messages_by_category(&self, category: MessageCategory) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.category == category)
            .collect()
    }

    pub fn add_message(&mut self, message: Message) {
        self.last_active = chrono::Utc::now().timestamp_millis();
        self.messages.push(message);
    }

    /// Recompute and cache token counts for every message.
    ///
    /// Returns the new total. Counting failures cannot happen with the
    /// synchronous counter trait, so this is infallible by construction.
    pub fn update_token_counts(&mut self, counter: &dyn TokenCounter) -> usize {
        let mut total = 0;
        for msg in &mut self.messages {
            msg.tokens = counter.count(&msg.content);
            total += msg.tokens;
        }
        total
    }

    /// Structural integrity check used by the load path.
    ///
    /// A session that fails validation is treated as corrupt even if the
    /// JSON parsed, so a truncated-but-parseable file still falls back to
    /// the backup.
    pub fn validate(&self) -> bool {
        if self.id.is_empty() {
            warn!("session rejected: empty id");
            return false;
        }
        if self.created_at <= 0 || self.last_active <= 0 {
            warn!(session_id = %self.id, "session rejected: bad timestamps");
            return false;
        }
        for msg in &self.messages {
            if msg.id.is_empty() || msg.timestamp <= 0 {
                warn!(session_id = %self.id, "session rejected: malformed message");
                return false;
            }
        }
        true
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Index entry: everything listing needs without opening the session file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionIndexEntry {
    pub created_at: i64,
    pub last_active: i64,
    pub message_count: usize,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continued_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continued_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branched_from: Option<String>,
}

impl SessionIndexEntry {
    /// Build an index entry from a session, keeping an existing title if the
    /// session itself has none.
    pub fn from_session(session: &Session, previous_title: Option<String>) -> Self {
        Self {
            created_at: session.created_at,
            last_active: session.last_active,
            message_count: session.message_count(),
            token_count: session.total_tokens(),
            title: session.metadata.title.clone().or(previous_title),
            continued_from: session.metadata.continued_from.clone(),
            continued_to: session.metadata.continued_to.clone(),
            branched_from: session.metadata.branched_from.clone(),
        }
    }
}
