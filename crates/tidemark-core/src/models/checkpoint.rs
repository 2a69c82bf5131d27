//! Checkpoint models: immutable point-in-time copies of session state.

use serde::{Deserialize, Serialize};

use super::session::Session;

/// How a checkpoint came to exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointType {
    /// Created automatically every N messages.
    Auto,
    /// Created explicitly by the user, optionally named.
    Manual,
    /// Created when branching from another checkpoint.
    Branch,
    /// Safety snapshot taken just before a rollback replaces live state.
    Rollback,
}

/// Checkpoint metadata, kept in the index for file-free listing.
///
/// Immutable once written; only retention removes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub id: String,
    pub kind: CheckpointType,
    /// Milliseconds since epoch.
    pub created_at: i64,
    pub session_id: String,
    /// The message that triggered this checkpoint.
    pub message_id: String,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub auto: bool,
}

impl CheckpointMetadata {
    /// Create metadata with a fresh unique id (timestamp + random suffix).
    pub fn new(kind: CheckpointType, session: &Session, message_id: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
        Self {
            id: format!("cp-{now}-{suffix}"),
            kind,
            created_at: now,
            session_id: session.id.clone(),
            message_id,
            message_count: session.message_count(),
            name: None,
            description: None,
            auto: kind == CheckpointType::Auto,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// What actually lands in a checkpoint file (before compression).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    pub metadata: CheckpointMetadata,
    pub session: Session,
}
