//! Message model for conversation persistence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Role of a message author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Budget category of a message.
///
/// Categories drive trimming priority and per-category token ceilings.
/// `System` is never trimmed.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    /// System instructions. Exempt from trimming.
    System,
    /// Reference material: notes, loaded files, declarative context.
    Context,
    /// The main user/assistant conversation.
    Dialog,
    /// Tool results and other machine output.
    SystemOutput,
}

impl MessageCategory {
    /// All categories, in priority order (highest first).
    pub const ALL: [MessageCategory; 4] = [
        MessageCategory::System,
        MessageCategory::Context,
        MessageCategory::Dialog,
        MessageCategory::SystemOutput,
    ];

    /// Trim order: lowest-priority category is trimmed first.
    /// `System` is deliberately absent.
    pub const TRIM_ORDER: [MessageCategory; 3] = [
        MessageCategory::SystemOutput,
        MessageCategory::Dialog,
        MessageCategory::Context,
    ];
}

/// One part of a multi-part message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { source: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(source: impl Into<String>) -> Self {
        Self::Image {
            source: source.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

/// Message body: plain text or a list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// True if any part is an image.
    pub fn contains_image(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts.iter().any(ContentPart::is_image),
        }
    }

    /// Concatenated text of all textual parts, for matching and titles.
    pub fn text_lossy(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Typed metadata value. Kept deliberately narrow so serialized sessions
/// stay schema-precise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl MetadataValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Single message in a session.
///
/// `tokens == 0` means the message has not been counted yet; counts are
/// computed lazily through the injected counter and cached here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    pub category: MessageCategory,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetadataValue>,
    #[serde(default)]
    pub tokens: usize,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>, category: MessageCategory) -> Self {
        Self {
            id: format!("msg-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            role,
            content: content.into(),
            category,
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: BTreeMap::new(),
            tokens: 0,
        }
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content, MessageCategory::Dialog)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content, MessageCategory::Dialog)
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content, MessageCategory::System)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The metadata `type` tag, if set. Used for system-message dedupe
    /// during lineage flattening and for marker recognition.
    pub fn type_tag(&self) -> Option<&str> {
        self.metadata.get("type").and_then(MetadataValue::as_text)
    }
}
