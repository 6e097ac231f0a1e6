//! `TranscriptStore` trait and the persisted record shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Who produced a transcript entry. Only these two values are ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Bot,
    User,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot" => Ok(Self::Bot),
            "user" => Ok(Self::User),
            other => Err(DatabaseError::Constraint(format!(
                "invalid message role '{other}'"
            ))),
        }
    }
}

/// One entry of a stored transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptMessage {
    /// Create an entry stamped with the current time.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A completed intake conversation, persisted as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRecord {
    #[serde(skip)]
    pub id: Uuid,
    pub user_id: String,
    pub messages: Vec<TranscriptMessage>,
}

impl TranscriptRecord {
    pub fn new(user_id: impl Into<String>, messages: Vec<TranscriptMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            messages,
        }
    }
}

/// Append-only store for finished transcripts.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Persist one transcript atomically.
    async fn append(&self, record: &TranscriptRecord) -> Result<(), DatabaseError>;

    /// All transcripts for a user, oldest first.
    async fn list_transcripts(&self, user_id: &str)
        -> Result<Vec<TranscriptRecord>, DatabaseError>;
}
