//! libSQL backend — async `TranscriptStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{MessageRole, TranscriptMessage, TranscriptRecord, TranscriptStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open the store named by a connection string: `:memory:` or a file path.
    pub async fn connect(location: &str) -> Result<Self, DatabaseError> {
        if location == ":memory:" {
            Self::new_memory().await
        } else {
            Self::new_local(Path::new(location)).await
        }
    }

    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn load_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<TranscriptMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT role, content, timestamp FROM conversation_messages
                 WHERE conversation_id = ?1 ORDER BY position ASC",
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_messages: {e}")))?
        {
            let role: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("load_messages role: {e}")))?;
            let content: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("load_messages content: {e}")))?;
            let timestamp: String = row.get(2).unwrap_or_default();
            messages.push(TranscriptMessage {
                role: role.parse::<MessageRole>()?,
                content,
                timestamp: parse_datetime(&timestamp),
            });
        }
        Ok(messages)
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TranscriptStore for LibSqlBackend {
    async fn append(&self, record: &TranscriptRecord) -> Result<(), DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("append: begin: {e}")))?;

        let conversation_id = record.id.to_string();
        let created_at = record
            .messages
            .first()
            .map(|m| m.timestamp)
            .unwrap_or_else(Utc::now);

        tx.execute(
            "INSERT INTO conversations (id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![
                conversation_id.clone(),
                record.user_id.clone(),
                format_datetime(&created_at)
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append conversation: {e}")))?;

        for (position, message) in record.messages.iter().enumerate() {
            tx.execute(
                "INSERT INTO conversation_messages (conversation_id, position, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    conversation_id.clone(),
                    position as i64,
                    message.role.as_str(),
                    message.content.clone(),
                    format_datetime(&message.timestamp)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append message {position}: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("append: commit: {e}")))?;

        debug!(
            conversation_id = %record.id,
            user_id = %record.user_id,
            messages = record.messages.len(),
            "Transcript appended"
        );
        Ok(())
    }

    async fn list_transcripts(
        &self,
        user_id: &str,
    ) -> Result<Vec<TranscriptRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM conversations WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_transcripts: {e}")))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_transcripts: {e}")))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("list_transcripts id: {e}")))?;
            ids.push(id);
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let messages = self.load_messages(&id).await?;
            records.push(TranscriptRecord {
                id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
                user_id: user_id.to_string(),
                messages,
            });
        }
        Ok(records)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn sample_record(user_id: &str) -> TranscriptRecord {
        TranscriptRecord::new(
            user_id,
            vec![
                TranscriptMessage::new(MessageRole::Bot, "Q1"),
                TranscriptMessage::new(MessageRole::User, "A1"),
                TranscriptMessage::new(MessageRole::Bot, "PLAN"),
            ],
        )
    }

    #[tokio::test]
    async fn append_and_list_preserves_order() {
        let db = test_db().await;
        let record = sample_record("42");
        db.append(&record).await.unwrap();

        let stored = db.list_transcripts("42").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, record.id);
        let pairs: Vec<(MessageRole, &str)> = stored[0]
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (MessageRole::Bot, "Q1"),
                (MessageRole::User, "A1"),
                (MessageRole::Bot, "PLAN"),
            ]
        );
    }

    #[tokio::test]
    async fn timestamps_round_trip_to_millis() {
        let db = test_db().await;
        let record = sample_record("42");
        db.append(&record).await.unwrap();

        let stored = db.list_transcripts("42").await.unwrap();
        let original = record.messages[0].timestamp.timestamp_millis();
        assert_eq!(stored[0].messages[0].timestamp.timestamp_millis(), original);
    }

    #[tokio::test]
    async fn list_is_scoped_to_user() {
        let db = test_db().await;
        db.append(&sample_record("a")).await.unwrap();
        db.append(&sample_record("a")).await.unwrap();
        db.append(&sample_record("b")).await.unwrap();

        assert_eq!(db.list_transcripts("a").await.unwrap().len(), 2);
        assert_eq!(db.list_transcripts("b").await.unwrap().len(), 1);
        assert!(db.list_transcripts("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_append_fails_without_partial_rows() {
        let db = test_db().await;
        let record = sample_record("42");
        db.append(&record).await.unwrap();

        // Same conversation id violates the primary key; nothing new is written.
        assert!(db.append(&record).await.is_err());
        let stored = db.list_transcripts("42").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].messages.len(), 3);
    }

    #[tokio::test]
    async fn connect_memory_string() {
        let db = LibSqlBackend::connect(":memory:").await.unwrap();
        db.append(&sample_record("x")).await.unwrap();
        assert_eq!(db.list_transcripts("x").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn new_local_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("intake.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.append(&sample_record("x")).await.unwrap();
        assert!(path.exists());
    }
}
