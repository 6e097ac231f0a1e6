//! Persistence layer — libSQL-backed storage for finished transcripts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{MessageRole, TranscriptMessage, TranscriptRecord, TranscriptStore};
