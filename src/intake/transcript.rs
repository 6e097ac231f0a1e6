//! Transcript writer — hands finished conversations to the store.
//!
//! Submission never blocks the conversation: records go onto a queue that a
//! background worker drains. Storage failures are logged and counted, never
//! surfaced to the user.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::store::{MessageRole, TranscriptMessage, TranscriptRecord, TranscriptStore};

use super::state::{Speaker, Turn};

/// Build the persisted record: every turn in order, then the plan (if any).
pub fn build_record(user_id: &str, turns: &[Turn], plan: Option<&str>) -> TranscriptRecord {
    let mut messages: Vec<TranscriptMessage> = turns
        .iter()
        .map(|turn| {
            let role = match turn.label.speaker {
                Speaker::Bot => MessageRole::Bot,
                Speaker::User => MessageRole::User,
            };
            TranscriptMessage::new(role, turn.text.clone())
        })
        .collect();

    if let Some(plan) = plan.filter(|p| !p.is_empty()) {
        messages.push(TranscriptMessage::new(MessageRole::Bot, plan));
    }

    TranscriptRecord::new(user_id, messages)
}

/// Final counts reported by the worker when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterTotals {
    pub written: u64,
    pub failed: u64,
}

#[derive(Default)]
struct WriterStats {
    written: AtomicU64,
    failed: AtomicU64,
}

/// Cloneable handle for submitting transcripts to the background worker.
#[derive(Clone)]
pub struct TranscriptWriter {
    tx: mpsc::UnboundedSender<TranscriptRecord>,
    stats: Arc<WriterStats>,
}

impl TranscriptWriter {
    /// Start the worker. It exits once every writer clone has been dropped
    /// and the queue is drained, so awaiting the handle flushes pending writes.
    pub fn spawn(store: Arc<dyn TranscriptStore>) -> (Self, JoinHandle<WriterTotals>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<TranscriptRecord>();
        let stats = Arc::new(WriterStats::default());
        let worker_stats = Arc::clone(&stats);

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match store.append(&record).await {
                    Ok(()) => {
                        worker_stats.written.fetch_add(1, Ordering::Relaxed);
                        info!(
                            user_id = %record.user_id,
                            messages = record.messages.len(),
                            "Conversation saved"
                        );
                    }
                    Err(e) => {
                        worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                        error!(user_id = %record.user_id, error = %e, "Error saving conversation");
                    }
                }
            }
            let totals = WriterTotals {
                written: worker_stats.written.load(Ordering::Relaxed),
                failed: worker_stats.failed.load(Ordering::Relaxed),
            };
            tracing::debug!(
                written = totals.written,
                failed = totals.failed,
                "Transcript worker stopped"
            );
            totals
        });

        (Self { tx, stats }, handle)
    }

    /// Build and queue the transcript for a finished conversation.
    pub fn write(&self, user_id: &str, turns: &[Turn], plan: Option<&str>) {
        self.submit(build_record(user_id, turns, plan));
    }

    /// Queue a record for persistence.
    pub fn submit(&self, record: TranscriptRecord) {
        if let Err(e) = self.tx.send(record) {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(user_id = %e.0.user_id, "Transcript worker is gone; conversation dropped");
        }
    }

    /// Transcripts successfully appended so far.
    pub fn written_count(&self) -> u64 {
        self.stats.written.load(Ordering::Relaxed)
    }

    /// Transcripts that could not be persisted.
    pub fn failure_count(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }
}
