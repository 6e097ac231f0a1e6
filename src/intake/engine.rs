//! Conversation engine — drives one inbound message through the intake.

use std::sync::Arc;

use tracing::{debug, info};

use super::catalog::QuestionCatalog;
use super::state::Advance;
use super::store::ConversationStore;
use super::synthesizer::PlanSynthesizer;
use super::transcript::TranscriptWriter;

/// Sent right before the plan.
pub const ACKNOWLEDGMENT: &str =
    "Thank you for your responses! Here is the plan we created for you:";

/// What to send back after an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Ask catalog question `index`.
    Question { index: usize, text: String },
    /// The intake is complete: acknowledgment, then the plan.
    Plan { acknowledgment: String, plan: String },
}

impl OutboundAction {
    /// Messages to send, in order.
    pub fn messages(&self) -> Vec<&str> {
        match self {
            Self::Question { text, .. } => vec![text.as_str()],
            Self::Plan {
                acknowledgment,
                plan,
            } => vec![acknowledgment.as_str(), plan.as_str()],
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Plan { .. })
    }
}

/// Owns every conversation and the collaborators needed to finish one.
pub struct IntakeEngine {
    catalog: QuestionCatalog,
    conversations: Arc<ConversationStore>,
    synthesizer: PlanSynthesizer,
    transcripts: TranscriptWriter,
}

impl IntakeEngine {
    pub fn new(
        catalog: QuestionCatalog,
        conversations: Arc<ConversationStore>,
        synthesizer: PlanSynthesizer,
        transcripts: TranscriptWriter,
    ) -> Self {
        Self {
            catalog,
            conversations,
            synthesizer,
            transcripts,
        }
    }

    pub fn catalog(&self) -> &QuestionCatalog {
        &self.catalog
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn transcripts(&self) -> &TranscriptWriter {
        &self.transcripts
    }

    /// Advance `user_id`'s intake by one inbound message.
    ///
    /// The user's state stays locked for the whole call, including plan
    /// synthesis, so a user's messages are applied one at a time while other
    /// users proceed independently.
    pub async fn handle_inbound(&self, user_id: &str, text: &str) -> OutboundAction {
        loop {
            let handle = self.conversations.get_or_create(user_id).await;
            let mut state = handle.lock().await;

            if state.is_closed() {
                // Finalized or evicted while we waited on the lock; start over.
                drop(state);
                self.conversations.remove_if_current(user_id, &handle).await;
                continue;
            }
            state.touch();

            let recorded = state.accept_inbound(text);
            debug!(user_id, step = state.step(), recorded, "Inbound message applied");

            match state.advance(&self.catalog) {
                Advance::Ask { index, question } => {
                    debug!(user_id, question_index = index, "Asking question");
                    return OutboundAction::Question {
                        index,
                        text: question,
                    };
                }
                Advance::Complete => {
                    info!(user_id, turns = state.turns().len(), "Intake complete, synthesizing plan");
                    let plan = self.synthesizer.synthesize(state.turns()).await;
                    state.finish(plan.clone());

                    self.transcripts
                        .write(state.user_id(), state.turns(), state.plan());
                    self.conversations.remove_if_current(user_id, &handle).await;

                    return OutboundAction::Plan {
                        acknowledgment: ACKNOWLEDGMENT.to_string(),
                        plan,
                    };
                }
            }
        }
    }
}
