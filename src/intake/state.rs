//! Per-user intake state machine.
//!
//! A conversation alternates between asking catalog question `i` and waiting
//! for its answer:
//!
//! ```text
//! AwaitingQuestion(0) → AwaitingAnswer(0) → AwaitingQuestion(1) → … →
//! AwaitingQuestion(n) → Finished
//! ```
//!
//! Reaching `AwaitingQuestion(i)` with `i >= catalog.len()` means every
//! question has been asked and answered; the only move left is `finish`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::catalog::QuestionCatalog;

/// Where a conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "index")]
pub enum IntakePhase {
    /// The next move is to ask question `i` (or finalize if `i` is past the end).
    AwaitingQuestion(usize),
    /// Question `i` has been asked; the next inbound text is its answer.
    AwaitingAnswer(usize),
    /// The plan has been produced; this state must not be reused.
    Finished,
}

impl IntakePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl Default for IntakePhase {
    fn default() -> Self {
        Self::AwaitingQuestion(0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Bot,
    User,
}

/// Label identifying one turn, e.g. `bot_step_0` or `user_step_1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLabel {
    pub speaker: Speaker,
    pub step: u32,
}

impl TurnLabel {
    /// Label with underscores replaced by spaces, as shown to the model.
    pub fn humanized(&self) -> String {
        self.to_string().replace('_', " ")
    }
}

impl std::fmt::Display for TurnLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let speaker = match self.speaker {
            Speaker::Bot => "bot",
            Speaker::User => "user",
        };
        write!(f, "{speaker}_step_{}", self.step)
    }
}

/// One recorded question or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub label: TurnLabel,
    pub text: String,
}

/// Outcome of [`ConversationState::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Question `index` was recorded and should be sent.
    Ask { index: usize, question: String },
    /// All questions are answered; synthesize a plan and call `finish`.
    Complete,
}

/// In-memory progress of one user's intake.
#[derive(Debug, Clone)]
pub struct ConversationState {
    user_id: String,
    /// Turn counter; bumped once per recorded turn and once on finish.
    step: u32,
    phase: IntakePhase,
    turns: Vec<Turn>,
    plan: Option<String>,
    last_active: Instant,
    /// Set when the state is evicted for inactivity; a retired state is never
    /// advanced again.
    retired: bool,
}

impl ConversationState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            step: 0,
            phase: IntakePhase::default(),
            turns: Vec::new(),
            plan: None,
            last_active: Instant::now(),
            retired: false,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn phase(&self) -> IntakePhase {
        self.phase
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Finished or retired: the next message must start a new conversation.
    pub fn is_closed(&self) -> bool {
        self.is_finished() || self.retired
    }

    /// Record user activity now.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    fn push_turn(&mut self, speaker: Speaker, text: String) {
        self.turns.push(Turn {
            label: TurnLabel {
                speaker,
                step: self.step,
            },
            text,
        });
        self.step += 1;
    }

    /// Record `text` as the answer to the pending question, if one is pending.
    ///
    /// Returns `false` (and drops the text) when no question is outstanding,
    /// which is always the case for the first message of a conversation.
    pub fn accept_inbound(&mut self, text: &str) -> bool {
        let IntakePhase::AwaitingAnswer(index) = self.phase else {
            return false;
        };
        self.push_turn(Speaker::User, text.to_string());
        self.phase = IntakePhase::AwaitingQuestion(index + 1);
        true
    }

    /// Ask the next question, or report that the intake is complete.
    ///
    /// In `AwaitingAnswer` the outstanding question is returned again without
    /// being recorded a second time. In `Finished` this returns `Complete`.
    pub fn advance(&mut self, catalog: &QuestionCatalog) -> Advance {
        let index = match self.phase {
            IntakePhase::AwaitingQuestion(index) => index,
            IntakePhase::AwaitingAnswer(index) => {
                // Question already outstanding; repeat it without recording twice.
                let question = catalog.get(index).unwrap_or_default().to_string();
                return Advance::Ask { index, question };
            }
            IntakePhase::Finished => return Advance::Complete,
        };

        match catalog.get(index) {
            Some(question) => {
                let question = question.to_string();
                self.push_turn(Speaker::Bot, question.clone());
                self.phase = IntakePhase::AwaitingAnswer(index);
                Advance::Ask { index, question }
            }
            None => Advance::Complete,
        }
    }

    /// Store the synthesized plan and close the conversation.
    ///
    /// Returns `false` if the conversation was already finished; the first
    /// plan is kept.
    pub fn finish(&mut self, plan: impl Into<String>) -> bool {
        if self.is_finished() {
            return false;
        }
        self.plan = Some(plan.into());
        self.step += 1;
        self.phase = IntakePhase::Finished;
        true
    }
}
