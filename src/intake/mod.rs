//! Sequential intake conversations.
//!
//! A user is walked through a fixed list of questions one message at a time.
//! Once the last answer arrives the collected turns are turned into a short
//! plan by the LLM, the plan is sent back, and the full transcript is queued
//! for persistence. The in-memory state is then discarded so the next message
//! from the same user starts over.

pub mod catalog;
pub mod engine;
pub mod service;
pub mod state;
pub mod store;
pub mod synthesizer;
pub mod transcript;

pub use catalog::{DEFAULT_QUESTIONS, QuestionCatalog};
pub use engine::{ACKNOWLEDGMENT, IntakeEngine, OutboundAction};
pub use service::{GENERIC_APOLOGY, IntakeService};
pub use state::{Advance, ConversationState, IntakePhase, Speaker, Turn, TurnLabel};
pub use store::{ConversationStore, StateHandle};
pub use synthesizer::{FALLBACK_PLAN, PlanSynthesizer, build_prompt};
pub use transcript::{TranscriptWriter, WriterTotals, build_record};
