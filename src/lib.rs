//! Intake Assist — question-driven intake bot with LLM-written plans.

pub mod channels;
pub mod config;
pub mod error;
pub mod intake;
pub mod llm;
pub mod store;
