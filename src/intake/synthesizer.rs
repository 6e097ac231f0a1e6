//! Plan synthesizer — turns collected answers into a short plan via the LLM.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::DEFAULT_MAX_TOKENS;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

use super::state::Turn;

/// Returned in place of a plan whenever the completion service fails.
pub const FALLBACK_PLAN: &str = "I'm sorry, I couldn't generate a response. Please try again.";

const PLAN_INSTRUCTION: &str =
    "Based on the following details collected from the user, generate a concise and actionable plan:";

const PLAN_LENGTH_HINT: &str = "Please keep the plan concise, no more than 100 words.";

/// Produces a plan from a finished conversation. Never fails outward.
pub struct PlanSynthesizer {
    llm: Arc<dyn LlmProvider>,
    max_tokens: u32,
}

impl PlanSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Override the output-length ceiling sent with each request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Synthesize a plan, substituting [`FALLBACK_PLAN`] on any failure.
    pub async fn synthesize(&self, turns: &[Turn]) -> String {
        let request = CompletionRequest::new(vec![ChatMessage::user(build_prompt(turns))])
            .with_max_tokens(self.max_tokens);

        match self.llm.complete(request).await {
            Ok(response) => {
                let plan = response.content.trim();
                if plan.is_empty() {
                    warn!(model = self.llm.model_name(), "LLM returned an empty plan");
                    return FALLBACK_PLAN.to_string();
                }
                debug!(
                    model = self.llm.model_name(),
                    output_tokens = response.output_tokens,
                    "Plan synthesized"
                );
                plan.to_string()
            }
            Err(e) => {
                warn!(model = self.llm.model_name(), error = %e, "Plan synthesis failed");
                FALLBACK_PLAN.to_string()
            }
        }
    }
}

/// Render the plan prompt: instruction, one `label: text` line per turn, length hint.
pub fn build_prompt(turns: &[Turn]) -> String {
    let details = turns
        .iter()
        .map(|turn| format!("{}: {}", turn.label.humanized(), turn.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{PLAN_INSTRUCTION}\n{details}\n\n{PLAN_LENGTH_HINT}")
}
