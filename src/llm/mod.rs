//! Completion service used to write intake plans.
//!
//! `LlmProvider` is the seam the intake core depends on; `RigAdapter` puts a
//! rig-core model behind it.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rig::client::CompletionClient;
use rig::providers::{anthropic, openai};
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

/// Which hosted API answers completion requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Environment variable holding this backend's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!(
                "unknown backend '{other}' (expected openai or anthropic)"
            )),
        }
    }
}

/// Build the plan-writing model for `backend`.
///
/// Keys are not checked here; a bad key surfaces as `AuthFailed` on the
/// first request.
pub fn create_provider(
    backend: LlmBackend,
    api_key: &SecretString,
    model: &str,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let key = api_key.expose_secret();
    let client_error = |e: &dyn fmt::Display| LlmError::RequestFailed {
        provider: backend.to_string(),
        reason: format!("client setup failed: {e}"),
    };

    let provider: Arc<dyn LlmProvider> = match backend {
        LlmBackend::OpenAi => {
            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(key).map_err(|e| client_error(&e))?;
            Arc::new(RigAdapter::new(client.completion_model(model), model))
        }
        LlmBackend::Anthropic => {
            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(key).map_err(|e| client_error(&e))?;
            Arc::new(RigAdapter::new(client.completion_model(model), model))
        }
    };

    tracing::info!(backend = %backend, model, "Completion provider ready");
    Ok(provider)
}
