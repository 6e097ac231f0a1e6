//! Configuration types.
//!
//! Everything is read from the process environment at startup.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmBackend;

/// Default completion model when `INTAKE_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default output-length ceiling for plan synthesis.
pub const DEFAULT_MAX_TOKENS: u32 = 150;

/// Default libSQL database location.
pub const DEFAULT_DB_PATH: &str = "./data/intake.db";

/// Default inactivity window before an unfinished intake is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Telegram transport settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Usernames or numeric ids; `*` admits everyone.
    pub allowed_users: Vec<String>,
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// `None` when no bot token is configured (CLI-only runs).
    pub telegram: Option<TelegramConfig>,
    pub llm_backend: LlmBackend,
    pub llm_api_key: SecretString,
    pub model: String,
    /// Output-length ceiling passed to the completion service.
    pub max_tokens: u32,
    /// Store connection string: a file path or `:memory:`.
    pub db_path: String,
    /// Whether the stdin/stdout channel is enabled.
    pub cli_enabled: bool,
    /// Unfinished intakes idle this long are dropped; `None` keeps them forever.
    pub idle_timeout: Option<Duration>,
}

impl IntakeConfig {
    /// Build configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cli_enabled = lookup("INTAKE_CLI")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let telegram = lookup("TELEGRAM_BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .map(|bot_token| TelegramConfig {
                bot_token,
                allowed_users: parse_allowed_users(
                    &lookup("TELEGRAM_ALLOWED_USERS").unwrap_or_else(|| "*".to_string()),
                ),
            });

        if telegram.is_none() && !cli_enabled {
            return Err(ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".to_string()));
        }

        let llm_backend = match lookup("INTAKE_LLM_BACKEND") {
            None => LlmBackend::OpenAi,
            Some(v) => v.parse().map_err(|message| ConfigError::InvalidValue {
                key: "INTAKE_LLM_BACKEND".to_string(),
                message,
            })?,
        };

        let key_var = llm_backend.api_key_var();
        let llm_api_key = lookup(key_var)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let model = lookup("INTAKE_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_tokens = lookup("OPENAI_MAX_TOKENS")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let db_path = lookup("INTAKE_DB_PATH")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let idle_timeout = match lookup("INTAKE_IDLE_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_IDLE_TIMEOUT),
        };

        Ok(Self {
            telegram,
            llm_backend,
            llm_api_key,
            model,
            max_tokens,
            db_path,
            cli_enabled,
            idle_timeout,
        })
    }
}

fn parse_allowed_users(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
