//! LLM integration for email-ops.
//!
//! One backend: an OpenAI-compatible chat completions client (`OpenAiProvider`)
//! behind the `LlmProvider` trait. Tests swap in mock providers.

pub mod openai;
pub mod provider;
pub mod reasoning;

pub use openai::OpenAiProvider;
pub use provider::*;
pub use reasoning::{Reasoning, ReasoningContext, RespondOutput, RespondResult, TokenUsage};

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl From<&AppConfig> for LlmConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            timeout: config.llm_timeout,
        }
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiProvider::new(
        config.base_url.clone(),
        config.api_key.clone(),
        config.model.clone(),
        config.timeout,
    )?;
    tracing::info!(model = %config.model, base_url = %config.base_url, "Using OpenAI-compatible provider");
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_provider_constructs_without_network() {
        // The key is only checked when a request is made.
        let config = LlmConfig {
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o-mini".to_string(),
            base_url: crate::config::DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout: Duration::from_secs(5),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o-mini");
    }
}
