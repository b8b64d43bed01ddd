//! Oracle integration — the text-in / JSON-out service behind the
//! oracle-backed classifier and field extractor.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! The pipeline only sees the `OracleService` trait. Parsing of replies
//! happens in the pipeline stages, not here.

mod json;
pub mod retry;
mod rig_adapter;

pub use json::extract_json_object;
pub use retry::{RetryPolicy, RetryingOracle};
pub use rig_adapter::RigOracle;

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::OracleError;

/// External completion service: prompt in, JSON-encoded payload out.
#[async_trait]
pub trait OracleService: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Send a prompt and return the raw reply text.
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl std::str::FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("unknown LLM backend '{other}'")),
        }
    }
}

/// Configuration for creating an oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Retry policy applied by the calling layer. `None` disables retries.
    pub retry: Option<RetryPolicy>,
}

/// Create an oracle from configuration.
pub fn create_oracle(config: &OracleConfig) -> Result<Arc<dyn OracleService>, OracleError> {
    let oracle = match config.backend {
        LlmBackend::Anthropic => create_anthropic_oracle(config)?,
        LlmBackend::OpenAi => create_openai_oracle(config)?,
    };

    Ok(match config.retry {
        Some(policy) => Arc::new(RetryingOracle::new(oracle, policy)),
        None => oracle,
    })
}

fn create_anthropic_oracle(config: &OracleConfig) -> Result<Arc<dyn OracleService>, OracleError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            OracleError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic oracle (model: {})", config.model);
    Ok(Arc::new(RigOracle::new(model, "anthropic", &config.model)))
}

fn create_openai_oracle(config: &OracleConfig) -> Result<Arc<dyn OracleService>, OracleError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            OracleError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI oracle (model: {})", config.model);
    Ok(Arc::new(RigOracle::new(model, "openai", &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Anthropic".parse::<LlmBackend>(), Ok(LlmBackend::Anthropic));
        assert_eq!("OPENAI".parse::<LlmBackend>(), Ok(LlmBackend::OpenAi));
        assert!("cohere".parse::<LlmBackend>().is_err());
    }

    #[test]
    fn create_oracle_constructs_without_network() {
        // rig-core clients accept any string as API key at construction time.
        let config = OracleConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o".to_string(),
            retry: Some(RetryPolicy::default()),
        };
        let oracle = create_oracle(&config).unwrap();
        assert_eq!(oracle.model_name(), "gpt-4o");
    }

    #[test]
    fn create_anthropic_oracle_needs_no_runtime() {
        // Plain #[test]: no Tokio runtime is running here.
        let config = OracleConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-3-5-sonnet-latest".to_string(),
            retry: None,
        };
        let oracle = create_oracle(&config).unwrap();
        assert_eq!(oracle.model_name(), "claude-3-5-sonnet-latest");
    }
}
