//! Bridges a rig-core completion model to the `OracleService` trait.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionModel};

use crate::error::OracleError;
use crate::oracle::OracleService;

/// Temperature for oracle calls (classification wants repeatable answers).
const ORACLE_TEMPERATURE: f64 = 0.0;

/// Oracle backed by a rig-core completion model.
///
/// Holds the bare model rather than an agent, so construction needs no
/// async runtime.
pub struct RigOracle<M: CompletionModel> {
    model: M,
    provider: &'static str,
    model_name: String,
}

impl<M: CompletionModel> RigOracle<M> {
    pub fn new(model: M, provider: &'static str, model_name: &str) -> Self {
        Self {
            model,
            provider,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> OracleService for RigOracle<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let response = self
            .model
            .completion_request(prompt.to_string())
            .temperature(ORACLE_TEMPERATURE)
            .send()
            .await
            .map_err(|e| map_prompt_error(self.provider, &e.to_string()))?;

        let reply = reply_text(response.choice.iter());
        if reply.trim().is_empty() {
            return Err(OracleError::EmptyResponse {
                provider: self.provider.to_string(),
            });
        }
        Ok(reply)
    }
}

/// Concatenated text parts of a reply; tool calls and reasoning are ignored.
fn reply_text<'a>(parts: impl Iterator<Item = &'a AssistantContent>) -> String {
    parts
        .filter_map(|part| match part {
            AssistantContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect()
}

/// Map a rig completion failure onto our error kinds using its rendered message.
fn map_prompt_error(provider: &str, message: &str) -> OracleError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        OracleError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    } else if lower.contains("401") || lower.contains("authentication") || lower.contains("api key")
    {
        OracleError::AuthFailed {
            provider: provider.to_string(),
        }
    } else {
        OracleError::RequestFailed {
            provider: provider.to_string(),
            reason: message.to_string(),
        }
    }
}
