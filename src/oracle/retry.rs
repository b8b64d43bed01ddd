//! Retry wrapper for oracles.
//!
//! The pipeline itself never retries. Callers that want retries wrap
//! their oracle in `RetryingOracle`, which re-issues transient failures
//! with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::OracleError;
use crate::oracle::OracleService;

/// Backoff settings for `RetryingOracle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each later one.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Oracle decorator that retries transient failures.
pub struct RetryingOracle {
    inner: Arc<dyn OracleService>,
    policy: RetryPolicy,
}

impl RetryingOracle {
    pub fn new(inner: Arc<dyn OracleService>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl OracleService for RetryingOracle {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(prompt).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = match &e {
                        OracleError::RateLimited {
                            retry_after: Some(after),
                            ..
                        } => *after,
                        _ => self.policy.delay_for(attempt),
                    };
                    warn!(
                        model = self.inner.model_name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Oracle call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
