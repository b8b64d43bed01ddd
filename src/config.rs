//! Configuration, built from environment variables.

use std::path::Path;
use std::sync::Arc;

use secrecy::SecretString;
use serde::de::DeserializeOwned;

use crate::error::{ConfigError, Error};
use crate::oracle::{LlmBackend, OracleConfig, RetryPolicy, create_oracle};
use crate::pipeline::duplicate::SeenRegistry;
use crate::pipeline::rules::{DEFAULT_DEAL_ORGANIZATION, DealGrammar, RulePatterns};
use crate::pipeline::secondary::{SecondaryDetector, SecondaryTrigger};
use crate::pipeline::{Strategy, StrategyKind};

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_BATCH_CONCURRENCY: usize = 4;
const DEFAULT_ORACLE_RETRIES: u32 = 2;
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Intake service configuration.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub strategy: StrategyKind,
    pub backend: LlmBackend,
    /// Key for `backend`; only required by the oracle strategy.
    pub api_key: Option<SecretString>,
    pub model: String,
    /// Retries after a transient oracle failure. `0` disables retrying.
    pub oracle_retries: u32,
    pub port: u16,
    pub batch_concurrency: usize,
    /// Organization name at the start of deal phrases.
    pub deal_organization: String,
    /// Keywords that add secondary request types.
    pub secondary: SecondaryDetector,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::RuleBased,
            backend: LlmBackend::Anthropic,
            api_key: None,
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            oracle_retries: DEFAULT_ORACLE_RETRIES,
            port: DEFAULT_PORT,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            deal_organization: DEFAULT_DEAL_ORGANIZATION.to_string(),
            secondary: SecondaryDetector::default(),
        }
    }
}

impl IntakeConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    ///
    /// Unset variables fall back to defaults; set but malformed ones are
    /// errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let strategy = parse_var(&lookup, "INTAKE_STRATEGY")?.unwrap_or(StrategyKind::RuleBased);

        let backend = parse_var(&lookup, "INTAKE_LLM_BACKEND")?.unwrap_or(LlmBackend::Anthropic);

        let (key_var, default_model) = match backend {
            LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", DEFAULT_ANTHROPIC_MODEL),
            LlmBackend::OpenAi => ("OPENAI_API_KEY", DEFAULT_OPENAI_MODEL),
        };
        let api_key = lookup(key_var)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let model = lookup("INTAKE_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_model.to_string());

        let oracle_retries =
            parse_var(&lookup, "INTAKE_ORACLE_RETRIES")?.unwrap_or(DEFAULT_ORACLE_RETRIES);

        let port = parse_var(&lookup, "INTAKE_PORT")?.unwrap_or(DEFAULT_PORT);

        let batch_concurrency: usize = parse_var(&lookup, "INTAKE_BATCH_CONCURRENCY")?
            .unwrap_or(DEFAULT_BATCH_CONCURRENCY);
        if batch_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INTAKE_BATCH_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let deal_organization = lookup("INTAKE_DEAL_ORGANIZATION")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DEAL_ORGANIZATION.to_string());

        // keyword=request_type pairs, comma separated
        let secondary = match lookup("INTAKE_SECONDARY_TRIGGERS")
            .filter(|raw| !raw.trim().is_empty())
        {
            Some(raw) => SecondaryDetector::new(parse_triggers(&raw)?),
            None => SecondaryDetector::default(),
        };

        Ok(Self {
            strategy,
            backend,
            api_key,
            model,
            oracle_retries,
            port,
            batch_concurrency,
            deal_organization,
            secondary,
        })
    }

    /// Oracle settings. Fails when no API key is configured.
    pub fn oracle_config(&self) -> Result<OracleConfig, ConfigError> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            ConfigError::MissingEnvVar(
                match self.backend {
                    LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
                    LlmBackend::OpenAi => "OPENAI_API_KEY",
                }
                .to_string(),
            )
        })?;

        let retry = (self.oracle_retries > 0).then(|| RetryPolicy {
            max_retries: self.oracle_retries,
            ..RetryPolicy::default()
        });

        Ok(OracleConfig {
            backend: self.backend,
            api_key,
            model: self.model.clone(),
            retry,
        })
    }

    /// Regex rules for the configured deal organization.
    pub fn rule_patterns(&self) -> Result<RulePatterns, ConfigError> {
        RulePatterns::new(&DealGrammar::new(self.deal_organization.as_str())).map_err(|e| {
            ConfigError::InvalidValue {
                key: "INTAKE_DEAL_ORGANIZATION".to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Build the strategy of the given kind.
    ///
    /// `registry` backs the fingerprint duplicate policy of the oracle
    /// strategy; the rule-based strategy ignores it.
    pub fn build_strategy(
        &self,
        kind: StrategyKind,
        registry: Arc<dyn SeenRegistry>,
    ) -> Result<Strategy, Error> {
        match kind {
            StrategyKind::RuleBased => Ok(Strategy::rule_based(Arc::new(self.rule_patterns()?))),
            StrategyKind::Oracle => {
                let oracle = create_oracle(&self.oracle_config()?)?;
                Ok(Strategy::oracle(oracle, registry))
            }
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}

fn parse_triggers(raw: &str) -> Result<Vec<SecondaryTrigger>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((keyword, request_type))
                if !keyword.trim().is_empty() && !request_type.trim().is_empty() =>
            {
                Ok(SecondaryTrigger::new(keyword.trim(), request_type.trim()))
            }
            _ => Err(ConfigError::InvalidValue {
                key: "INTAKE_SECONDARY_TRIGGERS".to_string(),
                message: format!("'{pair}' is not keyword=request_type"),
            }),
        })
        .collect()
}

/// Read and deserialize a JSON file (taxonomy or extraction spec).
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::ParseFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use secrecy::ExposeSecret;

    use crate::pipeline::duplicate::InMemoryRegistry;
    use crate::pipeline::types::Taxonomy;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = IntakeConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.strategy, StrategyKind::RuleBased);
        assert_eq!(config.backend, LlmBackend::Anthropic);
        assert_eq!(config.model, DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(config.port, 8000);
        assert_eq!(config.batch_concurrency, 4);
        assert_eq!(config.deal_organization, "cantor fitzgerald lp");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn openai_backend_reads_its_key_and_model() {
        let config = IntakeConfig::from_lookup(lookup_from(&[
            ("INTAKE_STRATEGY", "oracle"),
            ("INTAKE_LLM_BACKEND", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_API_KEY", "sk-ant-ignored"),
            ("INTAKE_ORACLE_RETRIES", "0"),
        ]))
        .unwrap();
        assert_eq!(config.strategy, StrategyKind::Oracle);
        assert_eq!(config.model, DEFAULT_OPENAI_MODEL);

        let oracle = config.oracle_config().unwrap();
        assert_eq!(oracle.api_key.expose_secret(), "sk-test");
        assert!(oracle.retry.is_none());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = IntakeConfig::from_lookup(lookup_from(&[("INTAKE_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "INTAKE_PORT"));

        let err =
            IntakeConfig::from_lookup(lookup_from(&[("INTAKE_STRATEGY", "magic")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = IntakeConfig::from_lookup(lookup_from(&[("INTAKE_BATCH_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn oracle_strategy_without_key_is_missing_env() {
        let config = IntakeConfig::default();
        let err = config
            .build_strategy(StrategyKind::Oracle, Arc::new(InMemoryRegistry::new()))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Config(ConfigError::MissingEnvVar(ref var)) if var == "ANTHROPIC_API_KEY"
        ));
    }

    #[test]
    fn rule_based_strategy_uses_configured_organization() {
        let config = IntakeConfig::from_lookup(lookup_from(&[(
            "INTAKE_DEAL_ORGANIZATION",
            "Acme Capital LLC",
        )]))
        .unwrap();
        let patterns = config.rule_patterns().unwrap();
        assert_eq!(
            patterns.deal_name("RE: ACME CAPITAL LLC USD 10MM JUN24"),
            Some("ACME CAPITAL LLC USD 10MM JUN24")
        );

        let strategy = config
            .build_strategy(StrategyKind::RuleBased, Arc::new(InMemoryRegistry::new()))
            .unwrap();
        assert_eq!(strategy.kind(), StrategyKind::RuleBased);
    }

    #[test]
    fn secondary_triggers_from_env() {
        let config = IntakeConfig::from_lookup(lookup_from(&[(
            "INTAKE_SECONDARY_TRIGGERS",
            " fee = fee_payment, waive=fee_waiver ",
        )]))
        .unwrap();
        assert_eq!(
            config.secondary.detect("Pay the fee and waive the rest", "principal_payment"),
            vec!["fee_payment", "fee_waiver"]
        );

        let defaults = IntakeConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(
            defaults.secondary.detect("interest", "principal_payment"),
            vec!["interest_payment"]
        );

        let err = IntakeConfig::from_lookup(lookup_from(&[(
            "INTAKE_SECONDARY_TRIGGERS",
            "interest=interest_payment,modify",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "INTAKE_SECONDARY_TRIGGERS"
        ));
    }

    #[test]
    fn load_json_file_keeps_order_and_reports_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"b": ["x"], "a": ["y"]}"#).unwrap();
        let taxonomy: Taxonomy = load_json_file(file.path()).unwrap();
        let names: Vec<&str> = taxonomy.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a"]);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"[1, 2").unwrap();
        let err = load_json_file::<Taxonomy>(bad.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFile { .. }));
    }
}
