//! Error types for the intake pipeline.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration file {path}: {reason}")]
    ParseFile { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Oracle (LLM provider) errors.
///
/// These cover transport-level failures only. A reply that arrives but
/// cannot be interpreted is a [`ParseError`].
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Empty response from {provider}")]
    EmptyResponse { provider: String },
}

impl OracleError {
    /// Whether a calling layer may retry the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::RateLimited { .. })
    }
}

/// Which oracle-backed stage produced an unusable reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    Classification,
    FieldExtraction,
}

impl std::fmt::Display for ParseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classification => f.write_str("classification"),
            Self::FieldExtraction => f.write_str("field extraction"),
        }
    }
}

/// The oracle replied, but not with the expected structured payload.
#[derive(Debug, thiserror::Error)]
#[error("Could not parse {stage} reply: {reason}")]
pub struct ParseError {
    pub stage: ParseStage,
    pub reason: String,
}

impl ParseError {
    pub fn new(stage: ParseStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// Pipeline errors surfaced to callers of `IntakePipeline`.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Unsupported file format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Text extraction failed for {file}: {reason}")]
    Extraction { file: String, reason: String },

    #[error("Taxonomy has no request types")]
    EmptyTaxonomy,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Oracle call failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
