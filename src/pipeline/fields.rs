//! Field extraction.
//!
//! [`PatternFieldExtractor`] applies the fixed regex rules and ignores the
//! caller's `ExtractionSpec`; [`OracleFieldExtractor`] sends the spec to
//! the oracle and parses the JSON object it returns.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{IntakeError, ParseError, ParseStage};
use crate::oracle::{OracleService, extract_json_object};
use crate::pipeline::classifier::{MAX_PROMPT_TEXT_CHARS, truncate_chars};
use crate::pipeline::rules::RulePatterns;
use crate::pipeline::types::{ExtractedFields, ExtractionSpec, NOT_FOUND};

/// Maps text to named field values.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Short label for logging.
    fn name(&self) -> &'static str;

    async fn extract(
        &self,
        text: &str,
        spec: &ExtractionSpec,
    ) -> Result<ExtractedFields, IntakeError>;
}

// ── Regex rules ─────────────────────────────────────────────────────

/// Rule-based extractor for `deal_name`, `amount` and `effective_date`.
///
/// Each field is the first match over the whole text, or `"Not Found"`.
pub struct PatternFieldExtractor {
    patterns: Arc<RulePatterns>,
}

impl PatternFieldExtractor {
    pub fn new(patterns: Arc<RulePatterns>) -> Self {
        Self { patterns }
    }

    pub fn extract_text(&self, text: &str) -> ExtractedFields {
        let mut fields = ExtractedFields::new();
        fields.insert(
            "deal_name",
            self.patterns.deal_name(text).unwrap_or(NOT_FOUND),
        );
        fields.insert("amount", self.patterns.amount(text).unwrap_or(NOT_FOUND));
        fields.insert(
            "effective_date",
            self.patterns.effective_date(text).unwrap_or(NOT_FOUND),
        );
        fields
    }
}

impl Default for PatternFieldExtractor {
    fn default() -> Self {
        Self::new(Arc::new(RulePatterns::default()))
    }
}

#[async_trait]
impl FieldExtractor for PatternFieldExtractor {
    fn name(&self) -> &'static str {
        "pattern"
    }

    async fn extract(
        &self,
        text: &str,
        _spec: &ExtractionSpec,
    ) -> Result<ExtractedFields, IntakeError> {
        Ok(self.extract_text(text))
    }
}

// ── Oracle-backed ───────────────────────────────────────────────────

/// Extractor that asks the oracle for the fields named in the spec.
pub struct OracleFieldExtractor {
    oracle: Arc<dyn OracleService>,
}

impl OracleFieldExtractor {
    pub fn new(oracle: Arc<dyn OracleService>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl FieldExtractor for OracleFieldExtractor {
    fn name(&self) -> &'static str {
        "oracle"
    }

    async fn extract(
        &self,
        text: &str,
        spec: &ExtractionSpec,
    ) -> Result<ExtractedFields, IntakeError> {
        if spec.is_empty() {
            debug!("Empty extraction spec, skipping oracle call");
            return Ok(ExtractedFields::new());
        }

        let prompt = build_extraction_prompt(text, spec);
        let raw = self.oracle.complete(&prompt).await?;

        parse_extraction_reply(&raw, spec)
            .inspect_err(|e| {
                warn!(
                    model = self.oracle.model_name(),
                    raw_response = %raw,
                    error = %e,
                    "Unparseable extraction reply"
                );
            })
            .map_err(Into::into)
    }
}

fn build_extraction_prompt(text: &str, spec: &ExtractionSpec) -> String {
    // Maps of strings always serialize.
    let rules = serde_json::to_string_pretty(spec).unwrap_or_default();
    let excerpt = truncate_chars(text, MAX_PROMPT_TEXT_CHARS);

    format!(
        "Extract the following fields from the given text. Each key is a field \
         name, each value describes what to look for:\n{rules}\n\n\
         Respond with ONLY a JSON object mapping every field name to the value \
         found in the text, as a string. Use null for fields that are not present.\n\n\
         Text:\n{excerpt}"
    )
}

/// Parse the oracle's field map, keeping only declared fields.
///
/// Declared fields that are missing, null or blank become `"Not Found"`.
/// Numbers and booleans are stringified; nested values are kept as JSON.
fn parse_extraction_reply(raw: &str, spec: &ExtractionSpec) -> Result<ExtractedFields, ParseError> {
    let json = extract_json_object(raw);
    let value: Value = serde_json::from_str(json).map_err(|e| {
        ParseError::new(ParseStage::FieldExtraction, format!("JSON parse error: {e}"))
    })?;
    let Value::Object(map) = value else {
        return Err(ParseError::new(
            ParseStage::FieldExtraction,
            "reply is not a JSON object",
        ));
    };

    let mut fields = ExtractedFields::new();
    for field in spec.fields() {
        let value = match map.get(field) {
            None | Some(Value::Null) => NOT_FOUND.to_string(),
            Some(Value::String(s)) if s.trim().is_empty() => NOT_FOUND.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        fields.insert(field, value);
    }

    let undeclared: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|k| !spec.fields().any(|f| f == *k))
        .collect();
    if !undeclared.is_empty() {
        debug!(?undeclared, "Dropping undeclared fields from extraction reply");
    }

    Ok(fields)
}
