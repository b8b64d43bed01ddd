//! Request-type classification.
//!
//! Two interchangeable implementations of [`Classifier`]:
//! - [`KeywordClassifier`] — keyword scoring over the taxonomy, plus a
//!   fixed sub-type rule. Deterministic, no I/O.
//! - [`OracleClassifier`] — asks the oracle for a JSON decision and
//!   parses it strictly.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{IntakeError, ParseError, ParseStage};
use crate::oracle::{OracleService, extract_json_object};
use crate::pipeline::types::{ClassificationResult, Taxonomy};

/// Sub-type when the text announces the full outstanding amount.
pub const FULL_PAYMENT: &str = "full_payment";

/// Sub-type for everything else.
pub const PARTIAL_PAYMENT: &str = "partial_payment";

/// Phrase that marks a full payment (matched against lower-cased text).
const FULL_PAYMENT_MARKER: &str = "total of usd";

/// Upper bound on document characters embedded in an oracle prompt.
pub(crate) const MAX_PROMPT_TEXT_CHARS: usize = 12_000;

/// Maps text to a request type, sub-type and confidence.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short label for logging.
    fn name(&self) -> &'static str;

    async fn classify(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<ClassificationResult, IntakeError>;
}

// ── Keyword scoring ─────────────────────────────────────────────────

/// Rule-based classifier.
///
/// The text is lower-cased, then each request type scores one point per
/// keyword that occurs in it as a case-sensitive substring. The first
/// type in taxonomy order with the highest score wins. Confidence is the
/// winner's share of all points (0 when nothing matched).
///
/// The sub-type ignores the taxonomy: `full_payment` when the text
/// contains "total of usd", otherwise `partial_payment`, whatever the
/// primary type is.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Per-type scores in taxonomy order. `text` must already be lower-cased.
    pub fn scores<'a>(&self, text: &str, taxonomy: &'a Taxonomy) -> Vec<(&'a str, usize)> {
        taxonomy
            .iter()
            .map(|(request_type, keywords)| {
                let score = keywords
                    .iter()
                    .filter(|k| text.contains(k.as_str()))
                    .count();
                (request_type, score)
            })
            .collect()
    }

    /// Synchronous classification; the async trait method delegates here.
    pub fn classify_text(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<ClassificationResult, IntakeError> {
        let text = text.to_lowercase();
        let scores = self.scores(&text, taxonomy);

        let mut best: Option<(&str, usize)> = None;
        for &(request_type, score) in &scores {
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((request_type, score)),
            }
        }
        let (request_type, top) = best.ok_or(IntakeError::EmptyTaxonomy)?;

        let total: usize = scores.iter().map(|(_, s)| s).sum();
        let confidence = if total > 0 {
            top as f64 / total as f64
        } else {
            0.0
        };

        let sub_request_type = if text.contains(FULL_PAYMENT_MARKER) {
            FULL_PAYMENT
        } else {
            PARTIAL_PAYMENT
        };

        debug!(
            request_type,
            sub_request_type,
            score = top,
            total,
            "Keyword classification"
        );

        Ok(ClassificationResult {
            request_type: request_type.to_string(),
            sub_request_type: sub_request_type.to_string(),
            confidence,
        })
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn classify(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<ClassificationResult, IntakeError> {
        self.classify_text(text, taxonomy)
    }
}

// ── Oracle-backed ───────────────────────────────────────────────────

/// Classifier that delegates the decision to an oracle.
pub struct OracleClassifier {
    oracle: Arc<dyn OracleService>,
}

impl OracleClassifier {
    pub fn new(oracle: Arc<dyn OracleService>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Classifier for OracleClassifier {
    fn name(&self) -> &'static str {
        "oracle"
    }

    async fn classify(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<ClassificationResult, IntakeError> {
        if taxonomy.is_empty() {
            return Err(IntakeError::EmptyTaxonomy);
        }

        let prompt = build_classification_prompt(text, taxonomy);
        let raw = self.oracle.complete(&prompt).await?;

        let result = parse_classification_reply(&raw).inspect_err(|e| {
            warn!(
                model = self.oracle.model_name(),
                raw_response = %raw,
                error = %e,
                "Unparseable classification reply"
            );
        })?;

        if !taxonomy.contains(&result.request_type) {
            warn!(
                request_type = %result.request_type,
                "Oracle returned a request type outside the taxonomy"
            );
        }
        Ok(result)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the classification prompt: instructions, taxonomy JSON, text.
fn build_classification_prompt(text: &str, taxonomy: &Taxonomy) -> String {
    // Maps of strings always serialize.
    let categories = serde_json::to_string_pretty(taxonomy).unwrap_or_default();
    let excerpt = truncate_chars(text, MAX_PROMPT_TEXT_CHARS);

    format!(
        "You classify loan-servicing emails. Pick exactly one request type from the \
         categories below, and one of its sub-types.\n\n\
         Categories (request type → sub-types):\n{categories}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"request_type\": \"...\", \"sub_request_type\": \"...\", \"confidence\": 0.0}}\n\n\
         Rules:\n\
         - request_type must be one of the category names\n\
         - confidence is between 0.0 and 1.0\n\n\
         Email:\n{excerpt}"
    )
}

/// First `max` characters of `text`, on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Oracle classification reply.
#[derive(Debug, Deserialize)]
struct ClassificationReply {
    request_type: String,
    sub_request_type: String,
    #[serde(default)]
    confidence: f64,
}

/// Parse an oracle reply into a `ClassificationResult`.
fn parse_classification_reply(raw: &str) -> Result<ClassificationResult, ParseError> {
    let json = extract_json_object(raw);
    let reply: ClassificationReply = serde_json::from_str(json).map_err(|e| {
        ParseError::new(ParseStage::Classification, format!("JSON parse error: {e}"))
    })?;

    if reply.request_type.trim().is_empty() {
        return Err(ParseError::new(
            ParseStage::Classification,
            "request_type is empty",
        ));
    }

    Ok(ClassificationResult {
        request_type: reply.request_type,
        sub_request_type: reply.sub_request_type,
        confidence: reply.confidence.clamp(0.0, 1.0),
    })
}
