//! Shared types for the intake pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::strategy::StrategyKind;

/// Sentinel for a field the extractor could not locate.
pub const NOT_FOUND: &str = "Not Found";

/// Joins an attachment's text onto whatever precedes it.
const ATTACHMENT_SEPARATOR: &str = "\n\n--- Attachment ---\n";

// ── Inbound submission ──────────────────────────────────────────────

/// A file attached to an inbound email.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// An inbound email with its attachments, as handed to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct EmailSubmission {
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

// ── Document ────────────────────────────────────────────────────────

/// Where a piece of document text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLabel {
    EmailBody,
    Attachment(String),
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmailBody => f.write_str("email_body"),
            Self::Attachment(name) => write!(f, "attachment:{name}"),
        }
    }
}

/// One attributed block of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub source: SourceLabel,
    pub text: String,
}

/// Ordered, source-attributed text of one submission.
///
/// Sections keep insertion order: email body first, then attachments in
/// the order they arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    sections: Vec<Section>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: SourceLabel, text: impl Into<String>) {
        self.sections.push(Section {
            source,
            text: text.into(),
        });
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Text of the email body section, if it has any non-blank content.
    pub fn email_text(&self) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.source == SourceLabel::EmailBody)
            .map(|s| s.text.as_str())
            .filter(|t| !t.trim().is_empty())
    }

    /// All sections joined in order, each attachment behind a separator
    /// line. Blank sections are skipped.
    ///
    /// Only extracted text goes in; attachment names stay in `sources()`.
    pub fn combined(&self) -> String {
        let mut out = String::new();
        for section in self.sections.iter().filter(|s| !s.text.trim().is_empty()) {
            if !out.is_empty() {
                match section.source {
                    SourceLabel::Attachment(_) => out.push_str(ATTACHMENT_SEPARATOR),
                    SourceLabel::EmailBody => out.push_str("\n\n"),
                }
            }
            out.push_str(&section.text);
        }
        out
    }

    /// Labels of the non-blank sections, in order.
    pub fn sources(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| s.source.to_string())
            .collect()
    }
}

// ── Per-call configuration ──────────────────────────────────────────

/// Request types with their associated strings, in declaration order.
///
/// For the oracle strategy the strings are sub-type names; for the
/// rule-based strategy they are scoring keywords. Iteration order is the
/// order in which types were declared (JSON object order is kept).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Taxonomy {
    #[serde(with = "ordered_pairs")]
    entries: Vec<(String, Vec<String>)>,
}

impl Taxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a request type, keeping its original position on replace.
    pub fn with<I, S>(mut self, request_type: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|(name, _)| name == request_type) {
            Some(slot) => slot.1 = values,
            None => self.entries.push((request_type.to_string(), values)),
        }
        self
    }

    /// The loan-servicing request types and their scoring keywords.
    pub fn loan_servicing() -> Self {
        Self::new()
            .with("principal_payment", ["principal", "payment", "repay", "balance"])
            .with("loan_modification", ["modify", "modification", "term", "sofr"])
            .with("interest_payment", ["interest", "rate", "payment"])
            .with("general_inquiry", ["inquiry", "question", "information"])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn contains(&self, request_type: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == request_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fields to extract, each with a free-text instruction for the oracle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionSpec {
    #[serde(with = "ordered_pairs")]
    rules: Vec<(String, String)>,
}

impl ExtractionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, rule: impl Into<String>) -> Self {
        let rule = rule.into();
        match self.rules.iter_mut().find(|(name, _)| name == field) {
            Some(slot) => slot.1 = rule,
            None => self.rules.push((field.to_string(), rule)),
        }
        self
    }

    /// The three loan-servicing fields the rule-based extractor also produces.
    pub fn loan_servicing() -> Self {
        Self::new()
            .with(
                "deal_name",
                "Name of the deal or facility, usually after 'RE:' (e.g. CANTOR FITZGERALD LP USD 425MM MAR22)",
            )
            .with(
                "amount",
                "Transaction amount in USD, digits with thousands separators and two decimals",
            )
            .with("effective_date", "Effective date of the transaction, formatted DD-Mon-YYYY")
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules
            .iter()
            .map(|(name, rule)| (name.as_str(), rule.as_str()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ── Stage outputs ───────────────────────────────────────────────────

/// Request type decision.
///
/// `confidence` is in `[0, 1]`. For the rule-based strategy it is a
/// relative score, not a calibrated probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub request_type: String,
    pub sub_request_type: String,
    pub confidence: f64,
}

/// Extracted field values, in the order the fields were requested.
/// Missing fields hold [`NOT_FOUND`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedFields {
    #[serde(with = "ordered_pairs")]
    values: Vec<(String, String)>,
}

impl ExtractedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, value: impl Into<String>) {
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| name == field) {
            Some(slot) => slot.1 = value,
            None => self.values.push((field.to_string(), value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    /// The `amount` field as a decimal, with thousands separators removed.
    pub fn amount_decimal(&self) -> Option<Decimal> {
        self.get("amount")
            .filter(|v| *v != NOT_FOUND)
            .and_then(|v| v.replace(',', "").trim().parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    #[serde(rename = "duplicate")]
    pub is_duplicate: bool,
    #[serde(rename = "duplicate_reason")]
    pub reason: String,
}

impl DuplicateVerdict {
    pub fn duplicate(reason: impl Into<String>) -> Self {
        Self {
            is_duplicate: true,
            reason: reason.into(),
        }
    }

    pub fn unique(reason: impl Into<String>) -> Self {
        Self {
            is_duplicate: false,
            reason: reason.into(),
        }
    }
}

// ── Pipeline result ─────────────────────────────────────────────────

/// Everything the pipeline concluded about one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub id: Uuid,
    pub strategy: StrategyKind,
    #[serde(flatten)]
    pub classification: ClassificationResult,
    pub extracted_data: ExtractedFields,
    /// `extracted_data.amount` as a number, when it parses as one.
    pub amount_value: Option<Decimal>,
    pub secondary_requests: Vec<String>,
    #[serde(flatten)]
    pub duplicate: DuplicateVerdict,
    /// Labels of the document sections that contributed text.
    pub sources: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

// ── Serde helpers ───────────────────────────────────────────────────

/// (De)serialize `Vec<(String, V)>` as a JSON object, keeping key order.
/// A repeated key overwrites the earlier value in place.
mod ordered_pairs {
    use std::fmt;
    use std::marker::PhantomData;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S, V>(pairs: &Vec<(String, V)>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(pairs.len()))?;
        for (key, value) in pairs {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        struct PairsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
            type Value = Vec<(String, V)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs: Vec<(String, V)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    match pairs.iter_mut().find(|(existing, _)| *existing == key) {
                        Some(slot) => slot.1 = value,
                        None => pairs.push((key, value)),
                    }
                }
                Ok(pairs)
            }
        }

        deserializer.deserialize_map(PairsVisitor(PhantomData))
    }
}
