//! Strategy bundles — the classifier, field extractor and duplicate
//! policy that belong together.
//!
//! The orchestrator only talks to a `Strategy`, so the oracle-backed and
//! rule-based variants swap without touching it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IntakeError;
use crate::oracle::OracleService;
use crate::pipeline::classifier::{Classifier, KeywordClassifier, OracleClassifier};
use crate::pipeline::duplicate::{
    DuplicateDetector, DuplicateProbe, FingerprintPolicy, ReferencePolicy, SeenRegistry,
};
use crate::pipeline::fields::{FieldExtractor, OracleFieldExtractor, PatternFieldExtractor};
use crate::pipeline::rules::RulePatterns;
use crate::pipeline::types::{
    ClassificationResult, DuplicateVerdict, ExtractedFields, ExtractionSpec, Taxonomy,
};

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "oracle")]
    Oracle,
    #[serde(rename = "rules")]
    RuleBased,
}

impl StrategyKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::RuleBased => "rules",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oracle" | "llm" => Ok(Self::Oracle),
            "rules" | "rule_based" | "rule-based" => Ok(Self::RuleBased),
            other => Err(format!("unknown strategy '{other}' (expected 'oracle' or 'rules')")),
        }
    }
}

/// A classifier, field extractor and duplicate policy used together.
#[derive(Clone)]
pub struct Strategy {
    kind: StrategyKind,
    classifier: Arc<dyn Classifier>,
    extractor: Arc<dyn FieldExtractor>,
    duplicates: Arc<dyn DuplicateDetector>,
}

impl Strategy {
    /// Oracle classification and extraction, fingerprint duplicates.
    pub fn oracle(oracle: Arc<dyn OracleService>, registry: Arc<dyn SeenRegistry>) -> Self {
        Self {
            kind: StrategyKind::Oracle,
            classifier: Arc::new(OracleClassifier::new(Arc::clone(&oracle))),
            extractor: Arc::new(OracleFieldExtractor::new(oracle)),
            duplicates: Arc::new(FingerprintPolicy::new(registry)),
        }
    }

    /// Keyword classification, regex extraction, reference duplicates.
    pub fn rule_based(patterns: Arc<RulePatterns>) -> Self {
        Self {
            kind: StrategyKind::RuleBased,
            classifier: Arc::new(KeywordClassifier::new()),
            extractor: Arc::new(PatternFieldExtractor::new(Arc::clone(&patterns))),
            duplicates: Arc::new(ReferencePolicy::new(patterns)),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub async fn classify(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<ClassificationResult, IntakeError> {
        self.classifier.classify(text, taxonomy).await
    }

    pub async fn extract(
        &self,
        text: &str,
        spec: &ExtractionSpec,
    ) -> Result<ExtractedFields, IntakeError> {
        self.extractor.extract(text, spec).await
    }

    pub fn check_duplicate(&self, probe: &DuplicateProbe<'_>) -> DuplicateVerdict {
        self.duplicates.check(probe)
    }

    /// `classifier/extractor/duplicates` component names, for logging.
    pub fn describe(&self) -> String {
        format!(
            "{}/{}/{}",
            self.classifier.name(),
            self.extractor.name(),
            self.duplicates.name()
        )
    }
}
