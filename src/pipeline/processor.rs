//! Intake pipeline — turns a submission into a `PipelineResult`.
//!
//! Flow:
//! 1. Aggregate email body + attachment text into a `Document`
//! 2. Classify: on the email body when it has text, else on everything
//! 3. Extract fields: always on the combined text, where attachment
//!    figures live
//! 4. Detect secondary requests on the combined text
//! 5. Duplicate check of the active strategy
//!
//! Steps 2 and 3 are independent and run concurrently. The duplicate
//! check runs last, so a submission whose classification failed is never
//! recorded as seen.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::IntakeError;
use crate::extract::FileExtractor;
use crate::pipeline::aggregate::TextAggregator;
use crate::pipeline::duplicate::DuplicateProbe;
use crate::pipeline::secondary::SecondaryDetector;
use crate::pipeline::strategy::Strategy;
use crate::pipeline::types::{
    Document, EmailSubmission, ExtractionSpec, PipelineResult, SourceLabel, Taxonomy,
};

/// Default number of submissions processed at once by `process_batch`.
const DEFAULT_BATCH_CONCURRENCY: usize = 4;

/// Sequences aggregation, classification, extraction, secondary-request
/// detection and duplicate checking for one strategy.
pub struct IntakePipeline {
    strategy: Strategy,
    aggregator: TextAggregator,
    files: Arc<FileExtractor>,
    secondary: SecondaryDetector,
    batch_concurrency: usize,
}

impl IntakePipeline {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            aggregator: TextAggregator::default(),
            files: Arc::new(FileExtractor::new()),
            secondary: SecondaryDetector::default(),
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    /// File extractor for `process_document`, e.g. one with an OCR engine.
    pub fn with_file_extractor(mut self, files: FileExtractor) -> Self {
        self.files = Arc::new(files);
        self
    }

    pub fn with_secondary(mut self, secondary: SecondaryDetector) -> Self {
        self.secondary = secondary;
        self
    }

    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.max(1);
        self
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Process an email with attachments.
    pub async fn process(
        &self,
        submission: &EmailSubmission,
        taxonomy: &Taxonomy,
        spec: &ExtractionSpec,
    ) -> Result<PipelineResult, IntakeError> {
        info!(
            sender = %submission.sender,
            subject = %submission.subject,
            attachments = submission.attachments.len(),
            strategy = %self.strategy.kind(),
            "Processing submission"
        );

        let document = self
            .aggregator
            .aggregate(&submission.body, &submission.attachments);

        self.run(
            &submission.sender,
            &submission.subject,
            &document,
            taxonomy,
            spec,
        )
        .await
    }

    /// Process a document file, optionally accompanied by the email text
    /// it was attached to.
    ///
    /// Unlike attachments, a missing file or an unsupported format is an
    /// error here.
    pub async fn process_document(
        &self,
        path: &Path,
        email_content: Option<&str>,
        taxonomy: &Taxonomy,
        spec: &ExtractionSpec,
    ) -> Result<PipelineResult, IntakeError> {
        info!(
            path = %path.display(),
            with_email = email_content.is_some(),
            strategy = %self.strategy.kind(),
            "Processing document"
        );

        let files = Arc::clone(&self.files);
        let owned_path = path.to_path_buf();
        let doc_text = tokio::task::spawn_blocking(move || files.extract_file(&owned_path))
            .await
            .map_err(|e| IntakeError::Extraction {
                file: path.display().to_string(),
                reason: format!("extraction task failed: {e}"),
            })??;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut document = Document::new();
        document.push(SourceLabel::EmailBody, email_content.unwrap_or_default());
        document.push(SourceLabel::Attachment(filename), doc_text);

        self.run("", "", &document, taxonomy, spec).await
    }

    /// Process several submissions, at most `batch_concurrency` at a time.
    ///
    /// Failures are logged and skipped; results keep input order.
    pub async fn process_batch(
        &self,
        submissions: &[EmailSubmission],
        taxonomy: &Taxonomy,
        spec: &ExtractionSpec,
    ) -> Vec<PipelineResult> {
        let count = submissions.len();
        info!(count, "Processing submission batch");

        let outcomes: Vec<_> = futures::stream::iter(submissions)
            .map(|submission| async move {
                (submission, self.process(submission, taxonomy, spec).await)
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let mut results = Vec::with_capacity(count);
        for (submission, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(
                        sender = %submission.sender,
                        subject = %submission.subject,
                        error = %e,
                        "Failed to process submission in batch"
                    );
                }
            }
        }

        info!(
            processed = results.len(),
            total = count,
            "Batch processing complete"
        );
        results
    }

    async fn run(
        &self,
        sender: &str,
        subject: &str,
        document: &Document,
        taxonomy: &Taxonomy,
        spec: &ExtractionSpec,
    ) -> Result<PipelineResult, IntakeError> {
        let combined = document.combined();
        let classify_text = document.email_text().unwrap_or(combined.as_str());
        debug!(
            classify_on_email = document.email_text().is_some(),
            combined_chars = combined.len(),
            "Document aggregated"
        );

        let (classification, extracted_data) = tokio::try_join!(
            self.strategy.classify(classify_text, taxonomy),
            self.strategy.extract(&combined, spec),
        )?;

        let secondary_requests = self
            .secondary
            .detect(&combined, &classification.request_type);

        let duplicate = self.strategy.check_duplicate(&DuplicateProbe {
            sender,
            subject,
            text: &combined,
        });

        let result = PipelineResult {
            id: Uuid::new_v4(),
            strategy: self.strategy.kind(),
            classification,
            amount_value: extracted_data.amount_decimal(),
            extracted_data,
            secondary_requests,
            duplicate,
            sources: document.sources(),
            processed_at: Utc::now(),
        };

        info!(
            id = %result.id,
            request_type = %result.classification.request_type,
            sub_request_type = %result.classification.sub_request_type,
            confidence = result.classification.confidence,
            secondary = result.secondary_requests.len(),
            duplicate = result.duplicate.is_duplicate,
            "Submission processed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::error::OracleError;
    use crate::extract::OcrEngine;
    use crate::oracle::OracleService;
    use crate::pipeline::classifier::{FULL_PAYMENT, PARTIAL_PAYMENT};
    use crate::pipeline::duplicate::InMemoryRegistry;
    use crate::pipeline::rules::RulePatterns;
    use crate::pipeline::secondary::SecondaryTrigger;
    use crate::pipeline::strategy::StrategyKind;
    use crate::pipeline::types::{Attachment, NOT_FOUND};

    fn rules_pipeline() -> IntakePipeline {
        IntakePipeline::new(Strategy::rule_based(Arc::new(RulePatterns::default())))
    }

    fn spec_taxonomy() -> Taxonomy {
        Taxonomy::new()
            .with("principal_payment", ["principal", "payment"])
            .with("general_inquiry", ["inquiry"])
    }

    fn email(body: &str, attachments: Vec<Attachment>) -> EmailSubmission {
        EmailSubmission {
            sender: "agent@bank.com".into(),
            subject: "Loan servicing".into(),
            body: body.into(),
            attachments,
        }
    }

    /// Oracle that answers classification and extraction prompts with
    /// fixed replies and records every prompt it sees.
    struct ScriptedOracle {
        classification: String,
        extraction: String,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(classification: &str, extraction: &str) -> Self {
            Self {
                classification: classification.into(),
                extraction: extraction.into(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OracleService for ScriptedOracle {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.starts_with("Extract") {
                Ok(self.extraction.clone())
            } else {
                Ok(self.classification.clone())
            }
        }
    }

    // ── Rule-based ──────────────────────────────────────────────────

    #[tokio::test]
    async fn end_to_end_rule_based_example() {
        let submission = email(
            "Please process principal payment, total of USD 20,000,000.00, effective 20-Nov-2023",
            vec![],
        );
        let result = rules_pipeline()
            .process(&submission, &spec_taxonomy(), &ExtractionSpec::new())
            .await
            .unwrap();

        assert_eq!(result.strategy, StrategyKind::RuleBased);
        assert_eq!(result.classification.request_type, "principal_payment");
        assert_eq!(result.classification.sub_request_type, FULL_PAYMENT);
        assert_eq!(result.extracted_data.get("amount"), Some("20,000,000.00"));
        assert_eq!(result.amount_value, Some(dec!(20000000.00)));
        assert_eq!(result.extracted_data.get("effective_date"), Some("20-Nov-2023"));
        assert_eq!(result.extracted_data.get("deal_name"), Some(NOT_FOUND));
        assert!(!result.duplicate.is_duplicate);
        assert_eq!(result.sources, vec!["email_body"]);
    }

    #[tokio::test]
    async fn classification_prefers_email_text_extraction_uses_attachment() {
        // The attachment would push the vote to general_inquiry, but only
        // the email body is classified; the amount lives in the attachment.
        let submission = email(
            "Principal payment request, see attached.",
            vec![Attachment::new(
                "notice.txt",
                "Inquiry inquiry. Total of USD 5,000.00 effective 01-Dec-2023",
            )],
        );
        let result = rules_pipeline()
            .process(&submission, &spec_taxonomy(), &ExtractionSpec::new())
            .await
            .unwrap();

        assert_eq!(result.classification.request_type, "principal_payment");
        assert_eq!(result.classification.sub_request_type, PARTIAL_PAYMENT);
        assert_eq!(result.extracted_data.get("amount"), Some("5,000.00"));
        assert_eq!(result.extracted_data.get("effective_date"), Some("01-Dec-2023"));
        assert_eq!(result.sources, vec!["email_body", "attachment:notice.txt"]);
    }

    #[tokio::test]
    async fn blank_body_classifies_combined_text() {
        let submission = email(
            "   ",
            vec![Attachment::new("q.txt", "A general inquiry about fees")],
        );
        let result = rules_pipeline()
            .process(&submission, &spec_taxonomy(), &ExtractionSpec::new())
            .await
            .unwrap();
        assert_eq!(result.classification.request_type, "general_inquiry");
    }

    #[tokio::test]
    async fn secondary_requests_from_combined_text() {
        let submission = email(
            "principal payment",
            vec![Attachment::new("a.txt", "Also pay accrued interest and modify the term")],
        );
        let result = rules_pipeline()
            .process(&submission, &Taxonomy::loan_servicing(), &ExtractionSpec::new())
            .await
            .unwrap();
        assert_eq!(result.classification.request_type, "principal_payment");
        assert_eq!(
            result.secondary_requests,
            vec!["interest_payment", "loan_modification"]
        );
    }

    #[tokio::test]
    async fn custom_secondary_triggers() {
        let pipeline = rules_pipeline().with_secondary(SecondaryDetector::new(vec![
            SecondaryTrigger::new("fee", "fee_payment"),
        ]));
        let submission = email("Principal payment plus the agency fee. Interest too.", vec![]);
        let result = pipeline
            .process(&submission, &Taxonomy::loan_servicing(), &ExtractionSpec::new())
            .await
            .unwrap();
        assert_eq!(result.secondary_requests, vec!["fee_payment"]);
    }

    #[tokio::test]
    async fn attachment_name_does_not_add_secondary_requests() {
        let submission = email(
            "principal payment",
            vec![Attachment::new("interest_modify_notice.txt", "USD 1,000.00")],
        );
        let result = rules_pipeline()
            .process(&submission, &Taxonomy::loan_servicing(), &ExtractionSpec::new())
            .await
            .unwrap();
        assert_eq!(result.classification.request_type, "principal_payment");
        assert!(result.secondary_requests.is_empty());
    }

    #[tokio::test]
    async fn attachment_name_does_not_drive_classification() {
        let submission = email(
            "",
            vec![Attachment::new("general_inquiry_question.txt", "USD 5.00")],
        );
        let result = rules_pipeline()
            .process(&submission, &spec_taxonomy(), &ExtractionSpec::new())
            .await
            .unwrap();
        assert_ne!(result.classification.request_type, "general_inquiry");
        assert_eq!(result.classification.confidence, 0.0);
        assert_eq!(result.extracted_data.get("amount"), Some("5.00"));
    }

    #[tokio::test]
    async fn rule_based_reference_is_duplicate_first_time() {
        let submission = email(
            "Reference: CANTOR FITZGERALD LP USD 425MM MAR22\nprincipal payment",
            vec![],
        );
        let result = rules_pipeline()
            .process(&submission, &spec_taxonomy(), &ExtractionSpec::new())
            .await
            .unwrap();
        assert!(result.duplicate.is_duplicate);
        assert!(result.duplicate.reason.contains("reference number"));
    }

    #[tokio::test]
    async fn empty_taxonomy_fails() {
        let err = rules_pipeline()
            .process(&email("x", vec![]), &Taxonomy::new(), &ExtractionSpec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::EmptyTaxonomy));
    }

    // ── Oracle ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn oracle_pipeline_fingerprints_duplicates() {
        let oracle = Arc::new(ScriptedOracle::new(
            r#"{"request_type": "principal_payment", "sub_request_type": "full_payment", "confidence": 0.9}"#,
            r#"{"amount": "20,000,000.00", "effective_date": "20-Nov-2023"}"#,
        ));
        let registry = Arc::new(InMemoryRegistry::new());
        let pipeline = IntakePipeline::new(Strategy::oracle(oracle.clone(), registry.clone()));
        let submission = email("Please repay the principal.", vec![]);
        let spec = ExtractionSpec::new()
            .with("amount", "payment amount")
            .with("effective_date", "date");

        let first = pipeline
            .process(&submission, &spec_taxonomy(), &spec)
            .await
            .unwrap();
        assert_eq!(first.strategy, StrategyKind::Oracle);
        assert_eq!(first.classification.request_type, "principal_payment");
        assert!((first.classification.confidence - 0.9).abs() < 1e-9);
        assert_eq!(first.extracted_data.get("amount"), Some("20,000,000.00"));
        assert!(!first.duplicate.is_duplicate);
        assert_eq!(first.duplicate.reason, "Unique email.");

        let second = pipeline
            .process(&submission, &spec_taxonomy(), &spec)
            .await
            .unwrap();
        assert!(second.duplicate.is_duplicate);
        assert_eq!(registry.len(), 1);
        assert_eq!(oracle.prompts.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn oracle_sees_email_text_for_classification_and_all_text_for_extraction() {
        let oracle = Arc::new(ScriptedOracle::new(
            r#"{"request_type": "general_inquiry", "sub_request_type": "other"}"#,
            r#"{"amount": null}"#,
        ));
        let pipeline = IntakePipeline::new(Strategy::oracle(
            oracle.clone(),
            Arc::new(InMemoryRegistry::new()),
        ));
        let submission = email(
            "Body only sentence.",
            vec![Attachment::new("figures.txt", "Attachment figure USD 7.00")],
        );
        let spec = ExtractionSpec::new().with("amount", "amount");
        let result = pipeline
            .process(&submission, &spec_taxonomy(), &spec)
            .await
            .unwrap();
        assert_eq!(result.extracted_data.get("amount"), Some(NOT_FOUND));

        let prompts = oracle.prompts.lock().unwrap();
        let classify = prompts.iter().find(|p| !p.starts_with("Extract")).unwrap();
        let extract = prompts.iter().find(|p| p.starts_with("Extract")).unwrap();
        assert!(classify.contains("Body only sentence."));
        assert!(!classify.contains("Attachment figure"));
        assert!(extract.contains("Body only sentence."));
        assert!(extract.contains("Attachment figure USD 7.00"));
    }

    #[tokio::test]
    async fn oracle_parse_error_propagates_and_nothing_is_recorded() {
        let oracle = Arc::new(ScriptedOracle::new("not json", "{}"));
        let registry = Arc::new(InMemoryRegistry::new());
        let pipeline = IntakePipeline::new(Strategy::oracle(oracle, registry.clone()));
        let err = pipeline
            .process(&email("hi", vec![]), &spec_taxonomy(), &ExtractionSpec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Parse(_)));
        assert!(registry.is_empty());
    }

    // ── Documents & batches ─────────────────────────────────────────

    #[tokio::test]
    async fn process_document_with_email_content() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(b"RE: CANTOR FITZGERALD LP USD 425MM MAR22\nUSD 1,500,000.00 effective 15-Jan-2024")
            .unwrap();

        let result = rules_pipeline()
            .process_document(
                file.path(),
                Some("Please process the attached principal payment."),
                &Taxonomy::loan_servicing(),
                &ExtractionSpec::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.classification.request_type, "principal_payment");
        assert_eq!(
            result.extracted_data.get("deal_name"),
            Some("CANTOR FITZGERALD LP USD 425MM MAR22")
        );
        assert_eq!(result.extracted_data.get("amount"), Some("1,500,000.00"));
        assert_eq!(result.sources.len(), 2);
    }

    struct FixedOcr(&'static str);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _image: &[u8]) -> Result<String, IntakeError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn process_document_image_goes_through_ocr() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"\x89PNG\r\n").unwrap();

        let pipeline = rules_pipeline().with_file_extractor(
            FileExtractor::new().with_ocr(Arc::new(FixedOcr("Principal payment USD 2,500.00"))),
        );
        let result = pipeline
            .process_document(file.path(), None, &spec_taxonomy(), &ExtractionSpec::new())
            .await
            .unwrap();

        assert_eq!(result.classification.request_type, "principal_payment");
        assert_eq!(result.extracted_data.get("amount"), Some("2,500.00"));
        assert_eq!(result.amount_value, Some(dec!(2500.00)));
        assert_eq!(result.sources.len(), 1);

        let err = rules_pipeline()
            .process_document(file.path(), None, &spec_taxonomy(), &ExtractionSpec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn process_document_missing_file() {
        let err = rules_pipeline()
            .process_document(
                Path::new("/no/such/file.pdf"),
                None,
                &Taxonomy::loan_servicing(),
                &ExtractionSpec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn process_document_unsupported_format() {
        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        let err = rules_pipeline()
            .process_document(file.path(), None, &Taxonomy::loan_servicing(), &ExtractionSpec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn batch_skips_failures_and_keeps_order() {
        let oracle = Arc::new(ScriptedOracle::new(
            r#"{"request_type": "general_inquiry", "sub_request_type": "other"}"#,
            "{}",
        ));
        let pipeline = IntakePipeline::new(Strategy::oracle(
            oracle,
            Arc::new(InMemoryRegistry::new()),
        ))
        .with_batch_concurrency(2);

        let submissions = vec![
            email("first", vec![]),
            email("second", vec![]),
            email("first", vec![]),
        ];
        let results = pipeline
            .process_batch(&submissions, &spec_taxonomy(), &ExtractionSpec::new())
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.duplicate.is_duplicate).count(), 1);

        let failing = rules_pipeline()
            .process_batch(&submissions, &Taxonomy::new(), &ExtractionSpec::new())
            .await;
        assert!(failing.is_empty());
    }
}
