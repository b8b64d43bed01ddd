//! Text aggregation — email body plus attachment text into one `Document`.

use std::sync::Arc;

use tracing::debug;

use crate::extract::{AttachmentExtractor, TextExtractor};
use crate::pipeline::types::{Attachment, Document, SourceLabel};

/// Builds a source-attributed `Document` from an email and its attachments.
#[derive(Clone)]
pub struct TextAggregator {
    extractor: Arc<dyn TextExtractor>,
}

impl TextAggregator {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }

    /// Body first, then each attachment in arrival order.
    pub fn aggregate(&self, body: &str, attachments: &[Attachment]) -> Document {
        let mut document = Document::new();
        document.push(SourceLabel::EmailBody, body);

        for attachment in attachments {
            let text = self
                .extractor
                .extract(&attachment.filename, &attachment.content);
            debug!(
                filename = %attachment.filename,
                bytes = attachment.content.len(),
                chars = text.len(),
                "Attachment text extracted"
            );
            document.push(SourceLabel::Attachment(attachment.filename.clone()), text);
        }

        document
    }
}

impl Default for TextAggregator {
    fn default() -> Self {
        Self::new(Arc::new(AttachmentExtractor))
    }
}
