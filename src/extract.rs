//! Text extraction from attachments and document files.
//!
//! Two entry points with deliberately different strictness:
//! - [`AttachmentExtractor`] (email path) never fails. Unknown types and
//!   broken files yield empty text.
//! - [`FileExtractor`] (document path) reports missing files and
//!   unsupported formats as errors.
//!
//! PDF text comes from the embedded text layer (`pdf` cargo feature, on
//! by default).
//! Images need an [`OcrEngine`]; none ships with the crate.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::IntakeError;

/// Image extensions the file extractor hands to OCR.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

/// Lenient, extension-dispatched attachment text extraction.
pub trait TextExtractor: Send + Sync {
    /// Text of the attachment, or an empty string when it has none we can read.
    fn extract(&self, filename: &str, content: &[u8]) -> String;
}

/// Optical character recognition for image documents.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &[u8]) -> Result<String, IntakeError>;
}

/// Lower-cased extension of `filename`, if any.
fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

// ── Attachments ─────────────────────────────────────────────────────

/// `.pdf` → text layer, `.txt` → UTF-8 (lossy), anything else → empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachmentExtractor;

impl TextExtractor for AttachmentExtractor {
    fn extract(&self, filename: &str, content: &[u8]) -> String {
        match extension_of(filename).as_deref() {
            Some("pdf") => match pdf_pages(filename, content) {
                Ok(pages) => pages.iter().fold(String::new(), |mut out, page| {
                    out.push_str(page);
                    out.push('\n');
                    out
                }),
                Err(e) => {
                    warn!(filename, error = %e, "PDF attachment unreadable, ignoring");
                    String::new()
                }
            },
            Some("txt") => String::from_utf8_lossy(content).into_owned(),
            other => {
                debug!(filename, extension = ?other, "Skipping unsupported attachment");
                String::new()
            }
        }
    }
}

// ── Document files ──────────────────────────────────────────────────

/// Strict extractor for the file-based pipeline.
///
/// `.pdf` pages are prefixed with `--- Page N ---` markers; `.txt` is
/// decoded; images go through OCR when an engine is configured.
#[derive(Clone, Default)]
pub struct FileExtractor {
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl FileExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn extract_file(&self, path: &Path) -> Result<String, IntakeError> {
        if !path.exists() {
            return Err(IntakeError::FileNotFound(path.display().to_string()));
        }

        let name = path.display().to_string();
        let extension = extension_of(&name).unwrap_or_default();

        match extension.as_str() {
            "pdf" => {
                let bytes = std::fs::read(path)?;
                let pages = pdf_pages(&name, &bytes)?;
                Ok(pages
                    .iter()
                    .enumerate()
                    .map(|(i, page)| format!("\n--- Page {} ---\n{}", i + 1, page))
                    .collect())
            }
            "txt" => {
                let bytes = std::fs::read(path)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            ext if IMAGE_EXTENSIONS.contains(&ext) => match &self.ocr {
                Some(engine) => {
                    let bytes = std::fs::read(path)?;
                    engine.recognize(&bytes)
                }
                None => Err(IntakeError::UnsupportedFormat {
                    extension: format!(".{ext} (no OCR engine configured)"),
                }),
            },
            ext => Err(IntakeError::UnsupportedFormat {
                extension: format!(".{ext}"),
            }),
        }
    }
}

// ── PDF ─────────────────────────────────────────────────────────────

/// Text of each page, split on form feeds. Blank pages are dropped.
#[cfg(feature = "pdf")]
fn pdf_pages(name: &str, bytes: &[u8]) -> Result<Vec<String>, IntakeError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| IntakeError::Extraction {
        file: name.to_string(),
        reason: e.to_string(),
    })?;
    Ok(split_pages(&text))
}

#[cfg(not(feature = "pdf"))]
fn pdf_pages(name: &str, _bytes: &[u8]) -> Result<Vec<String>, IntakeError> {
    Err(IntakeError::Extraction {
        file: name.to_string(),
        reason: "PDF support disabled (build with the `pdf` feature)".to_string(),
    })
}

#[cfg_attr(not(feature = "pdf"), allow(dead_code))]
fn split_pages(text: &str) -> Vec<String> {
    text.split('\x0C')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .map(str::to_string)
        .collect()
}
