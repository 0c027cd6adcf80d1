//! PDF-to-text conversion.
//!
//! Two strategies are tried in order: the structural extractor from
//! `pdf-extract`, then a page-by-page walk of the text layer with `lopdf`.
//! Output that is empty or mostly unprintable counts as a failed strategy,
//! so scanned and encrypted PDFs fall through to the next one.

use crate::error::{RefSpeciesError, Result};
use lopdf::Document;
use std::path::Path;
use tracing::{debug, info, warn};

/// Minimum share of printable characters for output to be accepted
const MIN_PRINTABLE_RATIO: f64 = 0.85;

/// Minimum number of whitespace-separated words for output to be accepted
const MIN_WORDS: usize = 10;

/// Converts a PDF file into plain text.
pub trait TextExtractor: Send + Sync {
    /// Extract the full text of the PDF at `path`.
    fn extract_text(&self, path: &Path) -> Result<String>;
}

/// Default extractor: `pdf-extract`, falling back to `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn structural(path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;
        // pdf-extract panics on some malformed inputs
        match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes)) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(RefSpeciesError::TextExtraction(format!("pdf-extract: {}", e))),
            Err(_) => Err(RefSpeciesError::TextExtraction(
                "pdf-extract: extractor panicked".to_string(),
            )),
        }
    }

    fn page_by_page(path: &Path) -> Result<String> {
        let doc = Document::load(path)
            .map_err(|e| RefSpeciesError::TextExtraction(format!("lopdf load: {}", e)))?;

        if doc.is_encrypted() {
            return Err(RefSpeciesError::TextExtraction(
                "lopdf: document is encrypted".to_string(),
            ));
        }

        let mut pages = Vec::new();
        for (page_num, _page_id) in doc.get_pages() {
            // A broken page should not sink the whole document
            match doc.extract_text(&[page_num]) {
                Ok(text) => pages.push(text),
                Err(e) => debug!(page = page_num, error = %e, "Skipping unreadable page"),
            }
        }

        if pages.is_empty() {
            return Err(RefSpeciesError::TextExtraction(
                "lopdf: no readable pages".to_string(),
            ));
        }
        Ok(pages.join("\n"))
    }
}

impl TextExtractor for PdfTextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String> {
        if !path.is_file() {
            return Err(RefSpeciesError::TextExtraction(format!(
                "not a readable file: {}",
                path.display()
            )));
        }

        let strategies: [(&str, fn(&Path) -> Result<String>); 2] = [
            ("pdf-extract", Self::structural),
            ("lopdf", Self::page_by_page),
        ];

        let mut failures = Vec::new();
        for (name, strategy) in strategies {
            match strategy(path) {
                Ok(text) if is_quality_acceptable(&text) => {
                    info!(strategy = name, chars = text.len(), path = %path.display(), "Extracted PDF text");
                    return Ok(text);
                }
                Ok(text) => {
                    warn!(strategy = name, chars = text.len(), "Extracted text failed quality check");
                    failures.push(format!("{}: low-quality output", name));
                }
                Err(e) => {
                    warn!(strategy = name, error = %e, "PDF extraction strategy failed");
                    failures.push(e.to_string());
                }
            }
        }

        Err(RefSpeciesError::TextExtraction(format!(
            "{}: {}",
            path.display(),
            failures.join("; ")
        )))
    }
}

/// Reject empty or garbled output (scanned pages, broken font encodings).
pub fn is_quality_acceptable(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }

    let printable = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_ascii_punctuation() || c.is_whitespace())
        .count();

    let words = text.split_whitespace().count();

    (printable as f64 / total as f64) >= MIN_PRINTABLE_RATIO && words >= MIN_WORDS
}
