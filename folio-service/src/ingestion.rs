//! Document text acquisition.
//!
//! This module turns a local PDF into ordered page texts:
//! - Native extraction from the PDF text layer (`pdf`)
//! - OCR fallback across candidate DPIs with best-pass selection (`fallback`, `ocr`)
//! - Overlapping character-window chunking (`chunker`)

pub mod chunker;
pub mod fallback;
pub mod ocr;
pub mod pdf;

use serde::{Deserialize, Serialize};

use crate::config::OcrSettings;

pub use chunker::{Chunk, Chunker};
pub use fallback::{OcrFallback, OcrOutcome, PassSummary};
pub use ocr::{OcrEngine, OcrPage, TesseractEngine};
pub use pdf::{PdfBackend, PdfiumBackend, RasterizedPage};

/// Where a page's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    Native,
    Ocr,
}

/// Text of one page, produced and consumed within a single ingestion run
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    /// 1-based
    pub page_number: u32,
    pub text: String,
    pub source: TextSource,
}

impl ExtractedPage {
    pub fn native(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            source: TextSource::Native,
        }
    }

    pub fn ocr(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            source: TextSource::Ocr,
        }
    }

    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Sum of page text lengths in characters
pub fn total_text_len(pages: &[ExtractedPage]) -> usize {
    pages.iter().map(ExtractedPage::text_len).sum()
}

/// OCR runs when enabled and native text is short or entirely blank.
pub fn needs_ocr(settings: &OcrSettings, pages: &[ExtractedPage]) -> bool {
    settings.enabled
        && (total_text_len(pages) < settings.text_threshold || pages.iter().all(|p| p.is_blank()))
}
