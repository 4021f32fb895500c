//! OCR fallback selection.
//!
//! Every configured DPI gets one pass: rasterize the pages into a private
//! temporary directory, OCR each image, and score the pass by total text
//! length (mean confidence breaks ties). OCR output is only used when the
//! best pass yields strictly more text than native extraction did.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::ocr::OcrEngine;
use super::pdf::PdfBackend;
use super::{ExtractedPage, TextSource, total_text_len};
use crate::config::OcrSettings;

/// Result of one rasterize + OCR pass
#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    pub dpi: u32,
    pub pages: Vec<ExtractedPage>,
    pub text_len: usize,
    /// Mean over pages that reported a confidence
    pub mean_confidence: Option<f32>,
}

/// What the pipeline should index
#[derive(Debug, Clone, PartialEq)]
pub enum OcrOutcome {
    /// OCR improved on native text
    UseOcr { dpi: u32, pages: Vec<ExtractedPage> },
    /// Best pass did not beat native extraction
    NativeNotBeaten { best_len: usize },
    /// No pass produced any page
    NoOcrPages,
}

impl OcrOutcome {
    /// Merge the outcome with the native pages.
    ///
    /// Native pages drive the result, so every page survives. A page the OCR
    /// pass did not cover (beyond `max_pages`, or one that failed to render)
    /// keeps its native text.
    pub fn apply(self, native: Vec<ExtractedPage>) -> Vec<ExtractedPage> {
        let OcrOutcome::UseOcr { pages, .. } = self else {
            return native;
        };

        let mut by_number: HashMap<u32, ExtractedPage> =
            pages.into_iter().map(|p| (p.page_number, p)).collect();
        native
            .into_iter()
            .map(|page| by_number.remove(&page.page_number).unwrap_or(page))
            .collect()
    }

    pub fn used_ocr(&self) -> bool {
        matches!(self, OcrOutcome::UseOcr { .. })
    }
}

/// Pick the winning pass: strictly more text wins; on equal text the higher
/// mean confidence wins, and a reported confidence beats none.
pub fn select_best_pass(passes: &[PassSummary]) -> Option<&PassSummary> {
    let mut best: Option<&PassSummary> = None;
    for pass in passes.iter().filter(|p| !p.pages.is_empty()) {
        best = match best {
            None => Some(pass),
            Some(current) if pass.text_len > current.text_len => Some(pass),
            Some(current)
                if pass.text_len == current.text_len
                    && confidence_beats(pass.mean_confidence, current.mean_confidence) =>
            {
                Some(pass)
            }
            keep => keep,
        };
    }
    best
}

fn confidence_beats(candidate: Option<f32>, current: Option<f32>) -> bool {
    match (candidate, current) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Decide between native text and the best OCR pass.
pub fn choose(native_len: usize, passes: &[PassSummary]) -> OcrOutcome {
    match select_best_pass(passes) {
        None => OcrOutcome::NoOcrPages,
        Some(best) if best.text_len > native_len => OcrOutcome::UseOcr {
            dpi: best.dpi,
            pages: best.pages.clone(),
        },
        Some(best) => OcrOutcome::NativeNotBeaten {
            best_len: best.text_len,
        },
    }
}

/// Runs OCR passes for a document
pub struct OcrFallback {
    pdf: Arc<dyn PdfBackend>,
    engine: Arc<dyn OcrEngine>,
    settings: OcrSettings,
}

impl OcrFallback {
    pub fn new(pdf: Arc<dyn PdfBackend>, engine: Arc<dyn OcrEngine>, settings: OcrSettings) -> Self {
        Self {
            pdf,
            engine,
            settings,
        }
    }

    /// Run every DPI pass against `pdf_path` and choose a text source.
    ///
    /// Pass directories are created under `scratch` and removed when each
    /// pass ends, whatever the outcome.
    pub async fn run(&self, pdf_path: &Path, scratch: &Path, native: &[ExtractedPage]) -> OcrOutcome {
        let native_len = total_text_len(native);
        let mut passes = Vec::with_capacity(self.settings.dpi_candidates.len());

        for &dpi in &self.settings.dpi_candidates {
            let pass_dir = match TempDir::with_prefix_in(format!("ocr-{}-", dpi), scratch) {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(dpi, error = %e, "Failed to create OCR pass directory");
                    continue;
                }
            };

            let pass = self.run_pass(pdf_path, dpi, pass_dir.path()).await;
            metrics::counter!("folio_ocr_passes_total").increment(1);
            debug!(
                dpi,
                pages = pass.pages.len(),
                text_len = pass.text_len,
                mean_confidence = ?pass.mean_confidence,
                "OCR pass finished"
            );
            passes.push(pass);
        }

        let outcome = choose(native_len, &passes);
        match &outcome {
            OcrOutcome::UseOcr { dpi, pages } => {
                metrics::counter!("folio_ocr_chosen_total").increment(1);
                info!(
                    dpi,
                    native_len,
                    ocr_len = total_text_len(pages),
                    "Using OCR text"
                );
            }
            OcrOutcome::NativeNotBeaten { best_len } => {
                info!(native_len, best_len, "OCR did not improve on native text");
            }
            OcrOutcome::NoOcrPages => {
                warn!(native_len, "OCR produced no pages, keeping native text");
            }
        }
        outcome
    }

    async fn run_pass(&self, pdf_path: &Path, dpi: u32, out_dir: &Path) -> PassSummary {
        let pdf = Arc::clone(&self.pdf);
        let source: PathBuf = pdf_path.to_path_buf();
        let target: PathBuf = out_dir.to_path_buf();
        let max_pages = self.settings.max_pages;

        let rasterized = tokio::task::spawn_blocking(move || {
            pdf.rasterize(&source, dpi, max_pages, &target)
        })
        .await;

        let images = match rasterized {
            Ok(Ok(images)) => images,
            Ok(Err(e)) => {
                warn!(dpi, error = %e, "Rasterization failed");
                Vec::new()
            }
            Err(e) => {
                warn!(dpi, error = %e, "Rasterization task failed");
                Vec::new()
            }
        };

        let mut pages = Vec::with_capacity(images.len());
        let mut confidences = Vec::new();
        for image in images {
            let text = match self
                .engine
                .recognize(&image.image_path, &self.settings.languages)
                .await
            {
                Ok(page) => {
                    if let Some(conf) = page.confidence {
                        confidences.push(conf);
                    }
                    page.text
                }
                Err(e) => {
                    warn!(dpi, page = image.page_number, error = %e, "OCR failed for page");
                    String::new()
                }
            };
            pages.push(ExtractedPage {
                page_number: image.page_number,
                text,
                source: TextSource::Ocr,
            });
        }

        let mean_confidence = (!confidences.is_empty())
            .then(|| confidences.iter().sum::<f32>() / confidences.len() as f32);

        PassSummary {
            dpi,
            text_len: total_text_len(&pages),
            pages,
            mean_confidence,
        }
    }
}
