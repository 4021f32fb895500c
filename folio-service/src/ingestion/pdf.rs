//! PDF access through PDFium.
//!
//! Native text extraction and page rasterization are synchronous and CPU
//! bound; callers run them on the blocking pool.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

use super::ExtractedPage;
use crate::error::{ProcessingError, ServiceResult};

/// A page rendered to an image file for OCR
#[derive(Debug, Clone, PartialEq)]
pub struct RasterizedPage {
    /// 1-based
    pub page_number: u32,
    pub image_path: PathBuf,
}

/// PDF operations used by ingestion
pub trait PdfBackend: Send + Sync {
    /// One entry per page, in page order, from the PDF text layer
    fn extract_pages(&self, path: &Path) -> ServiceResult<Vec<ExtractedPage>>;

    /// Render pages (at most `max_pages`) at `dpi` into PNG files under `out_dir`
    fn rasterize(
        &self,
        path: &Path,
        dpi: u32,
        max_pages: Option<u32>,
        out_dir: &Path,
    ) -> ServiceResult<Vec<RasterizedPage>>;
}

/// Create a new Pdfium instance (dynamically linked).
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
pub fn create_pdfium() -> Result<Pdfium, ProcessingError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ProcessingError::PdfiumUnavailable {
            message: format!("{:?}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// PDFium-backed implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumBackend;

impl PdfiumBackend {
    /// Fail fast at startup if the PDFium library cannot be bound
    pub fn check_available(&self) -> ServiceResult<()> {
        create_pdfium()?;
        Ok(())
    }
}

fn load_document<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, ProcessingError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| ProcessingError::PdfLoad {
            message: format!("{:?}", e),
        })
}

impl PdfBackend for PdfiumBackend {
    fn extract_pages(&self, path: &Path) -> ServiceResult<Vec<ExtractedPage>> {
        let pdfium = create_pdfium()?;
        let document = load_document(&pdfium, path)?;

        let page_count = document.pages().len();
        info!(pages = page_count, "Extracting native PDF text");

        let mut pages = Vec::with_capacity(page_count as usize);
        for (page_index, page) in document.pages().iter().enumerate() {
            let page_number = page_index as u32 + 1;

            let text = page
                .text()
                .map_err(|e| ProcessingError::TextExtraction {
                    page: page_number,
                    message: format!("{:?}", e),
                })?;

            pages.push(ExtractedPage::native(page_number, text.all().trim()));
        }

        Ok(pages)
    }

    fn rasterize(
        &self,
        path: &Path,
        dpi: u32,
        max_pages: Option<u32>,
        out_dir: &Path,
    ) -> ServiceResult<Vec<RasterizedPage>> {
        let pdfium = create_pdfium()?;
        let document = load_document(&pdfium, path)?;

        let limit = max_pages.map(|m| m as usize).unwrap_or(usize::MAX);
        let pixels_per_point = dpi as f32 / 72.0;
        let mut rendered = Vec::new();

        for (page_index, page) in document.pages().iter().enumerate().take(limit) {
            let page_number = page_index as u32 + 1;

            let width = (page.width().value * pixels_per_point).ceil() as i32;
            let height = (page.height().value * pixels_per_point).ceil() as i32;
            let config = PdfRenderConfig::new()
                .set_target_width(width.max(1))
                .set_target_height(height.max(1));

            let bitmap = match page.render_with_config(&config) {
                Ok(bitmap) => bitmap,
                Err(e) => {
                    warn!(page = page_number, dpi, error = ?e, "Failed to render page");
                    continue;
                }
            };

            let image_path = out_dir.join(format!("page-{:05}.png", page_number));
            if let Err(e) = bitmap
                .as_image()
                .save_with_format(&image_path, ImageFormat::Png)
            {
                warn!(page = page_number, dpi, error = %e, "Failed to save rendered page");
                continue;
            }

            rendered.push(RasterizedPage {
                page_number,
                image_path,
            });
        }

        debug!(dpi, pages = rendered.len(), "Rasterized PDF pages");
        Ok(rendered)
    }
}
