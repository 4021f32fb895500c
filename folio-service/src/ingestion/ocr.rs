//! Optical character recognition of rasterized pages.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{ProcessingError, ServiceResult};

/// Recognized text of one page image
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPage {
    pub text: String,
    /// Mean word confidence (0-100) when the engine reports one
    pub confidence: Option<f32>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in `image` using `languages` (tesseract `-l` syntax)
    async fn recognize(&self, image: &Path, languages: &str) -> ServiceResult<OcrPage>;
}

/// Tesseract CLI engine
pub struct TesseractEngine {
    binary: String,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            binary: config.tesseract_bin.clone(),
            timeout: Duration::from_secs(config.page_timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: &Path, languages: &str) -> ServiceResult<OcrPage> {
        let ocr_error = |message: String| ProcessingError::Ocr {
            image: image.display().to_string(),
            message,
        };

        let child = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(languages)
            .arg("tsv")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ocr_error(format!("failed to start {}: {}", self.binary, e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ocr_error(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ocr_error(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ocr_error(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            ))
            .into());
        }

        let page = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(
            image = %image.display(),
            chars = page.text.len(),
            confidence = ?page.confidence,
            "OCR page recognized"
        );
        Ok(page)
    }
}

/// Rebuild page text from tesseract TSV output.
///
/// Word rows (level 5) are joined with spaces within a line and lines are
/// separated by newlines. Confidence is the mean of non-negative word
/// confidences.
pub fn parse_tsv(tsv: &str) -> OcrPage {
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(u32, u32, u32, u32)> = None;
    let mut confidences: Vec<f32> = Vec::new();

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.splitn(12, '\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }

        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        let key = (
            fields[1].parse().unwrap_or(0),
            fields[2].parse().unwrap_or(0),
            fields[3].parse().unwrap_or(0),
            fields[4].parse().unwrap_or(0),
        );
        match lines.last_mut() {
            Some(line) if current_key == Some(key) => {
                line.push(' ');
                line.push_str(word);
            }
            _ => {
                lines.push(word.to_string());
                current_key = Some(key);
            }
        }

        match fields[10].trim().parse::<f32>() {
            Ok(conf) if conf >= 0.0 => confidences.push(conf),
            _ => {}
        }
    }

    let confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f32>() / confidences.len() as f32)
    };

    OcrPage {
        text: lines.join("\n"),
        confidence,
    }
}
