use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::models::{DocumentFormat, IngestSettings};

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn recognize(&self, format: DocumentFormat, data: &[u8]) -> anyhow::Result<String>;
}

/// Shells out to `tesseract`. PDFs are rasterised with `pdftoppm` first, and only
/// the first `max_pages` pages are read.
#[derive(Clone)]
pub struct TesseractCliOcrService {
    pub tesseract_executable_path: String,
    pub pdftoppm_executable_path: String,
    pub language: String,
    pub max_pages: u32,
    pub timeout: Duration,
}

impl TesseractCliOcrService {
    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self {
            tesseract_executable_path: non_empty_or(&settings.tesseract_path, "tesseract"),
            pdftoppm_executable_path: non_empty_or(&settings.pdftoppm_path, "pdftoppm"),
            language: non_empty_or(&settings.ocr_language, "eng"),
            max_pages: settings.ocr_max_pages.max(1),
            timeout: Duration::from_secs(settings.upstream_timeout_secs),
        }
    }

    async fn rasterize_pdf(&self, input: &Path, out_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let prefix = out_dir.join("page");
        let mut command = Command::new(&self.pdftoppm_executable_path);
        command
            .arg("-r")
            .arg("150")
            .arg("-l")
            .arg(self.max_pages.to_string())
            .arg("-png")
            .arg(input)
            .arg(&prefix)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .context("pdftoppm timed out")?
            .with_context(|| format!("failed to run {}", self.pdftoppm_executable_path))?;
        if !output.status.success() {
            anyhow::bail!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let mut pages = Vec::new();
        let mut dir = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let is_page = path
                .file_name()
                .and_then(|v| v.to_str())
                .is_some_and(|name| name.starts_with("page") && name.ends_with(".png"));
            if is_page {
                pages.push(path);
            }
        }
        // pdftoppm zero-pads page numbers, so lexical order is page order.
        pages.sort();
        Ok(pages)
    }

    async fn run_tesseract(&self, image: &Path) -> anyhow::Result<String> {
        let mut command = Command::new(&self.tesseract_executable_path);
        command
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .context("tesseract timed out")?
            .with_context(|| format!("failed to run {}", self.tesseract_executable_path))?;

        if !output.status.success() {
            anyhow::bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl OcrEngine for TesseractCliOcrService {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(&self, format: DocumentFormat, data: &[u8]) -> anyhow::Result<String> {
        let temp_dir = tempfile::Builder::new()
            .prefix("resume-ingest-ocr-")
            .tempdir()
            .context("failed to create OCR temp dir")?;

        match format {
            DocumentFormat::Pdf => {
                let input_path = temp_dir.path().join("resume.pdf");
                tokio::fs::write(&input_path, data).await?;

                let pages = self.rasterize_pdf(&input_path, temp_dir.path()).await?;
                debug!(pages = pages.len(), "rasterised pdf for ocr");

                let mut text = String::new();
                for page in pages {
                    let page_text = self.run_tesseract(&page).await?;
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(page_text.trim());
                }
                Ok(text)
            }
            DocumentFormat::Image => {
                let input_path = temp_dir.path().join("resume.img");
                tokio::fs::write(&input_path, data).await?;
                self.run_tesseract(&input_path).await
            }
            other => anyhow::bail!("ocr does not apply to {}", other.as_str()),
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.trim().to_string()
    }
}
