pub mod docx;
pub mod legacy_doc;
pub mod pdf;
pub mod text;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::errors::{FailureReason, FileFailure};
use super::models::{DocumentFormat, ExtractedText, IngestSettings};
use super::ocr::{OcrEngine, TesseractCliOcrService};

/// One way of turning document bytes into text. Converters are tried in order
/// per format; an `Err` or short output just moves the chain along.
#[async_trait]
pub trait Converter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, data: &[u8]) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterAttempt {
    pub converter: String,
    pub outcome: String,
}

/// Every converter came up short. Carries what was tried, in order.
#[derive(Debug, Clone)]
pub struct ExtractionFailure {
    pub format: DocumentFormat,
    pub attempts: Vec<ConverterAttempt>,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "no converter available for {}", self.format.as_str());
        }
        let tried: Vec<String> = self
            .attempts
            .iter()
            .map(|a| format!("{} ({})", a.converter, a.outcome))
            .collect();
        write!(f, "no usable text; tried {}", tried.join(", "))
    }
}

impl From<ExtractionFailure> for FileFailure {
    fn from(failure: ExtractionFailure) -> Self {
        FileFailure::new(FailureReason::UnreadableContent, failure.to_string())
    }
}

pub struct ExtractionChain {
    chains: HashMap<DocumentFormat, Vec<Arc<dyn Converter>>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    min_text_chars: usize,
    converter_timeout: Duration,
}

impl ExtractionChain {
    pub fn new(min_text_chars: usize, converter_timeout: Duration) -> Self {
        Self {
            chains: HashMap::new(),
            ocr: None,
            min_text_chars: min_text_chars.max(1),
            converter_timeout,
        }
    }

    /// Production wiring: lightweight in-process readers first, external tools after.
    pub fn from_settings(settings: &IngestSettings) -> Self {
        let converter_timeout = Duration::from_secs(settings.converter_timeout_secs);
        let soffice: Arc<dyn Converter> = Arc::new(legacy_doc::SofficeConverter::new(
            settings.soffice_path.clone(),
            converter_timeout,
        ));
        let ocr = TesseractCliOcrService::from_settings(settings);

        Self::new(settings.min_text_chars, converter_timeout)
            .with_converter(DocumentFormat::Pdf, Arc::new(pdf::PdfTextConverter))
            .with_converter(
                DocumentFormat::LegacyDoc,
                Arc::new(legacy_doc::AntiwordConverter::new(
                    settings.antiword_path.clone(),
                    converter_timeout,
                )),
            )
            .with_converter(DocumentFormat::LegacyDoc, Arc::clone(&soffice))
            .with_converter(DocumentFormat::ModernDoc, Arc::new(docx::DocxConverter))
            .with_converter(DocumentFormat::ModernDoc, Arc::clone(&soffice))
            .with_converter(DocumentFormat::PlainText, Arc::new(text::PlainTextConverter))
            .with_converter(DocumentFormat::RichText, Arc::new(text::RtfConverter))
            .with_converter(DocumentFormat::RichText, soffice)
            .with_ocr(Arc::new(ocr))
    }

    pub fn with_converter(mut self, format: DocumentFormat, converter: Arc<dyn Converter>) -> Self {
        self.chains.entry(format).or_default().push(converter);
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Walks the converters for `format` until one clears the length threshold.
    /// `on_ocr` fires right before the optical fallback starts so callers can
    /// surface the stage change.
    pub async fn extract<F>(
        &self,
        format: DocumentFormat,
        data: &[u8],
        on_ocr: F,
    ) -> Result<ExtractedText, ExtractionFailure>
    where
        F: FnOnce() + Send,
    {
        let mut attempts = Vec::new();
        let converters = self.chains.get(&format).map(Vec::as_slice).unwrap_or(&[]);

        for converter in converters {
            let name = converter.name();
            match timeout(self.converter_timeout, converter.extract(data)).await {
                Ok(Ok(raw)) => {
                    let text = text::normalize_text(&raw);
                    let char_count = text.chars().count();
                    if char_count >= self.min_text_chars {
                        debug!(converter = name, chars = char_count, "converter produced text");
                        return Ok(ExtractedText {
                            text,
                            char_count,
                            converter: name.to_string(),
                            ocr_used: false,
                        });
                    }
                    info!(
                        converter = name,
                        chars = char_count,
                        min = self.min_text_chars,
                        "converter output too short, falling back"
                    );
                    attempts.push(ConverterAttempt {
                        converter: name.to_string(),
                        outcome: format!("{char_count} chars"),
                    });
                }
                Ok(Err(err)) => {
                    warn!(converter = name, error = %err, "converter failed, falling back");
                    attempts.push(ConverterAttempt {
                        converter: name.to_string(),
                        outcome: format!("error: {err}"),
                    });
                }
                Err(_) => {
                    warn!(
                        converter = name,
                        timeout_secs = self.converter_timeout.as_secs(),
                        "converter timed out, falling back"
                    );
                    attempts.push(ConverterAttempt {
                        converter: name.to_string(),
                        outcome: "timed out".to_string(),
                    });
                }
            }
        }

        if format.ocr_eligible() {
            if let Some(ocr) = &self.ocr {
                on_ocr();
                info!(format = format.as_str(), "running optical recognition");
                match ocr.recognize(format, data).await {
                    Ok(raw) => {
                        let text = text::normalize_text(&raw);
                        let char_count = text.chars().count();
                        if char_count >= self.min_text_chars {
                            return Ok(ExtractedText {
                                text,
                                char_count,
                                converter: ocr.name().to_string(),
                                ocr_used: true,
                            });
                        }
                        attempts.push(ConverterAttempt {
                            converter: ocr.name().to_string(),
                            outcome: format!("{char_count} chars"),
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "optical recognition failed");
                        attempts.push(ConverterAttempt {
                            converter: ocr.name().to_string(),
                            outcome: format!("error: {err}"),
                        });
                    }
                }
            }
        }

        Err(ExtractionFailure { format, attempts })
    }
}
