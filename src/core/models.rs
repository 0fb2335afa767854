use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::errors::FailureReason;

pub type CompanyId = i64;
pub type JobId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentFormat {
    Pdf,
    LegacyDoc,
    ModernDoc,
    PlainText,
    RichText,
    Image,
    Unknown,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::LegacyDoc => "legacy-doc",
            DocumentFormat::ModernDoc => "modern-doc",
            DocumentFormat::PlainText => "plain-text",
            DocumentFormat::RichText => "rich-text",
            DocumentFormat::Image => "image",
            DocumentFormat::Unknown => "unknown",
        }
    }

    /// Formats whose pages may be scans, so optical recognition is worth a try.
    pub fn ocr_eligible(&self) -> bool {
        matches!(self, DocumentFormat::Pdf | DocumentFormat::Image)
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub declared_type: Option<String>,
    /// Set for archive entries that were not inflated because they were too big.
    pub exceeds_size_limit: bool,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            declared_type: None,
            exceeds_size_limit: false,
        }
    }

    pub fn oversized(file_name: impl Into<String>) -> Self {
        Self {
            exceeds_size_limit: true,
            ..Self::new(file_name, Vec::new())
        }
    }

    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatch {
    pub batch_id: Uuid,
    pub company_id: CompanyId,
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchProcessingState {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FileStage {
    Queued,
    Extracting,
    Ocr,
    Structuring,
    DedupChecking,
    Done,
    Failed,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    Success,
    Failed,
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTask {
    pub index: usize,
    pub file_name: String,
    pub format: Option<DocumentFormat>,
    pub stage: FileStage,
    pub outcome: Option<FileOutcome>,
    pub failure_reason: Option<FailureReason>,
    pub error: Option<String>,
    pub resume_id: Option<Uuid>,
    pub duplicate_of: Option<Uuid>,
    #[serde(default)]
    pub dedup_unchecked: bool,
}

impl FileTask {
    pub fn queued(index: usize, file_name: impl Into<String>) -> Self {
        Self {
            index,
            file_name: file_name.into(),
            format: None,
            stage: FileStage::Queued,
            outcome: None,
            failure_reason: None,
            error: None,
            resume_id: None,
            duplicate_of: None,
            dedup_unchecked: false,
        }
    }
}

/// Poll response for one batch. `total == successful + failed + duplicate` once completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub batch_id: Uuid,
    pub company_id: CompanyId,
    pub status: BatchProcessingState,
    pub progress: i32,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub duplicate: usize,
    pub per_file: Vec<FileTask>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

impl BatchStatus {
    pub fn processed(&self) -> usize {
        self.successful + self.failed + self.duplicate
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            BatchProcessingState::Completed | BatchProcessingState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub char_count: usize,
    pub converter: String,
    pub ocr_used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionProvenance {
    pub converter: String,
    pub ocr_used: bool,
    pub extracted_chars: usize,
}

/// Structured profile returned by the structuring service. Free-form JSON object
/// with a handful of well-known keys (`Name`, `Email`, `Phone`, `Skills`, `Experience`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ResumeProfile(pub Map<String, Value>);

impl ResumeProfile {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), Value::String(value.into()));
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str("Name")
    }

    pub fn email(&self) -> Option<&str> {
        self.get_str("Email")
    }

    pub fn phone(&self) -> Option<&str> {
        self.get_str("Phone")
    }

    pub fn normalized_email(&self) -> Option<String> {
        self.email().map(|e| e.to_ascii_lowercase())
    }

    pub fn skills(&self) -> Vec<String> {
        match self.0.get("Skills") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(joined)) => joined
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn experience(&self) -> &[Value] {
        self.0
            .get("Experience")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub source_batch_id: Uuid,
    pub batch_total_files: usize,
    pub original_filename: String,
    pub storage_path: String,
    pub file_type: DocumentFormat,
    pub file_size: u64,
    pub content_hash: String,
    pub processing_duration_ms: u64,
    pub extraction: ExtractionProvenance,
    pub profile: ResumeProfile,
    pub fingerprint: Option<Vec<f32>>,
    pub is_unique: bool,
    #[serde(default)]
    pub dedup_unchecked: bool,
    pub review_match: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedResume {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub batch_id: Uuid,
    pub file_name: String,
    pub storage_path: Option<String>,
    pub content_hash: String,
    pub reason: FailureReason,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintEntry {
    pub resume_id: Uuid,
    pub email: Option<String>,
    pub content_hash: String,
    /// `None` for résumés stored while the embedding service was unavailable.
    pub fingerprint: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Applied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateApplication {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub resume_id: Uuid,
    pub job_id: Option<JobId>,
    pub candidate_email: String,
    pub candidate_name: Option<String>,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestSettings {
    pub data_dir: Option<PathBuf>,
    pub max_file_size_bytes: u64,
    pub min_text_chars: usize,
    pub max_input_chars: usize,
    pub chars_per_token: usize,
    pub max_input_tokens: usize,
    pub aggressive_compaction_ratio: f64,
    pub duplicate_similarity_threshold: f32,
    pub max_concurrent_files: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub upstream_timeout_secs: u64,
    pub converter_timeout_secs: u64,
    pub ocr_max_pages: u32,
    pub ocr_language: String,
    pub tesseract_path: String,
    pub pdftoppm_path: String,
    pub antiword_path: String,
    pub soffice_path: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_max_output_tokens: u32,
    pub embedding_model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub job_retention_hours: i64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_file_size_bytes: 10 * 1024 * 1024,
            min_text_chars: 100,
            max_input_chars: 40_000,
            chars_per_token: 4,
            max_input_tokens: 10_000,
            aggressive_compaction_ratio: 0.5,
            duplicate_similarity_threshold: 0.95,
            max_concurrent_files: 10,
            max_retries: 3,
            retry_delay_ms: 1000,
            upstream_timeout_secs: 120,
            converter_timeout_secs: 60,
            ocr_max_pages: 3,
            ocr_language: "eng".to_string(),
            tesseract_path: "tesseract".to_string(),
            pdftoppm_path: "pdftoppm".to_string(),
            antiword_path: "antiword".to_string(),
            soffice_path: "soffice".to_string(),
            llm_base_url: "https://api.openai.com/v1/".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_max_output_tokens: 2000,
            embedding_model: "text-embedding-3-small".to_string(),
            api_key: None,
            job_retention_hours: 24,
        }
    }
}

impl IngestSettings {
    pub fn sanitized(mut self) -> Self {
        self.max_file_size_bytes = self.max_file_size_bytes.max(1);
        self.min_text_chars = self.min_text_chars.max(1);
        self.chars_per_token = self.chars_per_token.max(1);
        self.max_input_tokens = self.max_input_tokens.max(1);
        self.max_input_chars = self.max_input_chars.max(self.chars_per_token);
        if !(self.aggressive_compaction_ratio > 0.0 && self.aggressive_compaction_ratio < 1.0) {
            self.aggressive_compaction_ratio = 0.5;
        }
        if !(self.duplicate_similarity_threshold > 0.0 && self.duplicate_similarity_threshold <= 1.0)
        {
            self.duplicate_similarity_threshold = 0.95;
        }
        self.max_concurrent_files = self.max_concurrent_files.max(1);
        self.max_retries = self.max_retries.max(1);
        self.upstream_timeout_secs = self.upstream_timeout_secs.max(1);
        self.converter_timeout_secs = self.converter_timeout_secs.max(1);
        self.ocr_max_pages = self.ocr_max_pages.max(1);
        self.job_retention_hours = self.job_retention_hours.max(1);
        self
    }
}
