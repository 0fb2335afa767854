use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use tracing::{debug, warn};

use super::models::IngestSettings;

const ENV_PREFIX: &str = "RESUME_INGEST_";

pub struct SettingsStore {
    file_path: PathBuf,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore {
    pub fn new() -> Self {
        Self {
            file_path: settings_path(),
        }
    }

    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.file_path
    }

    /// File settings (or defaults), then `.env`, then process environment.
    pub async fn load(&self) -> anyhow::Result<IngestSettings> {
        let _ = dotenvy::dotenv();
        let from_file = self.load_file().await?;
        Ok(apply_env_overrides(from_file, |key| std::env::var(key).ok()).sanitized())
    }

    async fn load_file(&self) -> anyhow::Result<IngestSettings> {
        if !tokio::fs::try_exists(&self.file_path)
            .await
            .unwrap_or(false)
        {
            debug!(path = %self.file_path.display(), "no settings file, using defaults");
            return Ok(IngestSettings::default());
        }

        let content = tokio::fs::read_to_string(&self.file_path)
            .await
            .with_context(|| {
                format!("failed to read settings file {}", self.file_path.display())
            })?;

        serde_json::from_str::<IngestSettings>(&content).with_context(|| {
            format!("invalid JSON in settings file {}", self.file_path.display())
        })
    }

    /// The API key is never written to disk.
    pub async fn save(&self, settings: &IngestSettings) -> anyhow::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.file_path, json).await?;
        Ok(())
    }
}

/// `lookup` is the environment; tests pass a map instead.
pub fn apply_env_overrides<F>(mut settings: IngestSettings, lookup: F) -> IngestSettings
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| {
        lookup(&format!("{ENV_PREFIX}{name}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    fn parse<T: FromStr>(name: &str, raw: Option<String>, current: &mut T) {
        if let Some(raw) = raw {
            match raw.parse::<T>() {
                Ok(value) => *current = value,
                Err(_) => warn!(variable = name, value = %raw, "ignoring unparsable override"),
            }
        }
    }

    if let Some(dir) = var("DATA_DIR") {
        settings.data_dir = Some(PathBuf::from(dir));
    }
    parse("MAX_FILE_SIZE_BYTES", var("MAX_FILE_SIZE_BYTES"), &mut settings.max_file_size_bytes);
    parse("MIN_TEXT_CHARS", var("MIN_TEXT_CHARS"), &mut settings.min_text_chars);
    parse("MAX_INPUT_CHARS", var("MAX_INPUT_CHARS"), &mut settings.max_input_chars);
    parse("MAX_INPUT_TOKENS", var("MAX_INPUT_TOKENS"), &mut settings.max_input_tokens);
    parse(
        "DUPLICATE_THRESHOLD",
        var("DUPLICATE_THRESHOLD"),
        &mut settings.duplicate_similarity_threshold,
    );
    parse("MAX_CONCURRENT_FILES", var("MAX_CONCURRENT_FILES"), &mut settings.max_concurrent_files);
    parse("MAX_RETRIES", var("MAX_RETRIES"), &mut settings.max_retries);
    parse("RETRY_DELAY_MS", var("RETRY_DELAY_MS"), &mut settings.retry_delay_ms);
    parse("UPSTREAM_TIMEOUT_SECS", var("UPSTREAM_TIMEOUT_SECS"), &mut settings.upstream_timeout_secs);
    parse("JOB_RETENTION_HOURS", var("JOB_RETENTION_HOURS"), &mut settings.job_retention_hours);

    let paths = [
        ("TESSERACT_PATH", &mut settings.tesseract_path),
        ("PDFTOPPM_PATH", &mut settings.pdftoppm_path),
        ("ANTIWORD_PATH", &mut settings.antiword_path),
        ("SOFFICE_PATH", &mut settings.soffice_path),
        ("LLM_BASE_URL", &mut settings.llm_base_url),
        ("LLM_MODEL", &mut settings.llm_model),
        ("EMBEDDING_MODEL", &mut settings.embedding_model),
        ("OCR_LANGUAGE", &mut settings.ocr_language),
    ];
    for (name, slot) in paths {
        if let Some(value) = var(name) {
            *slot = value;
        }
    }

    if let Some(key) = var("API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
        settings.api_key = Some(key);
    }

    settings
}

fn settings_path() -> PathBuf {
    app_data_root().join("settings.json")
}

pub fn app_data_root() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(local_app_data).join("ResumeIngest");
        }
    }

    if let Some(path) = dirs::data_local_dir() {
        return path.join("ResumeIngest");
    }

    PathBuf::from(".").join("ResumeIngest")
}
