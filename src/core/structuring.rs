use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use super::errors::StructuringError;
use super::models::{IngestSettings, ResumeProfile};

const PLACEHOLDER_VALUES: [&str; 4] = ["unknown", "n/a", "none", "null"];

const SYSTEM_PROMPT: &str = "You turn resume text into a single JSON object. \
Reply with JSON only, no prose and no markdown.";

const PROFILE_INSTRUCTIONS: &str = r#"Read the resume below and return one JSON object describing the candidate.
Only include fields that the resume actually contains. Use arrays for anything with several values.
Copy profile links (GitHub, LinkedIn, portfolio) exactly as written.
Do not compute total experience; it is derived later from the Experience entries.

Expected shape:
{
  "Name": "", "Email": "", "Phone": "", "Location": "", "Address": "",
  "GitHub": "", "LinkedIn": "", "Portfolio": "", "Summary": "",
  "Experience": [{"Company": "", "Position": "", "Duration": "e.g. Sep 2024 - Present", "Description": ""}],
  "Education": [{"Institution": "", "Degree": "", "Field": "", "Year": ""}],
  "Skills": [], "Certifications": [], "Languages": [],
  "Projects": [{"Name": "", "Description": "", "Technologies": []}]
}

Resume text:
"#;

/// Narrow seam over the external text-understanding service.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract_profile(&self, text: &str) -> Result<ResumeProfile, StructuringError>;
}

/// Bounded retry for transient structuring failures. Each attempt carries its own
/// timeout, and a timeout counts as `UpstreamUnavailable`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.retry_delay_ms),
            attempt_timeout: Duration::from_secs(settings.upstream_timeout_secs),
        }
    }

    pub async fn run(
        &self,
        extractor: &dyn StructuredExtractor,
        text: &str,
    ) -> Result<ResumeProfile, StructuringError> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(
                self.attempt_timeout,
                extractor.extract_profile(text),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(StructuringError::UpstreamUnavailable(format!(
                    "no response within {}s",
                    self.attempt_timeout.as_secs()
                ))),
            };

            match result {
                Ok(profile) => return Ok(profile),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "structuring call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exponential = self.base_delay.saturating_mul(1u32 << attempt.min(10));
        let jitter_cap = (self.base_delay.as_millis() as u64 / 2).max(1);
        let jitter = rand::rng().random_range(0..jitter_cap);
        exponential + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// OpenAI-compatible chat completions provider.
#[derive(Clone)]
pub struct LlmProfileExtractor {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    max_output_tokens: u32,
}

impl LlmProfileExtractor {
    pub fn from_settings(settings: &IngestSettings, client: Client) -> anyhow::Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .context("no API key configured for the structuring service")?;

        Ok(Self {
            client,
            endpoint: api_endpoint(&settings.llm_base_url, "chat/completions")?,
            api_key,
            model: settings.llm_model.clone(),
            max_output_tokens: settings.llm_max_output_tokens,
        })
    }
}

#[async_trait]
impl StructuredExtractor for LlmProfileExtractor {
    async fn extract_profile(&self, text: &str) -> Result<ResumeProfile, StructuringError> {
        let prompt = format!("{PROFILE_INSTRUCTIONS}{text}");
        let body = ChatRequest {
            model: &self.model,
            max_tokens: self.max_output_tokens,
            temperature: 0.1,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| StructuringError::UpstreamUnavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| StructuringError::MalformedResponse(err.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| StructuringError::MalformedResponse("empty completion".to_string()))?;

        debug!(chars = content.len(), "structuring call succeeded");
        parse_profile_json(&content)
    }
}

pub fn api_endpoint(base_url: &str, path: &str) -> anyhow::Result<Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base).with_context(|| format!("invalid API base URL {base_url}"))?;
    base.join(path)
        .with_context(|| format!("cannot join {path} onto {base}"))
}

pub fn classify_http_failure(status: StatusCode, body: &str) -> StructuringError {
    let (message, code) = match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.code),
        Err(_) => (body.to_string(), None),
    };
    let detail = format!("status {}: {}", status.as_u16(), message.trim());

    if is_context_overflow(code.as_deref(), &message) {
        return StructuringError::ContentTooLarge(detail);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return StructuringError::RateLimited(detail);
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return StructuringError::UpstreamUnavailable(detail);
    }
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return StructuringError::ContentTooLarge(detail);
    }
    if status.is_client_error() {
        return StructuringError::Rejected(detail);
    }

    StructuringError::UpstreamUnavailable(detail)
}

fn is_context_overflow(code: Option<&str>, message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    code == Some("context_length_exceeded")
        || lower.contains("context_length_exceeded")
        || lower.contains("maximum context length")
        || lower.contains("too long")
}

/// Parses model output into a cleaned profile. Tolerates code fences and stray
/// prose around the JSON object.
pub fn parse_profile_json(raw: &str) -> Result<ResumeProfile, StructuringError> {
    let candidate = strip_json_fences(raw);
    let candidate = match (candidate.find('{'), candidate.rfind('}')) {
        (Some(start), Some(end)) if end > start => &candidate[start..=end],
        _ => {
            return Err(StructuringError::MalformedResponse(
                "no JSON object in response".to_string(),
            ))
        }
    };

    let value: Value = serde_json::from_str(candidate)
        .map_err(|err| StructuringError::MalformedResponse(err.to_string()))?;

    let Value::Object(map) = value else {
        return Err(StructuringError::MalformedResponse(
            "response is not a JSON object".to_string(),
        ));
    };

    Ok(ResumeProfile(clean_object(map)))
}

fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(stripped) => stripped
            .trim()
            .strip_suffix("```")
            .map(str::trim)
            .unwrap_or(stripped.trim()),
        None => text,
    }
}

fn clean_object(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter_map(|(key, value)| clean_value(value).map(|v| (key, v)))
        .collect()
}

/// Drops nulls, blanks and "unknown"-style placeholders, recursively.
fn clean_value(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || PLACEHOLDER_VALUES.contains(&trimmed.to_ascii_lowercase().as_str())
            {
                None
            } else {
                Some(Value::String(trimmed.to_string()))
            }
        }
        Value::Array(items) => {
            let cleaned: Vec<Value> = items.into_iter().filter_map(clean_value).collect();
            (!cleaned.is_empty()).then_some(Value::Array(cleaned))
        }
        Value::Object(map) => {
            let cleaned = clean_object(map);
            (!cleaned.is_empty()).then_some(Value::Object(cleaned))
        }
        other => Some(other),
    }
}
