use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::errors::EmbeddingError;
use super::models::IngestSettings;
use super::structuring::api_endpoint;

/// Upper bound the embedding endpoint accepts, in characters of input.
const MAX_EMBEDDING_INPUT_CHARS: usize = 8191 * 4;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    /// `None` when no key is configured; dedup then runs unchecked.
    pub fn from_settings(settings: &IngestSettings, client: Client) -> anyhow::Result<Option<Self>> {
        let Some(api_key) = settings.api_key.clone().filter(|k| !k.trim().is_empty()) else {
            return Ok(None);
        };

        Ok(Some(Self {
            client,
            endpoint: api_endpoint(&settings.llm_base_url, "embeddings")
                .context("embedding endpoint")?,
            api_key,
            model: settings.embedding_model.clone(),
        }))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = match text.char_indices().nth(MAX_EMBEDDING_INPUT_CHARS) {
            Some((cut, _)) => &text[..cut],
            None => text,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input,
            })
            .send()
            .await
            .map_err(|err| EmbeddingError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Unavailable(format!("status {status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::Malformed(err.to_string()))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::Malformed("no embedding in response".to_string()))?;

        debug!(dimensions = vector.len(), "embedding computed");
        Ok(vector)
    }
}

/// Cosine similarity in [-1, 1]. Mismatched or zero vectors compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}
