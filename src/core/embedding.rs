//! Embedding-backed title similarity
//!
//! Embeddings are fetched once, before a run, through an [`EmbeddingService`].
//! The [`EmbeddingScorer`] then answers from its cache only, so it can be used
//! inside the parallel clustering stage without any I/O.

use crate::core::normalize::normalize;
use crate::core::service::ServiceError;
use crate::core::similarity::{ScoreOutcome, SimilarityScorer};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Embedding service trait
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    /// Embed several texts, returning vectors in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_text(text).await?);
        }
        Ok(vectors)
    }
}

#[cfg(feature = "openai-embeddings")]
pub use openai::OpenAIEmbeddingService;

#[cfg(feature = "openai-embeddings")]
mod openai {
    use super::EmbeddingService;
    use crate::core::service::{EmbeddingConfig, ServiceError};
    use async_trait::async_trait;
    use reqwest::Client;
    use serde::{Deserialize, Serialize};

    /// Response from OpenAI embeddings API
    #[derive(Debug, Deserialize)]
    struct OpenAIEmbeddingResponse {
        data: Vec<OpenAIEmbeddingData>,
    }

    #[derive(Debug, Deserialize)]
    struct OpenAIEmbeddingData {
        #[serde(default)]
        index: usize,
        embedding: Vec<f32>,
    }

    #[derive(Serialize)]
    struct OpenAIRequest<'a> {
        input: &'a [String],
        model: &'a str,
    }

    /// Client for OpenAI-compatible `/embeddings` endpoints
    pub struct OpenAIEmbeddingService {
        client: Client,
        base_url: String,
        model: String,
        api_key: String,
        batch_size: usize,
    }

    impl OpenAIEmbeddingService {
        pub fn new(base_url: String, model: String, api_key: String) -> Self {
            Self {
                client: Client::new(),
                base_url,
                model,
                api_key,
                batch_size: 100,
            }
        }

        /// Create from embedding config and API key
        pub fn from_config(config: &EmbeddingConfig, api_key: String) -> Self {
            let mut service = Self::new(
                config.openai_base_url.clone(),
                config.embedding_model.clone(),
                api_key,
            );
            service.batch_size = config.batch_size.max(1);
            service
        }

        async fn call_openai_api(&self, input: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            let request = OpenAIRequest {
                input,
                model: &self.model,
            };

            let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|e| ServiceError::Scoring(format!("Embedding request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ServiceError::Scoring(format!(
                    "Embedding API error {}: {}",
                    status, body
                )));
            }

            let mut parsed: OpenAIEmbeddingResponse = response.json().await.map_err(|e| {
                ServiceError::Scoring(format!("Failed to parse embedding response: {}", e))
            })?;

            if parsed.data.len() != input.len() {
                return Err(ServiceError::Scoring(format!(
                    "Expected {} embeddings, got {}",
                    input.len(),
                    parsed.data.len()
                )));
            }

            parsed.data.sort_by_key(|d| d.index);
            Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
        }
    }

    #[async_trait]
    impl EmbeddingService for OpenAIEmbeddingService {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            let mut vectors = self.call_openai_api(&[text.to_string()]).await?;
            vectors
                .pop()
                .ok_or_else(|| ServiceError::Scoring("No embeddings returned".to_string()))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            let mut vectors = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(self.batch_size) {
                vectors.extend(self.call_openai_api(chunk).await?);
            }
            Ok(vectors)
        }
    }
}

/// Cosine similarity of two vectors, 0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a: f32 = norm_a.sqrt();
    let norm_b: f32 = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Scores by cosine similarity of prefetched embeddings, rescaled to 0-100
#[derive(Debug, Clone, Default)]
pub struct EmbeddingScorer {
    vectors: Arc<HashMap<String, Vec<f32>>>,
}

impl EmbeddingScorer {
    /// Embed every distinct normalized text up front
    pub async fn prefetch<I, S>(
        service: &dyn EmbeddingService,
        texts: I,
    ) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = texts
            .into_iter()
            .map(|t| normalize(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        let distinct: Vec<String> = distinct.into_iter().collect();

        if distinct.is_empty() {
            return Ok(Self::default());
        }

        info!("Prefetching embeddings for {} distinct texts", distinct.len());
        let vectors = service.embed_batch(&distinct).await?;
        if vectors.len() != distinct.len() {
            return Err(ServiceError::Scoring(format!(
                "Expected {} embeddings, got {}",
                distinct.len(),
                vectors.len()
            )));
        }

        Ok(Self::from_vectors(distinct.into_iter().zip(vectors)))
    }

    /// Build from already computed vectors keyed by raw text
    pub fn from_vectors(vectors: impl IntoIterator<Item = (String, Vec<f32>)>) -> Self {
        let vectors = vectors
            .into_iter()
            .map(|(text, vector)| (normalize(&text), vector))
            .collect();
        Self {
            vectors: Arc::new(vectors),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl SimilarityScorer for EmbeddingScorer {
    fn name(&self) -> &'static str {
        "embedding"
    }

    fn score(&self, a: &str, b: &str) -> ScoreOutcome {
        let (a, b) = (normalize(a), normalize(b));
        match (self.vectors.get(&a), self.vectors.get(&b)) {
            (Some(va), Some(vb)) => {
                let cosine = cosine_similarity(va, vb).clamp(-1.0, 1.0) as f64;
                ScoreOutcome::Matched(((cosine + 1.0) / 2.0 * 100.0).clamp(0.0, 100.0))
            }
            _ => {
                debug!("No cached embedding for '{}' or '{}'", a, b);
                ScoreOutcome::Unavailable("embedding not prefetched".to_string())
            }
        }
    }
}
