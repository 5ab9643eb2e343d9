//! Embedding module - text to fixed-length vectors.
//!
//! The provider is a black box behind [`EmbeddingProvider`]; the pipeline
//! only depends on `embed` and `dimension`. The shipped implementation
//! calls the OpenAI embeddings API (`text-embedding-3-small`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::RagError;

// ============================================================================
// EmbeddingProvider trait
// ============================================================================

/// Maps text to a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embed a batch. Default: one call per text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Output dimensionality. Every returned vector has exactly this length.
    fn dimension(&self) -> usize;

    /// Provider/model name, for logs.
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI embedding
// ============================================================================

const OPENAI_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";
const EMBED_MODEL: &str = "text-embedding-3-small";

/// Default output dimensionality of `text-embedding-3-small`.
pub const DEFAULT_DIMENSION: usize = 1536;

/// Texts per request. The API accepts far more; this keeps request
/// bodies small for large crawls.
const BATCH_SIZE: usize = 64;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
/// Minimum delay between requests, to stay under the provider rate limit.
const MIN_DELAY_MS: u64 = 200;

/// OpenAI embeddings API client.
pub struct OpenAiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    last_request: Mutex<Option<Instant>>,
}

impl OpenAiEmbedding {
    pub fn new(api_key: String) -> Result<Self, RagError> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// The model supports shortened output via the `dimensions` request
    /// parameter, up to its native width.
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self, RagError> {
        if dimension == 0 || dimension > DEFAULT_DIMENSION {
            return Err(RagError::Configuration(format!(
                "invalid embedding dimension {}: {} supports 1..={}",
                dimension, EMBED_MODEL, DEFAULT_DIMENSION
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            dimension,
            last_request: Mutex::new(None),
        })
    }

    /// Wait out the minimum inter-request delay.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let min_delay = Duration::from_millis(MIN_DELAY_MS);
            let elapsed = at.elapsed();
            if elapsed < min_delay {
                tokio::time::sleep(min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// One API round trip for up to `BATCH_SIZE` texts, with backoff on
    /// rate limits and transport errors.
    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let request = EmbedRequest {
            model: EMBED_MODEL,
            input: texts,
            dimensions: self.dimension,
        };

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            self.throttle().await;

            let response = match self
                .client
                .post(OPENAI_EMBED_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(format!("request failed: {}", e));
                    backoff(attempt).await;
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| RagError::EmbeddingFailed(format!("failed to read response: {}", e)))?;

            if status.is_success() {
                return parse_embeddings(&body, texts.len(), self.dimension);
            }

            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!(
                    "Embedding API returned {}, retrying (attempt {}/{})",
                    status,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(format!("API returned {}", status));
                backoff(attempt).await;
                continue;
            }

            return Err(RagError::EmbeddingFailed(format!(
                "API returned {}: {}",
                status,
                truncate(&body, 300)
            )));
        }

        Err(RagError::EmbeddingFailed(last_error.unwrap_or_else(|| {
            format!("embedding failed after {} retries", MAX_RETRIES)
        })))
    }
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))).await;
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self.request_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingFailed("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut results = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{}",
                i + 1,
                texts.len().div_ceil(BATCH_SIZE)
            );
            results.extend(self.request_batch(batch).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        EMBED_MODEL
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Parse and validate a success response: one vector per input, each of
/// the declared dimensionality, in input order.
fn parse_embeddings(body: &str, expected: usize, dims: usize) -> Result<Vec<Vec<f32>>, RagError> {
    let response: EmbedResponse = serde_json::from_str(body)
        .map_err(|e| RagError::EmbeddingFailed(format!("failed to parse response: {}", e)))?;

    if response.data.len() != expected {
        return Err(RagError::EmbeddingFailed(format!(
            "expected {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }

    let mut vectors = vec![Vec::new(); expected];
    for datum in response.data {
        if datum.embedding.len() != dims {
            return Err(RagError::EmbeddingFailed(format!(
                "provider returned a {}-dim vector, expected {}",
                datum.embedding.len(),
                dims
            )));
        }
        if datum.index >= expected {
            return Err(RagError::EmbeddingFailed(format!(
                "embedding index {} out of range",
                datum.index
            )));
        }
        vectors[datum.index] = datum.embedding;
    }
    Ok(vectors)
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// Tests
// ============================================================================
