use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingsConfig;
use crate::error::{FindexError, Result};
use super::Embedder;

/// Request structure for the embeddings API
#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

/// Response structure from the embeddings API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embeddings client
///
/// Handles batch embedding generation with retry logic, a per-batch timeout,
/// and an LRU cache for repeated query embeddings. The HTTP client is built
/// once at construction; later calls reuse it.
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

const MAX_QUERY_RETRIES: usize = 3;
/// OpenAI caps embedding requests at 2048 inputs
const MAX_BATCH: usize = 2048;

impl OpenAiEmbedder {
    pub fn new(api_key: String, config: &EmbeddingsConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        let cache_capacity =
            NonZeroUsize::new(config.cache_capacity.max(1)).expect("capacity is at least 1");

        Self {
            client,
            api_key,
            model: config.model.clone(),
            dims: config.dimensions,
            batch_size: config.batch_size.clamp(1, MAX_BATCH),
            query_cache: Mutex::new(LruCache::new(cache_capacity)),
        }
    }

    /// One API request for up to `batch_size` texts.
    async fn embed_request(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| FindexError::EmbedderUnavailable(format!("network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error response".to_string());
            return Err(FindexError::EmbedderUnavailable(format!(
                "embeddings API error {}: {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| FindexError::EmbedderUnavailable(format!("failed to parse response: {}", e)))?;

        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Retryable: 429 and 5xx. Client errors fail immediately.
    fn should_retry(err: &FindexError) -> bool {
        let msg = err.to_string();
        msg.contains("429")
            || msg.contains("500")
            || msg.contains("502")
            || msg.contains("503")
            || msg.contains("504")
            || msg.contains("network error")
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.query_cache.lock().unwrap().get(text).cloned() {
            log::debug!("embedding cache hit");
            return Ok(cached);
        }

        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.embed_request(vec![text.to_string()]).await {
                Ok(mut embeddings) => {
                    let embedding = embeddings.pop().ok_or_else(|| {
                        FindexError::EmbedderUnavailable("empty embedding response".to_string())
                    })?;
                    self.query_cache
                        .lock()
                        .unwrap()
                        .put(text.to_string(), embedding.clone());
                    return Ok(embedding);
                }
                Err(e) if attempt < MAX_QUERY_RETRIES && Self::should_retry(&e) => {
                    log::warn!("embedding retry {}/{} after error: {}", attempt + 1, MAX_QUERY_RETRIES, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.embed_request(batch.to_vec()).await?;
            if embeddings.len() != batch.len() {
                return Err(FindexError::EmbedderUnavailable(format!(
                    "embedding count mismatch: sent {}, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }
            all_embeddings.extend(embeddings);

            // Small delay between full batches to stay under rate limits
            if batch.len() == self.batch_size {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        Ok(all_embeddings)
    }
}
