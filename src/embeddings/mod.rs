pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbeddingsConfig;
use crate::error::{FindexError, Result};

pub use openai::OpenAiEmbedder;

/// Trait for embedding backends.
///
/// The backend is constructed once at startup (cold-start loads whatever the
/// provider needs) and shared behind an `Arc` between the scheduler and the
/// search engine. `embed_batch` returns vectors in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. "text-embedding-3-small")
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality
    fn dims(&self) -> usize;

    /// Embed a single text (queries)
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts (ingest), preserving input order
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Instantiate the embedder named by the configuration.
pub fn create_embedder(config: &EmbeddingsConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                FindexError::Config(format!(
                    "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                    config.api_key_env
                ))
            })?;
            Ok(Arc::new(OpenAiEmbedder::new(api_key, config)))
        }
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        other => Err(FindexError::Config(format!(
            "Unknown embeddings provider: {}",
            other
        ))),
    }
}

/// No-op backend used when semantic indexing is turned off. Every call fails,
/// which the search layer maps to a 503 and the scheduler treats according to
/// its degraded-mode setting.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(FindexError::EmbedderUnavailable(
            "embedding provider is disabled".to_string(),
        ))
    }

    async fn embed_batch(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Err(FindexError::EmbedderUnavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// Deterministic in-process embedder for tests: tokens are hashed into a
/// fixed number of buckets and the count vector is L2-normalized. Texts that
/// share vocabulary get high cosine similarity, disjoint texts score near 0.
#[cfg(test)]
pub struct StubEmbedder {
    pub dims: usize,
}

#[cfg(test)]
impl StubEmbedder {
    pub fn new() -> Self {
        Self { dims: 32 }
    }

    fn bucket(token: &str, dims: usize) -> usize {
        // FNV-1a keeps the mapping stable across processes
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % dims as u64) as usize
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in crate::text::tokenize(text) {
            v[Self::bucket(&token, self.dims)] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[cfg(test)]
#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}
