//! Embedding backends.
//!
//! [`OpenAiEmbedder`] calls an OpenAI-compatible embeddings API (custom
//! base URL allowed, so DeepSeek-style relays work). [`HashEmbedder`] is a
//! deterministic in-process fallback (feature hashing over the shared
//! tokenizer) selected by the `local` provider switch; it needs no network
//! and anchors the retrieval tests.

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;

use crate::retrieval::bm25::tokenize;
use crate::retrieval::RetrievalError;

/// Produces fixed-dimension vectors; the dimension is a deployment
/// constant that must match the stored vector width.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
}

/// OpenAI-compatible embeddings client.
pub struct OpenAiEmbedder {
    config: OpenAIConfig,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        model: impl Into<String>,
        dimension: usize,
        api_key: Option<&str>,
        base_url: Option<&str>,
    ) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }
        if let Some(base) = base_url {
            config = config.with_api_base(base);
        }
        Self {
            config,
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let client = Client::with_config(self.config.clone());
        let request = CreateEmbeddingRequest {
            input: EmbeddingInput::String(text.to_string()),
            model: self.model.clone(),
            ..Default::default()
        };
        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| RetrievalError::Embedding(format!("embeddings API: {e}")))?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RetrievalError::Embedding("no embedding returned".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let client = Client::with_config(self.config.clone());
        let request = CreateEmbeddingRequest {
            input: EmbeddingInput::StringArray(texts.iter().map(|s| s.to_string()).collect()),
            model: self.model.clone(),
            ..Default::default()
        };
        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| RetrievalError::Embedding(format!("embeddings API: {e}")))?;
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic local embedder: FNV-hashed token buckets, L2-normalised.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            let hash = Self::fnv1a(&token);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the local embedder is deterministic, dimensioned, and
    /// unit-length for non-empty input.
    #[tokio::test]
    async fn hash_embedder_deterministic_and_normalised() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("图执行器按节点流式输出").await.unwrap();
        let b = embedder.embed("图执行器按节点流式输出").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let other = embedder.embed("completely different text").await.unwrap();
        assert_ne!(a, other);
    }

    /// **Scenario**: empty input yields the zero vector instead of NaN.
    #[tokio::test]
    async fn hash_embedder_empty_input() {
        let embedder = HashEmbedder::new(8);
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    /// **Scenario**: the default batch implementation preserves order.
    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let embedder = HashEmbedder::new(16);
        let batch = embedder.embed_batch(&["one", "two"]).await.unwrap();
        assert_eq!(batch[0], embedder.embed("one").await.unwrap());
        assert_eq!(batch[1], embedder.embed("two").await.unwrap());
    }
}
