use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// A batch of vectors, one per input text, all with the same dimensionality.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub dimensions: usize,
}

/// Pluggable embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    fn model(&self) -> &str;
}

/// OpenAI-compatible `/embeddings` client. Works against OpenAI itself, LM
/// Studio, Ollama's compat endpoint, and anything else speaking the shape.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                dimensions: 0,
            });
        }

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&json!({ "model": self.model, "input": texts }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "embeddings endpoint returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("malformed embeddings response: {}", e)))?;
        if parsed.data.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let dimensions = parsed.data.first().map(|d| d.embedding.len()).unwrap_or(0);
        if parsed.data.iter().any(|d| d.embedding.len() != dimensions) {
            return Err(Error::Embedding(
                "embeddings in one batch have mixed dimensionality".to_string(),
            ));
        }

        Ok(EmbeddingBatch {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
            dimensions,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Deterministic token-hash embedder. Used by tests and as the offline
/// fallback when no embedding endpoint is configured: retrieval quality is
/// crude but sync, backfill, and export paths stay exercised.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for byte in token.to_lowercase().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|t| self.embed_one(t)).collect(),
            dimensions: self.dimensions,
        })
    }

    fn model(&self) -> &str {
        "token-hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let texts = vec!["the reaper prunes dead pids".to_string()];

        let first = embedder.embed(&texts).await.unwrap();
        let second = embedder.embed(&texts).await.unwrap();
        assert_eq!(first.dimensions, 64);
        assert_eq!(first.vectors, second.vectors);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_orders_sensibly() {
        let embedder = HashEmbedder::new(128);
        let texts = vec![
            "sqlite schema with one writer".to_string(),
            "sqlite schema with a single writer".to_string(),
            "completely unrelated cooking recipe".to_string(),
        ];
        let batch = embedder.embed(&texts).await.unwrap();

        let near = crate::encoding::cosine_distance(&batch.vectors[0], &batch.vectors[1]);
        let far = crate::encoding::cosine_distance(&batch.vectors[0], &batch.vectors[2]);
        assert!(near < far);
    }
}
