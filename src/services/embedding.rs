//! Embedding backends
//!
//! The clustering machinery only needs `embed(texts) -> vectors`. Two
//! providers cover the deployment spectrum: a deterministic local feature
//! hasher (no model download, stable across runs, used by tests and offline
//! setups) and an OpenAI-compatible HTTP client that works against OpenAI,
//! TEI or any other server exposing `/embeddings`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding API error: {0}")]
    ApiError(String),

    #[error("embedding response parsing error: {0}")]
    ParseError(String),
}

/// Batched text embedding. Implementations must return unit-normalized
/// vectors of a fixed dimension; `id()` namespaces vector-store collections
/// so switching providers never mixes dimensions.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    fn id(&self) -> String;

    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Build the shared embedding handle from configuration. Constructed once in
/// main and passed to every consumer by Arc.
pub fn build_embedding_function(config: &EmbeddingConfig) -> Arc<dyn EmbeddingFunction> {
    match config.provider.to_lowercase().as_str() {
        "openai" | "tei" => Arc::new(OpenAiEmbedder::new(
            &config.api_base,
            &config.api_key,
            &config.model,
            config.dimension,
        )),
        _ => Arc::new(HashingEmbedder::new(config.dimension)),
    }
}

// ============================================================================
// Feature-hashing embedder (local, deterministic)
// ============================================================================

/// Signed feature hashing over word unigrams and bigrams. Not semantically
/// deep, but templated log lines are lexically low-cardinality by
/// construction, so hashed lexical overlap separates them well enough for
/// online prototype assignment.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '<' && c != '>')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }

    fn accumulate(&self, buckets: &mut [f32], feature: &str) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let index = (h % self.dimension as u64) as usize;
        let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
        buckets[index] += sign;
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0.0f32; self.dimension];
        let tokens = Self::tokens(text);
        for token in &tokens {
            self.accumulate(&mut buckets, token);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut buckets, &format!("{} {}", pair[0], pair[1]));
        }
        normalize(&mut buckets);
        buckets
    }
}

#[async_trait]
impl EmbeddingFunction for HashingEmbedder {
    fn id(&self) -> String {
        format!("feature-hash::{}", self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============================================================================
// OpenAI-compatible embedding client
// ============================================================================

pub struct OpenAiEmbedder {
    http_client: Client,
    api_base: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_base: &str, api_key: &str, model: &str, dimension: usize) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimension,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingFunction for OpenAiEmbedder {
    fn id(&self) -> String {
        format!("openai::{}", self.model)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.api_base);
        let request = EmbeddingsRequest { model: &self.model, input: texts };

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::ApiError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::ApiError(format!("API error {}: {}", status, body)));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ParseError(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::ParseError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut vectors = Vec::with_capacity(parsed.data.len());
        for row in parsed.data {
            let mut vector = row.embedding;
            normalize(&mut vector);
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec!["kernel: nic eth0 link down".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn hashing_embedder_unit_norm() {
        let embedder = HashingEmbedder::new(128);
        let texts = vec!["sshd[123]: authentication failure".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_lines_are_closer_than_dissimilar() {
        let embedder = HashingEmbedder::new(256);
        let texts = vec![
            "sshd: authentication failure for user root".to_string(),
            "sshd: authentication failure for user admin".to_string(),
            "kernel: i/o error on device sda".to_string(),
        ];
        let vectors = embedder.embed(&texts).await.unwrap();
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&vectors[0], &vectors[1]) > dot(&vectors[0], &vectors[2]));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new(32);
        let vector = embedder.embed_one("");
        assert!(vector.iter().all(|v| *v == 0.0));
    }
}
