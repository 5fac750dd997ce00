//! Embedding service abstraction
//!
//! Provides a unified interface over embedding providers:
//! - OpenAI-compatible HTTP endpoints
//! - A deterministic mock for tests
//!
//! The dimension is fixed per embedder identity; a mismatch with the
//! vector namespace is a fatal startup error, and a mismatched vector at
//! write time is a permanent job failure.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Scale a vector to unit norm. Zero vectors pass through unchanged.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

/// OpenAI-compatible embedding client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    batch_size: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key required for the openai provider".into(),
            })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AppError::HttpClient)?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            batch_size: config.batch_size,
            timeout,
        })
    }

    /// One request with transient/permanent-aware retry. 4xx responses
    /// never retry; network failures and 5xx back off exponentially
    /// within the request timeout budget.
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.timeout * 3),
            ..Default::default()
        };

        retry(policy, || async {
            self.make_request(texts).await.map_err(|e| {
                if e.class() == crate::errors::ErrorClass::Transient {
                    tracing::warn!(error = %e, "Embedding request failed, retrying");
                    BackoffError::transient(e)
                } else {
                    BackoffError::permanent(e)
                }
            })
        })
        .await
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::EmbeddingTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::EmbeddingError {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                // Oversize input, bad model name: the broker routes these
                // to the dead-letter bucket.
                return Err(AppError::InvalidFormat {
                    message: format!("Embedding API rejected request ({}): {}", status, body),
                });
            }
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: EmbeddingResponse =
            response.json().await.map_err(|e| AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            })?;

        let mut embeddings = Vec::with_capacity(result.data.len());
        for data in result.data {
            if data.embedding.len() != self.dimension {
                return Err(AppError::DimensionMismatch {
                    expected: self.dimension,
                    actual: data.embedding.len(),
                });
            }
            embeddings.push(normalize(data.embedding));
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size.max(1)) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder for tests: the vector is a pure, unit-norm
/// function of the input text, so replays and purity properties hold.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_seed(text: &str) -> u64 {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in text.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut state = Self::hash_seed(text);
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push((state % 2000) as f32 / 1000.0 - 1.0);
        }
        Ok(normalize(vector))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_dimension() {
        let embedder = MockEmbedder::new(768);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 768);
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("the red fox").await.unwrap();
        let b = embedder.embed("the red fox").await.unwrap();
        assert_eq!(a, b);

        let c = embedder.embed("the blue fox").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_mock_embedder_unit_norm() {
        let embedder = MockEmbedder::new(128);
        let v = embedder.embed("norm me").await.unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_batch() {
        let embedder = MockEmbedder::new(32);
        let texts = vec!["text1".to_string(), "text2".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 32);
        assert_ne!(embeddings[0], embeddings[1]);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let v = normalize(vec![0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
