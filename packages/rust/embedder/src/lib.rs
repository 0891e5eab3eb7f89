//! Embedding providers for DocRAG.
//!
//! The [`Embedder`] trait is the seam between the indexing pipeline and
//! whatever produces vectors. Two implementations ship:
//!
//! - [`HttpEmbedder`] talks to an OpenAI-compatible `/embeddings` endpoint
//!   with batching and bounded retry.
//! - [`HashEmbedder`] is a deterministic offline fallback that hashes tokens
//!   into a fixed-dimension vector. No network, no key, stable across runs,
//!   which makes it the default for tests and air-gapped use.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use docrag_shared::{DocRagError, EmbeddingConfig, Result, RetryPolicy};

/// Produces one vector per input text. Implementations must be deterministic
/// for identical inputs within a process lifetime.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimension of every vector this embedder produces.
    fn dimension(&self) -> usize;
}

/// Build the configured embedding provider.
pub fn build_embedder(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpEmbedder::from_config(config, retry)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        other => Err(DocRagError::config(format!(
            "unknown embedding provider '{other}' (expected \"http\" or \"hash\")"
        ))),
    }
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible embeddings API.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl HttpEmbedder {
    /// Build a client from config; the API key is read from the env var the
    /// config names (keys never live in the config file).
    pub fn from_config(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        Ok(Self::new(
            &config.endpoint,
            &config.model,
            api_key,
            config.dimension,
            config.batch_size,
            retry,
        ))
    }

    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        dimension: usize,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            dimension,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// One POST to `/embeddings` for a single batch.
    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.endpoint);
        let body = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DocRagError::embedding_transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            // 429 and 5xx are worth retrying; other 4xx means the request
            // itself is wrong and will never succeed.
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(DocRagError::embedding_transient(format!(
                    "{status}: {message}"
                )))
            } else {
                Err(DocRagError::embedding_exhausted(format!(
                    "{status}: {message}"
                )))
            };
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| DocRagError::embedding_transient(format!("malformed response: {e}")))?;

        if parsed.data.len() != batch.len() {
            return Err(DocRagError::embedding_exhausted(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        for item in &data {
            if item.embedding.len() != self.dimension {
                return Err(DocRagError::embedding_exhausted(format!(
                    "model returned dimension {}, configured {}",
                    item.embedding.len(),
                    self.dimension
                )));
            }
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let result = self.retry.run(|| self.embed_batch(batch)).await?;
            debug!(batch_len = batch.len(), "embedding batch completed");
            vectors.extend(result);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// Offline hash provider
// ---------------------------------------------------------------------------

/// Deterministic token-hashing embedder.
///
/// Each lowercased alphanumeric token is hashed with SHA-256; the hash picks
/// a bucket and a sign, and the resulting vector is L2-normalized. Similar
/// texts share tokens and therefore buckets, so cosine similarity remains a
/// meaningful (if crude) relatedness signal.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let hash = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed(&texts(&["install the package"])).await.unwrap();
        let b = embedder.embed(&texts(&["install the package"])).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn hash_embedder_normalizes() {
        let embedder = HashEmbedder::new(32);
        let vectors = embedder.embed(&texts(&["alpha beta gamma"])).await.unwrap();
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hash_embedder_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(16);
        let vectors = embedder.embed(&texts(&["   "])).await.unwrap();
        assert!(vectors[0].iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn http_embedder_parses_response_in_index_order() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(json!({ "model": "test-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] },
                ]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            &server.uri(),
            "test-model",
            Some("test-key".into()),
            2,
            32,
            RetryPolicy::new(1, 0),
        );

        let vectors = embedder.embed(&texts(&["first", "second"])).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn http_embedder_retries_server_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [0.5, 0.5] }]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            &server.uri(),
            "test-model",
            None,
            2,
            32,
            RetryPolicy::new(3, 0),
        );

        let vectors = embedder.embed(&texts(&["only"])).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5]]);
    }

    #[tokio::test]
    async fn http_embedder_does_not_retry_client_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            &server.uri(),
            "test-model",
            None,
            2,
            32,
            RetryPolicy::new(5, 0),
        );

        let err = embedder.embed(&texts(&["only"])).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn http_embedder_rejects_wrong_dimension() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "index": 0, "embedding": [1.0, 2.0, 3.0] }]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            &server.uri(),
            "test-model",
            None,
            2,
            32,
            RetryPolicy::new(1, 0),
        );

        assert!(embedder.embed(&texts(&["only"])).await.is_err());
    }

    #[test]
    fn build_embedder_rejects_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "quantum".into(),
            ..EmbeddingConfig::default()
        };
        assert!(build_embedder(&config, RetryPolicy::default()).is_err());
    }
}
