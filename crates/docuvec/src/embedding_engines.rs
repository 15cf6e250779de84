//! [`EmbeddingEngine`] implementations.
//!
//! - [`HashEmbeddingEngine`] — deterministic, model-free stand-in used for
//!   local development and tests: tokens are hashed into unit vectors, so
//!   the same input always yields the same multi-vector sequence.
//! - [`HttpEmbeddingEngine`] — calls a remote embedding service over HTTP,
//!   with the batching/retry/backoff shape the teacher's `OpenAIProvider`
//!   used for its embeddings calls, generalized to an arbitrary endpoint
//!   returning per-token sequences instead of single vectors.

use std::time::Duration;

use async_trait::async_trait;
use docuvec_core::embedding::{BatchEmbedding, Embedding, EmbeddingEngine, EmbeddingError, MultiVector};
use sha2::{Digest, Sha256};

const MAX_TOKENS_PER_ITEM: usize = 32;
const IMAGE_CHUNK_BYTES: usize = 4096;

/// Deterministic, model-free [`EmbeddingEngine`]. Not a semantic embedding
/// model — two unrelated texts that happen to share tokens will score as
/// similar. Useful for exercising the ingestion and search pipeline without
/// a model dependency.
pub struct HashEmbeddingEngine {
    dims: usize,
}

impl HashEmbeddingEngine {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn hash_token(&self, salt: &str, token: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dims);
        let mut counter: u32 = 0;
        while out.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(salt.as_bytes());
            hasher.update(token);
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks_exact(4) {
                if out.len() == self.dims {
                    break;
                }
                let bits = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // map to [-1.0, 1.0]
                out.push((bits as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32);
            }
            counter += 1;
        }
        out
    }

    fn embed_text_item(&self, text: &str) -> Option<MultiVector> {
        let tokens: Vec<&str> = text.split_whitespace().take(MAX_TOKENS_PER_ITEM).collect();
        let rows: Vec<Vec<f32>> = if tokens.is_empty() {
            vec![self.hash_token("text", text.as_bytes())]
        } else {
            tokens
                .iter()
                .map(|t| self.hash_token("text", t.as_bytes()))
                .collect()
        };
        MultiVector::from_rows(rows)
    }

    fn embed_image_item(&self, bytes: &[u8]) -> Option<MultiVector> {
        let rows: Vec<Vec<f32>> = if bytes.is_empty() {
            vec![self.hash_token("image", b"")]
        } else {
            bytes
                .chunks(IMAGE_CHUNK_BYTES)
                .take(MAX_TOKENS_PER_ITEM)
                .map(|chunk| self.hash_token("image", chunk))
                .collect()
        };
        MultiVector::from_rows(rows)
    }
}

#[async_trait]
impl EmbeddingEngine for HashEmbeddingEngine {
    async fn embed_images(&self, images: &[Vec<u8>]) -> Result<BatchEmbedding, EmbeddingError> {
        let items = images
            .iter()
            .map(|img| {
                self.embed_image_item(img)
                    .map(|multi_vector| Embedding { multi_vector })
            })
            .collect();
        Ok(BatchEmbedding { items })
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<BatchEmbedding, EmbeddingError> {
        let items = texts
            .iter()
            .map(|t| {
                self.embed_text_item(t)
                    .map(|multi_vector| Embedding { multi_vector })
            })
            .collect();
        Ok(BatchEmbedding { items })
    }

    async fn embed_query(&self, query: &str) -> Result<Embedding, EmbeddingError> {
        let multi_vector = self
            .embed_text_item(query)
            .ok_or_else(|| EmbeddingError::InputTooLarge("query produced no tokens".into()))?;
        Ok(Embedding { multi_vector })
    }
}

/// Remote [`EmbeddingEngine`] calling a JSON HTTP endpoint. Each item is
/// expected to come back as a `tokens x dims` nested array; this engine
/// only validates and reshapes the response, it does not interpret it.
pub struct HttpEmbeddingEngine {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

#[derive(serde::Serialize)]
struct TextsRequest<'a> {
    texts: &'a [String],
}

#[derive(serde::Serialize)]
struct ImagesRequest {
    images_base64: Vec<String>,
}

#[derive(serde::Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
}

#[derive(serde::Deserialize)]
struct BatchResponse {
    embeddings: Vec<Option<Vec<Vec<f32>>>>,
}

#[derive(serde::Deserialize)]
struct QueryResponse {
    embedding: Vec<Vec<f32>>,
}

impl HttpEmbeddingEngine {
    pub fn new(base_url: impl Into<String>) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbeddingError::ModelUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            max_retries: 5,
        })
    }

    /// POST `body` to `{base_url}{path}`, retrying transient failures with
    /// the same backoff schedule the teacher used for OpenAI calls: 1s,
    /// 2s, 4s, 8s, 16s (capped), retrying on HTTP 429/5xx and network
    /// errors, failing immediately on other 4xx.
    async fn post_with_retry<B: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, EmbeddingError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(4));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(body).send().await;
            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<R>()
                            .await
                            .map_err(|e| EmbeddingError::BatchFailure(e.to_string()));
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("embedding endpoint returned {status}"));
                        continue;
                    }
                    return Err(EmbeddingError::ModelUnavailable(format!(
                        "embedding endpoint returned {status}"
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(EmbeddingError::ModelUnavailable(
            last_err.unwrap_or_else(|| "embedding request failed after retries".into()),
        ))
    }
}

#[async_trait]
impl EmbeddingEngine for HttpEmbeddingEngine {
    async fn embed_images(&self, images: &[Vec<u8>]) -> Result<BatchEmbedding, EmbeddingError> {
        use base64::Engine;
        let images_base64 = images
            .iter()
            .map(|b| base64::engine::general_purpose::STANDARD.encode(b))
            .collect();
        let request = ImagesRequest { images_base64 };
        let response: BatchResponse = self.post_with_retry("/embed_images", &request).await?;
        to_batch(response)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<BatchEmbedding, EmbeddingError> {
        let request = TextsRequest { texts };
        let response: BatchResponse = self.post_with_retry("/embed_texts", &request).await?;
        to_batch(response)
    }

    async fn embed_query(&self, query: &str) -> Result<Embedding, EmbeddingError> {
        let request = QueryRequest { query };
        let response: QueryResponse = self.post_with_retry("/embed_query", &request).await?;
        let multi_vector = MultiVector::from_rows(response.embedding)
            .ok_or_else(|| EmbeddingError::BatchFailure("empty query embedding".into()))?;
        Ok(Embedding { multi_vector })
    }
}

fn to_batch(response: BatchResponse) -> Result<BatchEmbedding, EmbeddingError> {
    let items = response
        .embeddings
        .into_iter()
        .map(|maybe_rows| {
            maybe_rows
                .and_then(MultiVector::from_rows)
                .map(|multi_vector| Embedding { multi_vector })
        })
        .collect();
    Ok(BatchEmbedding { items })
}
