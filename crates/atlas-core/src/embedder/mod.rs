//! Embedding facade.
//!
//! Produces fixed-dimension dense vectors for text or chunks in bounded
//! batches. Lookups go through the process-local cache first; misses hit
//! the configured backend with retry and exponential backoff. A persistent
//! backend failure yields an empty vector, which downstream code treats as
//! a non-match.
//!
//! Every returned vector has the configured dimension or length zero,
//! never a partial length.

pub mod cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{AtlasError, AtlasResult};
use crate::types::CodeChunk;

pub use cache::{EmbedPurpose, EmbeddingCache};

/// A dense-vector embedding backend.
///
/// Implementations are chosen at composition time. Errors are treated as
/// transient by the facade and retried with backoff.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts. Must return one vector per input, each of
    /// the backend's configured dimension.
    async fn embed(&self, texts: &[String]) -> AtlasResult<Vec<Vec<f32>>>;

    /// Model identifier, for diagnostics.
    fn model(&self) -> &str;
}

/// HTTP backend speaking the Ollama-style `/api/embed` contract.
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl HttpEmbeddingBackend {
    /// Create a backend for the configured host and model.
    pub fn new(config: &EmbeddingConfig) -> AtlasResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AtlasError::EmbedderUnavailable { reason: e.to_string() })?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed(&self, texts: &[String]) -> AtlasResult<Vec<Vec<f32>>> {
        #[derive(serde::Deserialize)]
        struct EmbedResponse {
            embeddings: Vec<Vec<f32>>,
        }

        let url = format!("{}/api/embed", self.host);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AtlasError::Embed { message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(AtlasError::Embed {
                message: format!("{} returned {}", url, response.status()),
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AtlasError::Embed { message: e.to_string() })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(AtlasError::Embed {
                message: format!(
                    "backend returned {} vectors for {} inputs",
                    parsed.embeddings.len(),
                    texts.len()
                ),
            });
        }
        Ok(parsed.embeddings)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Deterministic backend for tests: vectors are derived from an xxh3 hash
/// of the text, then L2-normalized. No network, no model.
pub struct HashEmbeddingBackend {
    dimension: usize,
}

impl HashEmbeddingBackend {
    /// Create a backend producing vectors of `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut seed = xxhash_rust::xxh3::xxh3_64(text.as_bytes());
        for _ in 0..self.dimension {
            // splitmix64 step
            seed = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = seed;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^= z >> 31;
            #[expect(clippy::cast_precision_loss)]
            let unit = (z as f64 / u64::MAX as f64) * 2.0 - 1.0;
            #[expect(clippy::cast_possible_truncation)]
            vector.push(unit as f32);
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbeddingBackend {
    async fn embed(&self, texts: &[String]) -> AtlasResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model(&self) -> &str {
        "hash-test"
    }
}

/// Caching, batching, retrying facade over an [`EmbeddingBackend`].
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    cache: EmbeddingCache,
    dimension: usize,
    batch_size: usize,
    max_retries: u32,
    retry_base_ms: u64,
}

impl Embedder {
    /// Create a facade over `backend` with the given configuration.
    pub fn new(backend: Arc<dyn EmbeddingBackend>, config: &EmbeddingConfig) -> Self {
        Self {
            backend,
            cache: EmbeddingCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_capacity,
            ),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
        }
    }

    /// Build a facade over the HTTP backend from configuration.
    pub fn from_config(config: &EmbeddingConfig) -> AtlasResult<Self> {
        let backend = Arc::new(HttpEmbeddingBackend::new(config)?);
        Ok(Self::new(backend, config))
    }

    /// Configured embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one span of text. Cache-first; empty vector on persistent
    /// failure.
    pub async fn embed_text(&self, text: &str, purpose: EmbedPurpose) -> Vec<f32> {
        if let Some(hit) = self.cache.get(purpose, text) {
            return hit;
        }
        let mut results = self.embed_uncached(std::slice::from_ref(&text.to_string())).await;
        let vector = results.pop().unwrap_or_default();
        if !vector.is_empty() {
            self.cache.put(purpose, text, vector.clone());
        }
        vector
    }

    /// Embed a batch of texts in bounded sub-batches. Output order matches
    /// input order; failed items come back as empty vectors.
    pub async fn embed_batch(&self, texts: &[String], purpose: EmbedPurpose) -> Vec<Vec<f32>> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(purpose, text) {
                Some(hit) => out[i] = Some(hit),
                None => misses.push(i),
            }
        }

        for batch in misses.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.embed_uncached(&batch_texts).await;
            for (&i, vector) in batch.iter().zip(vectors) {
                if !vector.is_empty() {
                    self.cache.put(purpose, &texts[i], vector.clone());
                }
                out[i] = Some(vector);
            }
        }

        out.into_iter().map(Option::unwrap_or_default).collect()
    }

    /// Text embedded for a chunk: the body prefixed with a small
    /// structured header derived from its metadata and the file summary.
    pub fn chunk_embedding_text(chunk: &CodeChunk, file_summary: &str) -> String {
        let mut header = format!(
            "// {} {} L{}-L{}",
            chunk.language, chunk.file_path, chunk.start_line, chunk.end_line
        );
        if let Some(name) = chunk
            .metadata
            .get("function_name")
            .or_else(|| chunk.metadata.get("class_name"))
            .and_then(|v| v.as_str())
        {
            header.push_str(&format!(" {name}"));
        }
        if file_summary.is_empty() {
            format!("{header}\n{}", chunk.content)
        } else {
            format!("{header}\n// {file_summary}\n{}", chunk.content)
        }
    }

    /// Call the backend with retry and exponential backoff. Returns empty
    /// vectors for every input on persistent failure, and validates the
    /// dimension of everything the backend hands back.
    async fn embed_uncached(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let mut attempt = 0u32;
        loop {
            match self.backend.embed(texts).await {
                Ok(vectors) => {
                    return vectors
                        .into_iter()
                        .map(|v| {
                            if v.len() == self.dimension {
                                v
                            } else {
                                tracing::warn!(
                                    got = v.len(),
                                    want = self.dimension,
                                    "backend returned wrong dimension, dropping vector"
                                );
                                Vec::new()
                            }
                        })
                        .collect();
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = self.retry_base_ms.saturating_mul(1 << attempt.min(8));
                    tracing::debug!(
                        error = %e,
                        attempt,
                        delay_ms = delay,
                        "embedding call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        inputs = texts.len(),
                        "embedding failed after retries, returning empty vectors"
                    );
                    return vec![Vec::new(); texts.len()];
                }
            }
        }
    }
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two vectors. Empty or mismatched vectors score 0,
/// so failed embeddings never match anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
