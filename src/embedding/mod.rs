//! Pluggable embedding providers
//!
//! Four variants: a no-op provider (keyword-only recall), an in-process
//! hashed embedder, and two remote HTTP providers (with and without
//! bearer-token auth). All providers are synchronous; transport failures
//! surface as errors that the façade downgrades to keyword fallback.

mod hashed;

pub use hashed::HashedEmbedder;

use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::error::{MemoryMeshError, Result};

/// Request timeout for a single embedding call
const SINGLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Request timeout for a batch embedding call
const BATCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, preserving input order
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Embedding dimensionality, if known ahead of time
    fn dimension(&self) -> Option<usize>;

    /// Provider name for logs
    fn name(&self) -> &str;

    /// True when this provider produces no vectors and recall must fall
    /// back to keyword search
    fn is_noop(&self) -> bool {
        false
    }
}

/// A no-operation embedding provider: always returns an empty vector.
#[derive(Debug, Default)]
pub struct NoopEmbedder;

impl Embedder for NoopEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![Vec::new(); texts.len()])
    }

    fn dimension(&self) -> Option<usize> {
        Some(0)
    }

    fn name(&self) -> &str {
        "noop"
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// Remote embedding provider for Ollama-style servers.
///
/// Posts `{"model": ..., "input": ...}` to `<base_url>/api/embed` with no
/// authentication and reads back `{"embeddings": [[f32, ...], ...]}`.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn request(&self, input: serde_json::Value, timeout: Duration) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&json!({ "model": self.model, "input": input }))
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(MemoryMeshError::Embedding(format!(
                "Embedding server error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response.json()?;
        let embeddings = data
            .get("embeddings")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                MemoryMeshError::Embedding(format!("Unexpected embedding response: {}", data))
            })?;
        Ok(embeddings.iter().map(parse_vector).collect())
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(json!(text), SINGLE_TIMEOUT)?;
        vectors
            .pop()
            .ok_or_else(|| MemoryMeshError::Embedding("Server returned no embedding".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(json!(texts), BATCH_TIMEOUT)
    }

    fn dimension(&self) -> Option<usize> {
        None
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Remote embedding provider for OpenAI-compatible APIs.
///
/// Posts `{"model": ..., "input": ...}` to `<base_url>/embeddings` with a
/// bearer token and reads back `{"data": [{"index": n, "embedding":
/// [...]}, ...]}`, re-sorted by index to preserve input order.
pub struct BearerHttpEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: Option<usize>,
}

impl BearerHttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimension: None,
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    fn request(&self, input: serde_json::Value, timeout: Duration) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": input }))
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(MemoryMeshError::Embedding(format!(
                "Embedding API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response.json()?;
        let mut items: Vec<(i64, Vec<f32>)> = data
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                MemoryMeshError::Embedding(format!("Unexpected embedding response: {}", data))
            })?
            .iter()
            .map(|item| {
                let index = item.get("index").and_then(|v| v.as_i64()).unwrap_or(0);
                let vector = item.get("embedding").map(parse_vector).unwrap_or_default();
                (index, vector)
            })
            .collect();
        items.sort_by_key(|(index, _)| *index);
        Ok(items.into_iter().map(|(_, vector)| vector).collect())
    }
}

impl Embedder for BearerHttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(json!(text), SINGLE_TIMEOUT)?;
        vectors
            .pop()
            .ok_or_else(|| MemoryMeshError::Embedding("API returned no embedding".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(json!(texts), BATCH_TIMEOUT)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn name(&self) -> &str {
        "http-bearer"
    }
}

fn parse_vector(value: &serde_json::Value) -> Vec<f32> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        })
        .unwrap_or_default()
}

/// Selects which embedding provider the mesh uses.
pub enum EmbeddingSelector {
    /// No embeddings; keyword search only
    Noop,
    /// In-process hashed embedder (no network, no model download)
    Local,
    /// Ollama-style HTTP server without authentication
    Http { base_url: String, model: String },
    /// OpenAI-compatible HTTP API with bearer-token authentication
    HttpBearer {
        base_url: String,
        api_key: String,
        model: String,
    },
    /// An already-constructed provider
    Provider(Box<dyn Embedder>),
}

impl Default for EmbeddingSelector {
    fn default() -> Self {
        EmbeddingSelector::Local
    }
}

impl std::fmt::Debug for EmbeddingSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingSelector::Noop => f.write_str("Noop"),
            EmbeddingSelector::Local => f.write_str("Local"),
            EmbeddingSelector::Http { base_url, model } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("model", model)
                .finish(),
            EmbeddingSelector::HttpBearer {
                base_url, model, ..
            } => f
                .debug_struct("HttpBearer")
                .field("base_url", base_url)
                .field("model", model)
                .finish(),
            EmbeddingSelector::Provider(p) => write!(f, "Provider({})", p.name()),
        }
    }
}

/// Build an embedder from a selector.
pub fn create_embedder(selector: EmbeddingSelector) -> Box<dyn Embedder> {
    let embedder: Box<dyn Embedder> = match selector {
        EmbeddingSelector::Noop => Box::new(NoopEmbedder),
        EmbeddingSelector::Local => Box::new(HashedEmbedder::default()),
        EmbeddingSelector::Http { base_url, model } => Box::new(HttpEmbedder::new(base_url, model)),
        EmbeddingSelector::HttpBearer {
            base_url,
            api_key,
            model,
        } => Box::new(BearerHttpEmbedder::new(base_url, api_key, model)),
        EmbeddingSelector::Provider(provider) => provider,
    };
    debug!(provider = embedder.name(), "Created embedding provider");
    embedder
}

/// Cosine similarity between two vectors, computed in pure code.
///
/// Returns 0.0 when the vectors differ in length, are empty, or either
/// has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut mag_a = 0.0_f32;
    let mut mag_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a.sqrt() * mag_b.sqrt())
}
