//! Embedding provider abstraction and adapters.
//!
//! A provider couples a fixed output dimension with an [`EmbeddingClient`] implementation. The
//! manager resolves a provider per index (inline override, registry reference, or manager
//! default) and always computes embeddings on its own side of the sandbox boundary; sandboxes
//! only ever see finished vectors.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod registry;
pub mod remote;

pub use registry::{ProviderRegistry, RegistryError, RegistryStats};
pub use remote::RemoteEmbeddingClient;

/// Output dimension of the deterministic mock embedding.
pub const MOCK_DIMENSION: usize = 384;

/// Sentinel embedding-model name that selects the deterministic mock client.
pub const MOCK_MODEL_NAME: &str = "mock-model";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider was constructed or invoked with unusable settings.
    #[error("Embedding configuration error: {0}")]
    Configuration(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient {
    /// Produce an embedding vector for each supplied chunk of text.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Kind tag carried by every provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Locally supplied embedding function.
    Generic,
    /// HTTP-backed embedding service.
    Remote,
}

/// A named embedding function with a fixed output dimension.
#[derive(Clone)]
pub struct EmbeddingProvider {
    /// Human-readable provider name (model identifier for remote providers).
    pub name: String,
    /// Kind tag distinguishing local from remote providers.
    pub kind: ProviderKind,
    /// Dimensionality of every vector this provider produces.
    pub dimension: usize,
    client: Arc<dyn EmbeddingClient + Send + Sync>,
}

impl fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl EmbeddingProvider {
    /// Wrap an arbitrary client as a generic provider.
    pub fn generic(
        name: impl Into<String>,
        dimension: usize,
        client: Arc<dyn EmbeddingClient + Send + Sync>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Generic,
            dimension,
            client,
        }
    }

    /// Wrap a plain synchronous function as a generic provider.
    pub fn from_fn<F>(name: impl Into<String>, dimension: usize, embed: F) -> Self
    where
        F: Fn(&str) -> Vec<f32> + Send + Sync + 'static,
    {
        Self::generic(name, dimension, Arc::new(FnEmbeddingClient::new(embed)))
    }

    /// Wrap a remote HTTP client.
    pub fn remote(name: impl Into<String>, dimension: usize, client: RemoteEmbeddingClient) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Remote,
            dimension,
            client: Arc::new(client),
        }
    }

    /// The deterministic mock provider used by tests and the `mock-model` sentinel.
    pub fn mock() -> Self {
        Self::generic(
            MOCK_MODEL_NAME,
            MOCK_DIMENSION,
            Arc::new(MockEmbeddingClient),
        )
    }

    /// Produce an embedding vector for each supplied text.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        self.client.generate_embeddings(texts).await
    }
}

/// Adapter turning a synchronous embedding function into an [`EmbeddingClient`].
pub struct FnEmbeddingClient {
    embed: Box<dyn Fn(&str) -> Vec<f32> + Send + Sync>,
}

impl FnEmbeddingClient {
    /// Wrap a plain function.
    pub fn new<F>(embed: F) -> Self
    where
        F: Fn(&str) -> Vec<f32> + Send + Sync + 'static,
    {
        Self {
            embed: Box::new(embed),
        }
    }
}

#[async_trait]
impl EmbeddingClient for FnEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }
        Ok(texts.iter().map(|text| (self.embed)(text)).collect())
    }
}

/// Deterministic embedding client producing stable 384-dimensional vectors.
pub struct MockEmbeddingClient;

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }
        Ok(texts.iter().map(|text| mock_embedding(text)).collect())
    }
}

/// Pure, deterministic text-to-vector function behind the `mock-model` sentinel.
///
/// A rolling hash of the text seeds both the slot scatter and a low-amplitude sinusoidal
/// perturbation, so distinct inputs produce distinct vectors and the output is stable across
/// process restarts. The result is L2-normalized.
pub fn mock_embedding(text: &str) -> Vec<f32> {
    let mut seed: u32 = 0;
    for byte in text.bytes() {
        seed = seed.wrapping_mul(31).wrapping_add(u32::from(byte));
    }

    let mut embedding = vec![0.0_f32; MOCK_DIMENSION];
    for (word_idx, word) in text.split_whitespace().enumerate() {
        for (char_idx, ch) in word.chars().enumerate() {
            let slot = (ch as u32)
                .wrapping_add((word_idx as u32).wrapping_mul(37))
                .wrapping_add((char_idx as u32).wrapping_mul(13))
                .wrapping_add(seed) as usize
                % MOCK_DIMENSION;
            embedding[slot] += 1.0;
        }
    }

    let phase = (seed % 1_000) as f32 / 1_000.0;
    for (slot, value) in embedding.iter_mut().enumerate() {
        *value += 0.05 * (phase + slot as f32 * 0.1).sin();
    }

    let norm = embedding
        .iter()
        .map(|value| value * value)
        .sum::<f32>()
        .sqrt();
    if norm > 0.0 {
        for value in &mut embedding {
            *value /= norm;
        }
    }

    embedding
}
