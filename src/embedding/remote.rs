//! HTTP client adapter for remote embedding services.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{EmbeddingClient, EmbeddingClientError};

/// Embedding client backed by a remote HTTP service exposing an `/api/embed` endpoint.
///
/// The request body is `{"model": ..., "input": [...]}` and the expected response is
/// `{"embeddings": [[f32, ...], ...]}`, one vector per input in order.
pub struct RemoteEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl RemoteEmbeddingClient {
    /// Construct a client for the given service base URL and model identifier.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, EmbeddingClientError> {
        if dimension == 0 {
            return Err(EmbeddingClientError::Configuration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        let client = Client::builder()
            .user_agent("vecwarden/0.2")
            .build()
            .map_err(|err| EmbeddingClientError::Configuration(err.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        tracing::debug!(url = %base_url, model = %model, dimension, "Initialized remote embedding client");

        Ok(Self {
            client,
            base_url,
            model,
            dimension,
        })
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingClient for RemoteEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: &texts,
            })
            .send()
            .await
            .map_err(|err| EmbeddingClientError::GenerationFailed(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "embedding service returned {status}: {body}"
            )));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingClientError::GenerationFailed(err.to_string()))?;

        if payload.embeddings.len() != texts.len() {
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                payload.embeddings.len()
            )));
        }
        for vector in &payload.embeddings {
            if vector.len() != self.dimension {
                return Err(EmbeddingClientError::GenerationFailed(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    vector.len()
                )));
            }
        }

        Ok(payload.embeddings)
    }
}
