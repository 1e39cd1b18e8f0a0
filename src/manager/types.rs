//! Request, outcome, and error types for the index manager.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::embedding::{EmbeddingClientError, EmbeddingProvider};
use crate::metrics::MetricsSnapshot;
use crate::offload::OffloadError;
use crate::sandbox::SandboxError;

/// Options accepted by [`crate::manager::VectorIndexManager::create_index`].
///
/// Serialized field names are the wire form stored in offload descriptors; the inline provider
/// never crosses a serialization boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateIndexOptions {
    /// Caller-supplied base identifier; a UUID is generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Namespace prefix; the canonical id becomes `namespace:base`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Inline embedding provider; highest-priority embedding source for this index.
    #[serde(skip)]
    pub embedding_provider: Option<EmbeddingProvider>,
    /// Name of a registry provider bound to this index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider_name: Option<String>,
    /// Per-index eviction deadline in milliseconds; zero disables eviction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout: Option<u64>,
    /// Per-index monitoring kill-switch; defaults to enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_activity_monitoring: Option<bool>,
    /// Hydrate an offloaded index instead of creating a fresh one.
    pub resume: bool,
}

/// A document handed to [`crate::manager::VectorIndexManager::add_documents`].
///
/// Either `vector` or `text` must be present; text-only documents are embedded by the manager
/// before they reach the sandbox.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DocumentInput {
    /// Document identifier; a UUID is generated when absent.
    pub id: Option<String>,
    /// Precomputed embedding vector, passed through unchanged.
    pub vector: Option<Vec<f32>>,
    /// Raw text; embedded via the resolved provider when no vector is given.
    pub text: Option<String>,
    /// Free-form metadata stored alongside the document.
    pub metadata: Option<Value>,
}

/// A query expressed either as raw text or as a finished vector.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueryInput {
    /// Already-computed query vector, used as-is.
    Vector(Vec<f32>),
    /// Natural-language query, embedded via the index's provider resolution.
    Text(String),
}

/// Read-only snapshot of one live index.
#[derive(Debug, Clone, Serialize)]
pub struct LiveIndexInfo {
    /// Canonical identifier.
    pub id: String,
    /// RFC 3339 creation instant.
    pub created: String,
    /// Documents currently held by the sandbox.
    pub document_count: u64,
    /// Embedding dimension established on first ingest, if any.
    pub embedding_dimension: Option<usize>,
    /// Whether this live index was hydrated from disk.
    pub from_offload: bool,
    /// Effective eviction deadline in milliseconds; zero means disabled.
    pub inactivity_timeout: u64,
    /// Whether this index participates in inactivity monitoring.
    pub activity_monitoring: bool,
}

/// Monitoring portion of [`ManagerStats`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStats {
    /// Whether the global monitoring toggle is on.
    pub enabled: bool,
    /// Default eviction deadline in milliseconds.
    pub default_timeout: u64,
    /// Number of armed inactivity timers.
    pub active_timers: usize,
    /// Offload directory path.
    pub offload_directory: String,
}

/// Aggregate statistics reported by the manager.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// Number of live indices.
    pub live_count: usize,
    /// Total documents across live indices.
    pub total_documents: u64,
    /// Configured live-index cap.
    pub max_instances: usize,
    /// Default embedding model name, if configured.
    pub default_embedding_model: Option<String>,
    /// Default registry provider name, if configured.
    pub default_provider_name: Option<String>,
    /// Live-index counts per namespace; un-namespaced ids appear under `default`.
    pub namespaces: BTreeMap<String, usize>,
    /// Monitoring and offload-directory details.
    pub monitoring: MonitoringStats,
    /// Process-lifetime activity counters.
    pub counters: MetricsSnapshot,
}

/// Errors surfaced by manager operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The id names neither a live index nor an offloaded descriptor.
    #[error("index '{0}' not found")]
    NotFound(String),
    /// A live index already exists under the id.
    #[error("index '{0}' already exists")]
    Exists(String),
    /// `resume` was requested but the index is already live.
    #[error("index '{0}' is already running")]
    AlreadyRunning(String),
    /// An offloaded descriptor exists; pass `resume` to hydrate it.
    #[error("index '{0}' exists in offloaded form; set resume=true to hydrate it")]
    ExistsOffloaded(String),
    /// Creating the index would exceed the live-index cap.
    #[error("live index capacity of {0} reached")]
    Capacity(usize),
    /// The namespace is not in the configured allow-list.
    #[error("namespace '{0}' is not allowed")]
    NamespaceForbidden(String),
    /// The referenced registry provider does not exist.
    #[error("embedding provider '{0}' not found")]
    ProviderNotFound(String),
    /// No provider could be resolved for a text embedding.
    #[error("no embedding provider available for index '{0}'")]
    NoEmbeddingProvider(String),
    /// A document carried neither a vector nor text.
    #[error("document '{0}' has neither vector nor text")]
    DocumentWithoutContent(String),
    /// A vector's length disagrees with the index's established dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension established for the index.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },
    /// The resolved provider failed to produce embeddings.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// The sandbox rejected or failed an operation.
    #[error("sandbox failed: {0}")]
    Sandbox(String),
    /// An outer deadline fired before the operation completed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// Reading or writing the cold form failed.
    #[error(transparent)]
    Offload(#[from] OffloadError),
}

impl From<SandboxError> for IndexError {
    fn from(error: SandboxError) -> Self {
        match error {
            SandboxError::DimensionMismatch {
                expected, actual, ..
            } => Self::DimensionMismatch { expected, actual },
            other => Self::Sandbox(other.to_string()),
        }
    }
}

/// Namespace portion of a canonical id, when the id carries a `prefix:`.
pub fn namespace_of(id: &str) -> Option<&str> {
    id.split_once(':').map(|(namespace, _)| namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_is_the_leading_prefix() {
        assert_eq!(namespace_of("ws:a"), Some("ws"));
        assert_eq!(namespace_of("ws:a:b"), Some("ws"));
        assert_eq!(namespace_of("plain"), None);
    }

    #[test]
    fn options_serialize_with_wire_names_and_skip_inline_provider() {
        let options = CreateIndexOptions {
            id: Some("a".into()),
            namespace: Some("ws".into()),
            embedding_provider: Some(EmbeddingProvider::mock()),
            embedding_provider_name: Some("p".into()),
            inactivity_timeout: Some(2000),
            enable_activity_monitoring: Some(true),
            resume: false,
        };

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["embeddingProviderName"], "p");
        assert_eq!(value["inactivityTimeout"], 2000);
        assert!(value.get("embeddingProvider").is_none());
    }

    #[test]
    fn query_input_distinguishes_text_from_vectors() {
        let text: QueryInput = serde_json::from_value(serde_json::json!("hello")).unwrap();
        assert!(matches!(text, QueryInput::Text(_)));

        let vector: QueryInput = serde_json::from_value(serde_json::json!([0.1, 0.2])).unwrap();
        assert!(matches!(vector, QueryInput::Vector(v) if v.len() == 2));
    }

    #[test]
    fn sandbox_dimension_errors_map_to_the_manager_kind() {
        let error: IndexError = SandboxError::DimensionMismatch {
            id: "d".into(),
            expected: 3,
            actual: 2,
        }
        .into();
        assert!(matches!(
            error,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }
}
