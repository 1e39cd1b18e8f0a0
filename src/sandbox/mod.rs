//! Per-index sandbox tasks and their RPC contract.
//!
//! Each live index owns exactly one sandbox: a dedicated Tokio task holding the in-memory
//! document store, driven through a typed request channel. The channel serializes calls, so
//! operations against one sandbox execute one at a time while distinct sandboxes run in
//! parallel. Embeddings never cross this boundary; the manager hands finished vectors in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub mod engine;

use engine::DocumentStore;

/// Errors surfaced by sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// A document id collided within the batch or with stored documents.
    #[error("duplicate document id '{0}'")]
    DuplicateDocument(String),
    /// A vector length disagreed with the sandbox's established dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Offending document id, empty for query vectors.
        id: String,
        /// Dimension established by the first stored vector.
        expected: usize,
        /// Length of the rejected vector.
        actual: usize,
    },
    /// The sandbox task is gone; the index was destroyed or the task panicked.
    #[error("sandbox is not running")]
    Closed,
}

/// A document as stored inside a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxDocument {
    /// Caller-assigned document identifier, unique within the index.
    pub id: String,
    /// Embedding vector; absent for documents hydrated from partial cold data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// Original text, if the caller supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Free-form metadata attached by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Options accepted by sandbox queries.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of hits to return; `None` returns every match.
    #[serde(default)]
    pub k: Option<usize>,
    /// Minimum accepted score; hits below it are omitted.
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Whether hits carry their stored metadata.
    #[serde(default = "default_include_metadata")]
    pub include_metadata: bool,
}

fn default_include_metadata() -> bool {
    true
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: None,
            threshold: None,
            include_metadata: true,
        }
    }
}

/// A single scored query hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Document identifier.
    pub id: String,
    /// Similarity score in `[0, 1]`, higher is closer.
    pub score: f32,
    /// Stored text, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Stored metadata, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

enum Request {
    AddDocuments {
        docs: Vec<SandboxDocument>,
        reply: oneshot::Sender<Result<usize, SandboxError>>,
    },
    Query {
        vector: Vec<f32>,
        options: SearchOptions,
        reply: oneshot::Sender<Result<Vec<SearchHit>, SandboxError>>,
    },
    RemoveDocuments {
        ids: Vec<String>,
        reply: oneshot::Sender<usize>,
    },
    GetDocuments {
        reply: oneshot::Sender<Vec<SandboxDocument>>,
    },
    Shutdown,
}

/// Handle to a running sandbox task.
///
/// Dropping the handle does not stop the task; call [`SandboxHandle::destroy`].
pub struct SandboxHandle {
    index_id: String,
    tx: mpsc::Sender<Request>,
    task: JoinHandle<()>,
}

impl SandboxHandle {
    /// Spawn a sandbox task for the given index. The store is ready once this returns.
    pub fn spawn(index_id: impl Into<String>) -> Self {
        let index_id = index_id.into();
        let (tx, mut rx) = mpsc::channel::<Request>(64);

        let task_index_id = index_id.clone();
        let task = tokio::spawn(async move {
            let mut store = DocumentStore::new();
            while let Some(request) = rx.recv().await {
                match request {
                    Request::AddDocuments { docs, reply } => {
                        let _ = reply.send(store.add_documents(docs));
                    }
                    Request::Query {
                        vector,
                        options,
                        reply,
                    } => {
                        let _ = reply.send(store.query(&vector, &options));
                    }
                    Request::RemoveDocuments { ids, reply } => {
                        let _ = reply.send(store.remove_documents(&ids));
                    }
                    Request::GetDocuments { reply } => {
                        let _ = reply.send(store.documents());
                    }
                    Request::Shutdown => break,
                }
            }
            tracing::debug!(index_id = %task_index_id, "Sandbox task stopped");
        });

        Self { index_id, tx, task }
    }

    /// Identifier of the index this sandbox serves.
    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// Append a batch of documents; the whole batch is rejected on any invalid entry.
    pub async fn add_documents(
        &self,
        docs: Vec<SandboxDocument>,
    ) -> Result<usize, SandboxError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Request::AddDocuments { docs, reply })
            .await
            .map_err(|_| SandboxError::Closed)?;
        response.await.map_err(|_| SandboxError::Closed)?
    }

    /// Run a similarity query against the stored vectors.
    pub async fn query(
        &self,
        vector: Vec<f32>,
        options: SearchOptions,
    ) -> Result<Vec<SearchHit>, SandboxError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Request::Query {
                vector,
                options,
                reply,
            })
            .await
            .map_err(|_| SandboxError::Closed)?;
        response.await.map_err(|_| SandboxError::Closed)?
    }

    /// Remove documents by id, ignoring unknown ids. Returns the count actually removed.
    pub async fn remove_documents(&self, ids: Vec<String>) -> Result<usize, SandboxError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Request::RemoveDocuments { ids, reply })
            .await
            .map_err(|_| SandboxError::Closed)?;
        response.await.map_err(|_| SandboxError::Closed)
    }

    /// Dump every stored document, in insertion order.
    pub async fn get_documents(&self) -> Result<Vec<SandboxDocument>, SandboxError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Request::GetDocuments { reply })
            .await
            .map_err(|_| SandboxError::Closed)?;
        response.await.map_err(|_| SandboxError::Closed)
    }

    /// Stop the task and release the store. In-flight requests finish first.
    pub async fn destroy(&self) {
        if self.tx.send(Request::Shutdown).await.is_err() {
            // Task already gone; make sure it cannot linger.
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, vector: Vec<f32>) -> SandboxDocument {
        SandboxDocument {
            id: id.to_string(),
            vector: Some(vector),
            text: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn round_trips_documents_through_the_task() {
        let sandbox = SandboxHandle::spawn("ws:a");
        sandbox
            .add_documents(vec![doc("d1", vec![1.0, 0.0]), doc("d2", vec![0.0, 1.0])])
            .await
            .unwrap();

        let hits = sandbox
            .query(vec![1.0, 0.0], SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits[0].id, "d1");

        let docs = sandbox.get_documents().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "d1");

        sandbox.destroy().await;
    }

    #[tokio::test]
    async fn calls_after_destroy_surface_closed() {
        let sandbox = SandboxHandle::spawn("ws:a");
        sandbox.destroy().await;

        // The shutdown races with the channel close; retry until the loop has exited.
        for _ in 0..50 {
            if sandbox.get_documents().await.is_err() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("sandbox kept answering after destroy");
    }

    #[tokio::test]
    async fn remove_reports_actual_count() {
        let sandbox = SandboxHandle::spawn("ws:a");
        sandbox
            .add_documents(vec![doc("d1", vec![1.0, 0.0])])
            .await
            .unwrap();

        let removed = sandbox
            .remove_documents(vec!["d1".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        sandbox.destroy().await;
    }
}
