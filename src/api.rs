//! HTTP surface for Vecwarden.
//!
//! This module exposes a compact Axum router over the index manager:
//!
//! - `POST /indices` – Create a live index, or resume an offloaded one with `resume: true`.
//! - `GET /indices` – List live indices; `GET /indices/{id}` – one live snapshot.
//! - `GET /indices/offloaded` – List cold descriptors, newest offload first.
//! - `POST /indices/{id}/documents` – Ingest documents (vectors pass through, text is embedded).
//! - `POST /indices/{id}/query` – Similarity query by text or vector.
//! - `POST /indices/{id}/remove` – Remove documents by id.
//! - `POST /indices/{id}/offload` – Manually offload a live index.
//! - `DELETE /indices/{id}` – Destroy a live index; `DELETE /indices/offloaded/{id}` – delete
//!   cold files.
//! - `PUT /monitoring` – Toggle inactivity monitoring globally.
//! - `GET /stats` – Manager statistics snapshot.
//!
//! The HTTP surface shares the manager with any embedding front-end, so behavior is identical
//! across interfaces.

use crate::manager::{
    CreateIndexOptions, DocumentInput, IndexError, QueryInput, VectorIndexManager,
};
use crate::sandbox::SearchOptions;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Build the HTTP router exposing the index-manager API surface.
pub fn create_router(manager: VectorIndexManager) -> Router {
    Router::new()
        .route("/indices", post(create_index).get(list_indices))
        .route(
            "/indices/offloaded",
            get(list_offloaded),
        )
        .route("/indices/offloaded/:id", delete(delete_offloaded))
        .route("/indices/:id", get(get_index).delete(destroy_index))
        .route("/indices/:id/documents", post(add_documents))
        .route("/indices/:id/query", post(query_index))
        .route("/indices/:id/remove", post(remove_documents))
        .route("/indices/:id/offload", post(offload_index))
        .route("/monitoring", put(set_monitoring))
        .route("/stats", get(get_stats))
        .with_state(manager)
}

/// Optional namespace filter shared by the listing endpoints.
#[derive(Deserialize, Default)]
struct NamespaceFilter {
    #[serde(default)]
    namespace: Option<String>,
}

/// Request body for `POST /indices/{id}/documents`.
#[derive(Deserialize)]
struct IngestRequest {
    documents: Vec<DocumentInput>,
}

/// Request body for `POST /indices/{id}/query`.
#[derive(Deserialize)]
struct QueryRequest {
    query: QueryInput,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default)]
    include_metadata: Option<bool>,
}

/// Request body for `POST /indices/{id}/remove`.
#[derive(Deserialize)]
struct RemoveRequest {
    ids: Vec<String>,
}

/// Request body for `PUT /monitoring`.
#[derive(Deserialize)]
struct MonitoringRequest {
    enabled: bool,
}

#[derive(Serialize)]
struct CreateResponse {
    id: String,
}

async fn create_index(
    State(manager): State<VectorIndexManager>,
    Json(options): Json<CreateIndexOptions>,
) -> Result<impl IntoResponse, ApiError> {
    let id = manager.create_index(options).await?;
    Ok((StatusCode::CREATED, Json(CreateResponse { id })))
}

async fn list_indices(
    State(manager): State<VectorIndexManager>,
    Query(filter): Query<NamespaceFilter>,
) -> impl IntoResponse {
    Json(manager.list_indices(filter.namespace.as_deref()))
}

async fn get_index(
    State(manager): State<VectorIndexManager>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    manager
        .get_instance(&id)
        .map(Json)
        .ok_or_else(|| ApiError(IndexError::NotFound(id)))
}

async fn list_offloaded(
    State(manager): State<VectorIndexManager>,
    Query(filter): Query<NamespaceFilter>,
) -> impl IntoResponse {
    Json(manager.list_offloaded_indices(filter.namespace.as_deref()))
}

async fn add_documents(
    State(manager): State<VectorIndexManager>,
    Path(id): Path<String>,
    Json(request): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let added = manager.add_documents(&id, request.documents).await?;
    Ok(Json(json!({ "added": added })))
}

async fn query_index(
    State(manager): State<VectorIndexManager>,
    Path(id): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let options = SearchOptions {
        k: request.k,
        threshold: request.threshold,
        include_metadata: request.include_metadata.unwrap_or(true),
    };
    let results = manager.query_index(&id, request.query, options).await?;
    Ok(Json(json!({ "results": results })))
}

async fn remove_documents(
    State(manager): State<VectorIndexManager>,
    Path(id): Path<String>,
    Json(request): Json<RemoveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = manager.remove_documents(&id, request.ids).await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn offload_index(
    State(manager): State<VectorIndexManager>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    manager.manual_offload(&id).await?;
    Ok(Json(json!({ "offloaded": true })))
}

async fn destroy_index(
    State(manager): State<VectorIndexManager>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    manager.destroy_index(&id).await?;
    Ok(Json(json!({ "destroyed": true })))
}

async fn delete_offloaded(
    State(manager): State<VectorIndexManager>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = manager.delete_offloaded_index(&id)?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn set_monitoring(
    State(manager): State<VectorIndexManager>,
    Json(request): Json<MonitoringRequest>,
) -> impl IntoResponse {
    manager.set_activity_monitoring(request.enabled);
    Json(json!({ "enabled": request.enabled }))
}

async fn get_stats(State(manager): State<VectorIndexManager>) -> impl IntoResponse {
    Json(manager.stats())
}

/// Wrapper mapping manager errors onto HTTP statuses.
struct ApiError(IndexError);

impl From<IndexError> for ApiError {
    fn from(error: IndexError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IndexError::NotFound(_) | IndexError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            IndexError::Exists(_)
            | IndexError::AlreadyRunning(_)
            | IndexError::ExistsOffloaded(_) => StatusCode::CONFLICT,
            IndexError::Capacity(_) => StatusCode::TOO_MANY_REQUESTS,
            IndexError::NamespaceForbidden(_) => StatusCode::FORBIDDEN,
            IndexError::DocumentWithoutContent(_)
            | IndexError::DimensionMismatch { .. }
            | IndexError::NoEmbeddingProvider(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IndexError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            IndexError::Embedding(_) | IndexError::Sandbox(_) | IndexError::Offload(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
