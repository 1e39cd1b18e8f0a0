//! Router-level tests over the HTTP surface, plus the remote embedding provider path
//! stubbed with an HTTP mock.

use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use httpmock::{Method::POST, MockServer};
use serde_json::{Value, json};
use tower::util::ServiceExt;
use vecwarden::api::create_router;
use vecwarden::config::Settings;
use vecwarden::embedding::{EmbeddingProvider, RemoteEmbeddingClient};
use vecwarden::manager::VectorIndexManager;

fn test_manager(offload_dir: &Path) -> VectorIndexManager {
    let settings = Settings {
        offload_dir: offload_dir.to_path_buf(),
        default_inactivity_timeout: Duration::ZERO,
        default_embedding_model: Some("mock-model".to_string()),
        ..Settings::default()
    };
    VectorIndexManager::new(settings).expect("manager construction")
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn create_ingest_query_and_destroy_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let router = create_router(test_manager(dir.path()));

    let (status, body) = send(
        &router,
        "POST",
        "/indices",
        Some(json!({ "id": "a", "namespace": "ws" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "ws:a");

    let (status, body) = send(
        &router,
        "POST",
        "/indices/ws:a/documents",
        Some(json!({
            "documents": [
                { "id": "d1", "text": "machine learning" },
                { "id": "d2", "text": "deep learning" }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 2);

    let (status, body) = send(
        &router,
        "POST",
        "/indices/ws:a/query",
        Some(json!({ "query": "machine", "k": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0]["score"].as_f64().unwrap() >= results[1]["score"].as_f64().unwrap());

    let (status, body) = send(
        &router,
        "POST",
        "/indices/ws:a/remove",
        Some(json!({ "ids": ["d2", "ghost"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);

    let (status, body) = send(&router, "GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["live_count"], 1);
    assert_eq!(body["total_documents"], 1);

    let (status, _) = send(&router, "DELETE", "/indices/ws:a", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&router, "GET", "/indices/ws:a", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn conflicting_create_maps_to_conflict_status() {
    let dir = tempfile::tempdir().unwrap();
    let router = create_router(test_manager(dir.path()));

    let (status, _) = send(&router, "POST", "/indices", Some(json!({ "id": "dup" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&router, "POST", "/indices", Some(json!({ "id": "dup" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("dup"));
}

#[tokio::test]
async fn offload_and_cold_listing_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let router = create_router(test_manager(dir.path()));

    send(
        &router,
        "POST",
        "/indices",
        Some(json!({ "id": "a", "namespace": "ws" })),
    )
    .await;
    send(
        &router,
        "POST",
        "/indices/ws:a/documents",
        Some(json!({ "documents": [{ "id": "d", "text": "t" }] })),
    )
    .await;

    let (status, _) = send(&router, "POST", "/indices/ws:a/offload", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, "GET", "/indices/offloaded?namespace=ws", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], "ws:a");
    assert_eq!(listed[0]["documentCount"], 1);
    assert_eq!(listed[0]["format"], "binary_v1");

    let (status, body) = send(&router, "DELETE", "/indices/offloaded/ws:a", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (_, body) = send(&router, "GET", "/indices/offloaded", None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn text_ingest_through_a_remote_provider() {
    let server = MockServer::start_async().await;
    let embed_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/embed")
                .json_body_partial(r#"{ "model": "nomic-embed-text" }"#);
            then.status(200)
                .json_body(json!({ "embeddings": [[0.1, 0.2, 0.3, 0.4]] }));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(dir.path());
    let client = RemoteEmbeddingClient::new(server.base_url(), "nomic-embed-text", 4).unwrap();
    manager
        .providers()
        .add("remote", EmbeddingProvider::remote("nomic-embed-text", 4, client));

    let router = create_router(manager);
    let (status, body) = send(
        &router,
        "POST",
        "/indices",
        Some(json!({ "id": "r", "embeddingProviderName": "remote" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "r");

    let (status, body) = send(
        &router,
        "POST",
        "/indices/r/documents",
        Some(json!({ "documents": [{ "id": "d", "text": "remote embedding" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 1);
    embed_mock.assert_async().await;

    let (_, body) = send(&router, "GET", "/indices/r", None).await;
    assert_eq!(body["embedding_dimension"], 4);
}
