//! HTTP persistence client against a local axum server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use doc_sync_client::HttpPersistenceClient;
use doc_sync_core::{
    Document, DocumentPatch, LoopbackHub, PersistError, PersistenceClient, SyncCallbacks, SyncController, SyncError,
};
use url::Url;

// ============================================================================
// Test server
// ============================================================================

async fn fetch_document(Path(id): Path<String>) -> Response {
    match id.as_str() {
        "doc1" => Json(Document::persisted("doc1", "hello").at_version(1)).into_response(),
        "broken" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "garbage" => (StatusCode::OK, "this is not json").into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(Document::persisted("slow", "late")).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn create_document(Json(doc): Json<Document>) -> Json<Document> {
    Json(Document {
        id: Some("new1".to_string()),
        version: Some(1),
        ..doc
    })
}

/// Only accepts merges against version 1 of `doc1`.
async fn merge_document(Path(id): Path<String>, Json(patch): Json<DocumentPatch>) -> Response {
    if id != "doc1" {
        return StatusCode::NOT_FOUND.into_response();
    }
    if patch.base_version != Some(1) {
        return StatusCode::CONFLICT.into_response();
    }
    let mut doc = Document::persisted("doc1", "hello").at_version(2);
    patch.apply_to(&mut doc);
    Json(doc).into_response()
}

async fn start_server() -> SocketAddr {
    let app = Router::new()
        .route("/documents", post(create_document))
        .route("/documents/{id}", get(fetch_document).patch(merge_document));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn client() -> HttpPersistenceClient {
    let addr = start_server().await;
    let base = Url::parse(&format!("http://{}", addr)).unwrap();
    HttpPersistenceClient::new(base, Duration::from_millis(200)).unwrap()
}

fn is_transient(err: &PersistError) -> bool {
    matches!(err, PersistError::Transport { retryable: true, .. })
}

// ============================================================================
// Adapter
// ============================================================================

#[tokio::test]
async fn test_fetch_existing_document() {
    let api = client().await;
    let doc = api.fetch("doc1").await.unwrap();
    assert_eq!(doc, Document::persisted("doc1", "hello").at_version(1));
}

#[tokio::test]
async fn test_fetch_missing_is_not_found() {
    let api = client().await;
    assert_eq!(api.fetch("missing").await, Err(PersistError::NotFound("missing".into())));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let api = client().await;
    let err = api.fetch("broken").await.unwrap_err();
    assert!(is_transient(&err), "got {:?}", err);
}

#[tokio::test]
async fn test_invalid_body_is_fatal() {
    let api = client().await;
    let err = api.fetch("garbage").await.unwrap_err();
    assert!(matches!(err, PersistError::Transport { retryable: false, .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let api = client().await;
    let err = api.fetch("slow").await.unwrap_err();
    assert!(is_transient(&err), "got {:?}", err);
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    // Bind then drop to get a port nobody is listening on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let base = Url::parse(&format!("http://{}", addr)).unwrap();
    let api = HttpPersistenceClient::new(base, Duration::from_millis(200)).unwrap();
    let err = api.fetch("doc1").await.unwrap_err();
    assert!(is_transient(&err), "got {:?}", err);
}

#[tokio::test]
async fn test_create_returns_assigned_id() {
    let api = client().await;
    let created = api.create(&Document::with_content("draft")).await.unwrap();
    assert_eq!(created, Document::persisted("new1", "draft").at_version(1));
}

#[tokio::test]
async fn test_merge_sends_base_version() {
    let api = client().await;

    let merged = api
        .merge_update("doc1", &DocumentPatch::content("edited").with_base_version(Some(1)))
        .await
        .unwrap();
    assert_eq!(merged, Document::persisted("doc1", "edited").at_version(2));

    let stale = api
        .merge_update("doc1", &DocumentPatch::content("edited").with_base_version(Some(0)))
        .await;
    assert_eq!(stale, Err(PersistError::VersionConflict("doc1".into())));
}

// ============================================================================
// Controller over HTTP
// ============================================================================

#[tokio::test]
async fn test_controller_merge_then_conflict() {
    let conflicts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&conflicts);
    let callbacks = SyncCallbacks::new().on_conflict(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let ctl = SyncController::new(Arc::new(client().await), LoopbackHub::new().connect(), callbacks);

    ctl.load("doc1").await.unwrap();
    let merged = ctl.merge_current("doc1", "edited".into()).await.unwrap();
    assert_eq!(merged.version, Some(2));

    // Our basis is now version 2, which the server rejects
    let err = ctl.merge_current("doc1", "again".into()).await.unwrap_err();
    assert_eq!(err, SyncError::Conflict("doc1".into()));
    assert_eq!(conflicts.load(Ordering::SeqCst), 1);
    assert_eq!(ctl.current(), merged);
}
