//! In-memory remote store for testing and local-only sessions.
//!
//! Behaves like a versioned document API: `create` assigns an id and
//! version 1, `merge_update` bumps the version and rejects stale bases.
//! Test hooks let callers count round-trips, inject failures, and hold the
//! next request open to observe in-flight state.

use crate::document::{Document, DocumentPatch};
use crate::persistence::{PersistError, PersistenceClient, Result};
use async_trait::async_trait;
use futures::channel::oneshot;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

pub struct InMemoryStore {
    documents: RwLock<HashMap<String, Document>>,
    /// Number of requests received, successful or not
    calls: AtomicUsize,
    /// Failures returned by the next requests, in order
    failures: Mutex<VecDeque<PersistError>>,
    /// When set, the next request waits for the paired sender
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
        }
    }

    /// Seed a document. Documents without an id are ignored.
    pub fn with_document(self, doc: Document) -> Self {
        self.insert(doc);
        self
    }

    /// Insert or replace a document as if another client had written it.
    pub fn insert(&self, doc: Document) {
        let Some(id) = doc.id.clone() else {
            return;
        };
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, doc);
    }

    /// Read the stored document without counting as a request.
    pub fn get(&self, id: &str) -> Option<Document> {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Number of requests that reached the store.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next request fail with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, err: PersistError) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(err);
    }

    /// Hold the next request open until the returned sender fires (or is dropped).
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap_or_else(|e| e.into_inner()) = Some(rx);
        tx
    }

    /// Common request preamble: count, wait on the gate, then apply injected failures.
    async fn begin_request(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(gate) = gate {
            // A dropped sender releases the request too.
            let _ = gate.await;
        }

        let injected = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceClient for InMemoryStore {
    async fn fetch(&self, id: &str) -> Result<Document> {
        self.begin_request().await?;
        self.get(id).ok_or_else(|| PersistError::NotFound(id.to_string()))
    }

    async fn create(&self, doc: &Document) -> Result<Document> {
        self.begin_request().await?;

        let id = doc
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        let version = documents
            .get(&id)
            .and_then(|existing| existing.version)
            .map_or(1, |v| v + 1);

        let created = Document {
            id: Some(id.clone()),
            content: doc.content.clone(),
            version: Some(version),
        };
        documents.insert(id, created.clone());
        Ok(created)
    }

    async fn merge_update(&self, id: &str, patch: &DocumentPatch) -> Result<Document> {
        self.begin_request().await?;

        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        let stored = documents
            .get_mut(id)
            .ok_or_else(|| PersistError::NotFound(id.to_string()))?;

        if let Some(basis) = patch.base_version {
            if stored.version != Some(basis) {
                return Err(PersistError::VersionConflict(id.to_string()));
            }
        }

        patch.apply_to(stored);
        stored.version = Some(stored.version.unwrap_or(0) + 1);
        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_id_and_version() {
        let store = InMemoryStore::new();
        let created = store.create(&Document::with_content("draft")).await.unwrap();

        let id = created.id().unwrap().to_string();
        assert_eq!(created.content(), Some("draft"));
        assert_eq!(created.version, Some(1));
        assert_eq!(store.get(&id), Some(created));
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        let store = InMemoryStore::new();
        let err = store.fetch("nope").await.unwrap_err();
        assert_eq!(err, PersistError::NotFound("nope".into()));
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_bumps_version() {
        let store = InMemoryStore::new().with_document(Document::persisted("doc1", "a").at_version(1));

        let merged = store
            .merge_update("doc1", &DocumentPatch::content("b").with_base_version(Some(1)))
            .await
            .unwrap();

        assert_eq!(merged.content(), Some("b"));
        assert_eq!(merged.version, Some(2));
    }

    #[tokio::test]
    async fn test_merge_with_stale_basis_conflicts() {
        let store = InMemoryStore::new().with_document(Document::persisted("doc1", "a").at_version(4));

        let err = store
            .merge_update("doc1", &DocumentPatch::content("b").with_base_version(Some(3)))
            .await
            .unwrap_err();

        assert_eq!(err, PersistError::VersionConflict("doc1".into()));
        assert_eq!(store.get("doc1").unwrap().content(), Some("a"));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let store = InMemoryStore::new().with_document(Document::persisted("doc1", "a"));
        store.fail_next(PersistError::transient("timeout"));

        assert!(store.fetch("doc1").await.is_err());
        assert!(store.fetch("doc1").await.is_ok());
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn test_dropped_gate_releases_request() {
        let store = InMemoryStore::new().with_document(Document::persisted("doc1", "a"));
        drop(store.hold_next());
        assert!(store.fetch("doc1").await.is_ok());
    }
}
