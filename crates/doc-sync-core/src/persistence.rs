//! PersistenceClient trait for the request/response remote store.
//!
//! Implementations:
//! - `InMemoryStore` - For testing and local-only sessions
//! - `HttpPersistenceClient` (in doc-sync-client) - REST over reqwest
//!
//! Each operation is a single request with no internal retry. Timeouts are
//! the implementation's concern and surface as `PersistError::Transport`.

use crate::document::{Document, DocumentPatch};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The remote's version is newer than the caller's basis.
    #[error("Version conflict on document {0}")]
    VersionConflict(String),

    /// Network, timeout, or protocol failure. `retryable` is the adapter's call.
    #[error("Transport error: {message}")]
    Transport { message: String, retryable: bool },
}

impl PersistError {
    /// A failure worth retrying later (timeouts, dropped connections, 5xx).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away on retry (bad request, undecodable body).
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistError>;

/// Remote document store.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Fetch the current version of a document.
    async fn fetch(&self, id: &str) -> Result<Document>;

    /// Create a document. The remote assigns (or echoes) its identifier.
    async fn create(&self, doc: &Document) -> Result<Document>;

    /// Apply a partial update to the remote's current version.
    async fn merge_update(&self, id: &str, patch: &DocumentPatch) -> Result<Document>;
}
