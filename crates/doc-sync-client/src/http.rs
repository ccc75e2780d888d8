//! REST persistence client.
//!
//! Routes, relative to the configured base URL:
//! - `GET /documents/{id}` - fetch
//! - `POST /documents` - create
//! - `PATCH /documents/{id}` - merge a partial update
//!
//! A 409 response is the conflict signal. Everything else that fails is a
//! transport error whose `retryable` flag is decided here, once, so callers
//! never inspect status codes themselves.

use crate::config::ClientConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use doc_sync_core::persistence::{self, PersistError, PersistenceClient};
use doc_sync_core::{Document, DocumentPatch};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct HttpPersistenceClient {
    client: reqwest::Client,
    base: Url,
}

impl HttpPersistenceClient {
    /// Create a client for the API rooted at `base`. `timeout` bounds each request.
    pub fn new(base: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, base })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.backend()?, config.request_timeout())
    }

    /// `{base}/documents` or `{base}/documents/{id}`, with `id` percent-encoded.
    fn documents_url(&self, id: Option<&str>) -> persistence::Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| PersistError::fatal(format!("{} cannot be a base URL", self.base)))?;
            segments.pop_if_empty().push("documents");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }
}

/// Map a non-success status to the error taxonomy.
pub fn status_error(status: StatusCode, id: &str) -> PersistError {
    match status {
        StatusCode::NOT_FOUND => PersistError::NotFound(id.to_string()),
        StatusCode::CONFLICT => PersistError::VersionConflict(id.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            PersistError::transient(format!("HTTP {}", status))
        }
        s if s.is_server_error() => PersistError::transient(format!("HTTP {}", status)),
        _ => PersistError::fatal(format!("HTTP {}", status)),
    }
}

/// Map a failure to send or receive to the error taxonomy.
fn request_error(err: reqwest::Error) -> PersistError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        PersistError::transient(err.to_string())
    } else {
        PersistError::fatal(err.to_string())
    }
}

async fn read_document(response: Response, id: &str) -> persistence::Result<Document> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status, id));
    }
    response.json::<Document>().await.map_err(|e| {
        if e.is_timeout() {
            PersistError::transient(e.to_string())
        } else {
            PersistError::fatal(format!("Invalid document body: {}", e))
        }
    })
}

#[async_trait]
impl PersistenceClient for HttpPersistenceClient {
    async fn fetch(&self, id: &str) -> persistence::Result<Document> {
        let url = self.documents_url(Some(id))?;
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(request_error)?;
        read_document(response, id).await
    }

    async fn create(&self, doc: &Document) -> persistence::Result<Document> {
        let url = self.documents_url(None)?;
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .json(doc)
            .send()
            .await
            .map_err(request_error)?;
        read_document(response, doc.id().unwrap_or("new document")).await
    }

    async fn merge_update(&self, id: &str, patch: &DocumentPatch) -> persistence::Result<Document> {
        let url = self.documents_url(Some(id))?;
        debug!("PATCH {} (basis {:?})", url, patch.base_version);
        let response = self
            .client
            .patch(url)
            .json(patch)
            .send()
            .await
            .map_err(request_error)?;
        read_document(response, id).await
    }
}
