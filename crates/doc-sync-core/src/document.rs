//! Document: the unit of synchronized state.
//!
//! A document carries:
//! - `id`: assigned by the remote store on first creation (absent until then)
//! - `content`: opaque serialized blob produced by the editing surface
//! - `version`: remote version number, used as the basis for merges
//!
//! The sync layer never interprets `content`, it only passes it through.

use serde::{Deserialize, Serialize};

/// A single document snapshot.
///
/// A document without an `id` has never been persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl Document {
    /// Create an empty, unsaved document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unsaved document with content.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: Some(content.into()),
            version: None,
        }
    }

    /// Create a document that already has a remote identifier.
    pub fn persisted(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            content: Some(content.into()),
            version: None,
        }
    }

    /// Attach a remote version number.
    pub fn at_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Whether the remote store has ever assigned this document an identifier.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

/// Partial update applied against the remote's current version.
///
/// When `base_version` is present the remote rejects the merge if its
/// stored version differs (the caller's basis is stale).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
}

impl DocumentPatch {
    /// Patch that replaces the content, with no version basis.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            base_version: None,
        }
    }

    /// Set the version this patch assumes it is updating.
    pub fn with_base_version(mut self, version: Option<u64>) -> Self {
        self.base_version = version;
        self
    }

    /// Apply the fields present in this patch to `doc`.
    ///
    /// Returns true if anything changed. Does not touch `id` or `version`.
    pub fn apply_to(&self, doc: &mut Document) -> bool {
        match &self.content {
            Some(content) if doc.content.as_ref() != Some(content) => {
                doc.content = Some(content.clone());
                true
            }
            _ => false,
        }
    }
}
