//! Session-scoped memo of the last confirmed snapshot per document.
//!
//! Entries are never evicted: a session only ever works on a handful of
//! documents, and the cache's only job is to let `load` skip a round-trip
//! for an identifier already seen.

use crate::document::Document;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct LocalCache {
    entries: HashMap<String, Document>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.entries.get(id)
    }

    /// Insert or replace the entry for `id`.
    pub fn put(&mut self, id: impl Into<String>, doc: Document) {
        self.entries.insert(id.into(), doc);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
