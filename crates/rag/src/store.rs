//! Document content lookup
//!
//! The lexical index only knows ids and term statistics. Hits are hydrated
//! with content and category through a [`DocumentStore`]: the in-memory corpus
//! for offline runs, or the vector index's point payloads in production.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use medqa_core::{Document, DocumentId};

use crate::RagError;

/// Lookup of documents by id
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the documents that exist; unknown ids are simply absent
    async fn fetch(&self, ids: &[DocumentId]) -> Result<Vec<Document>, RagError>;
}

/// Corpus held in memory
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new();
        store.insert_all(documents);
        store
    }

    /// Insert documents; an existing id keeps its first document
    pub fn insert_all(&self, documents: impl IntoIterator<Item = Document>) {
        let mut map = self.documents.write();
        for doc in documents {
            map.entry(doc.id).or_insert(doc);
        }
    }

    pub fn get(&self, id: DocumentId) -> Option<Document> {
        self.documents.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// All documents ordered by id
    pub fn documents(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self.documents.read().values().cloned().collect();
        docs.sort_by_key(|d| d.id);
        docs
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn fetch(&self, ids: &[DocumentId]) -> Result<Vec<Document>, RagError> {
        let map = self.documents.read();
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }
}
