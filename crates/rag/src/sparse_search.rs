//! Lexical retriever over the BM25 index
//!
//! The active index sits behind an `Arc` that is replaced wholesale on build,
//! load or incremental add, so a running search always sees one complete
//! index. Mutations are serialized by a writer lock held from reading the
//! current index to swapping in the next one. Scoring runs on the blocking pool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use medqa_core::{Candidate, Document, DocumentId};

use crate::bm25::{Bm25Index, Bm25Params};
use crate::store::DocumentStore;
use crate::text::Analyzer;
use crate::{RagError, Retriever};

/// BM25 retriever with content hydration
pub struct Bm25Retriever {
    index: RwLock<Option<Arc<Bm25Index>>>,
    /// Held across read-modify-swap so concurrent writers never drop updates
    write_lock: Mutex<()>,
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn DocumentStore>,
    params: Bm25Params,
}

impl Bm25Retriever {
    /// Create a retriever with no index; searches fail until one is built or loaded
    pub fn new(analyzer: Arc<dyn Analyzer>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            index: RwLock::new(None),
            write_lock: Mutex::new(()),
            analyzer,
            store,
            params: Bm25Params::default(),
        }
    }

    /// Parameters used by [`Bm25Retriever::build`]
    pub fn with_params(mut self, params: Bm25Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_index(self, index: Bm25Index) -> Self {
        *self.index.write() = Some(Arc::new(index));
        self
    }

    pub fn is_ready(&self) -> bool {
        self.index.read().is_some()
    }

    /// Current index, if any
    pub fn snapshot(&self) -> Option<Arc<Bm25Index>> {
        self.index.read().clone()
    }

    fn swap(&self, index: Bm25Index) {
        let docs = index.len();
        *self.index.write() = Some(Arc::new(index));
        tracing::info!(docs, "BM25 index swapped in");
    }

    /// Load a snapshot and make it active
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(), RagError> {
        let _writer = self.write_lock.lock();
        let index = Bm25Index::load(path)?;
        self.swap(index);
        Ok(())
    }

    /// Build a fresh index from `documents` and make it active
    pub fn build(&self, documents: &[Document]) -> Result<(), RagError> {
        let _writer = self.write_lock.lock();
        let index = Bm25Index::build(documents, self.analyzer.as_ref(), self.params)?;
        self.swap(index);
        Ok(())
    }

    /// Extend a copy of the active index and swap it in
    pub fn add_documents(&self, documents: &[Document]) -> Result<usize, RagError> {
        let _writer = self.write_lock.lock();
        let mut next = match self.snapshot() {
            Some(current) => current.as_ref().clone(),
            None => Bm25Index::new(self.params),
        };
        let added = next.add_documents(documents, self.analyzer.as_ref())?;
        self.swap(next);
        Ok(added)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RagError> {
        self.snapshot()
            .ok_or_else(|| RagError::NotReady("no BM25 index to save".to_string()))?
            .save(path)
    }

    /// Ranked ids without hydration
    pub async fn search_ids(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(DocumentId, f64)>, RagError> {
        let index = self.snapshot().ok_or_else(|| {
            RagError::NotReady("BM25 index not loaded; build or load a snapshot first".to_string())
        })?;
        let analyzer = Arc::clone(&self.analyzer);
        let query = query.to_string();

        tokio::task::spawn_blocking(move || index.search(&query, analyzer.as_ref(), limit))
            .await
            .map_err(|e| RagError::Search(format!("BM25 search task failed: {}", e)))?
    }
}

#[async_trait]
impl Retriever for Bm25Retriever {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>, RagError> {
        let ranked = self.search_ids(query, limit).await?;
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<DocumentId> = ranked.iter().map(|(id, _)| *id).collect();
        let documents: HashMap<DocumentId, Document> = self
            .store
            .fetch(&ids)
            .await?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();

        let candidates: Vec<Candidate> = ranked
            .into_iter()
            .filter_map(|(id, score)| match documents.get(&id) {
                Some(doc) => Some(Candidate::from_document(doc, score)),
                None => {
                    tracing::debug!(id, "BM25 hit missing from document store, dropped");
                    None
                }
            })
            .collect();

        tracing::debug!(query, hits = candidates.len(), "BM25 search complete");
        Ok(candidates)
    }

    fn name(&self) -> &str {
        "bm25"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::text::WordAnalyzer;

    fn corpus() -> Vec<Document> {
        vec![
            Document::new(1, "đau đầu chóng mặt", "neurology"),
            Document::new(2, "công thức làm bánh", "cooking"),
            Document::new(3, "đau bụng đi ngoài", "gastro"),
        ]
    }

    fn retriever(store_docs: Vec<Document>) -> Bm25Retriever {
        Bm25Retriever::new(
            Arc::new(WordAnalyzer),
            Arc::new(InMemoryStore::from_documents(store_docs)),
        )
    }

    #[tokio::test]
    async fn test_search_before_load_is_not_ready() {
        let retriever = retriever(corpus());
        assert!(!retriever.is_ready());
        let result = retriever.search("đau đầu", 3).await;
        assert!(matches!(result, Err(RagError::NotReady(_))));
    }

    #[tokio::test]
    async fn test_search_hydrates_candidates() {
        let retriever = retriever(corpus());
        retriever.build(&corpus()).unwrap();

        let results = retriever.search("đau đầu", 5).await.unwrap();
        assert_eq!(results[0].id, 1);
        assert_eq!(results[0].category, "neurology");
        assert_eq!(results[0].content, "đau đầu chóng mặt");
        assert!(results[0].embedding.is_none());
        assert!(results.iter().all(|c| c.score > 0.0));
        assert!(results.iter().all(|c| c.id != 2));
    }

    #[tokio::test]
    async fn test_missing_store_entries_are_dropped() {
        let docs = corpus();
        let retriever = retriever(vec![docs[2].clone()]);
        retriever.build(&docs).unwrap();

        let results = retriever.search("đau", 5).await.unwrap();
        let ids: Vec<_> = results.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn test_add_documents_swaps_index() {
        let retriever = retriever(corpus());
        retriever.build(&corpus()[..2]).unwrap();
        let before = retriever.snapshot().unwrap();

        let added = retriever.add_documents(&corpus()).unwrap();
        assert_eq!(added, 1);

        let after = retriever.snapshot().unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(after.len(), 3);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_concurrent_adds_keep_every_batch() {
        let retriever = retriever(Vec::new());
        retriever.build(&corpus()).unwrap();

        let batch = |start: u64| -> Vec<Document> {
            (start..start + 50)
                .map(|id| Document::new(id, format!("triệu chứng số {}", id), "general"))
                .collect()
        };
        let first = batch(100);
        let second = batch(200);

        std::thread::scope(|scope| {
            let a = scope.spawn(|| {
                first
                    .chunks(5)
                    .map(|chunk| retriever.add_documents(chunk).unwrap())
                    .sum::<usize>()
            });
            let b = scope.spawn(|| {
                second
                    .chunks(5)
                    .map(|chunk| retriever.add_documents(chunk).unwrap())
                    .sum::<usize>()
            });
            assert_eq!(a.join().unwrap(), 50);
            assert_eq!(b.join().unwrap(), 50);
        });

        let index = retriever.snapshot().unwrap();
        assert_eq!(index.len(), 103);
        assert!(first.iter().chain(second.iter()).all(|d| index.contains(d.id)));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let built = retriever(corpus());
        built.build(&corpus()).unwrap();
        built.save(&path).unwrap();

        let loaded = retriever(corpus());
        loaded.load(&path).unwrap();
        assert_eq!(
            loaded.search("đau bụng", 2).await.unwrap(),
            built.search("đau bụng", 2).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_save_without_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = retriever(corpus()).save(dir.path().join("x.json"));
        assert!(matches!(result, Err(RagError::NotReady(_))));
    }
}
