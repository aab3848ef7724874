//! Dense retrieval: embed the query once, ask the vector index for neighbours

use std::sync::Arc;

use async_trait::async_trait;

use medqa_core::Candidate;

use crate::embeddings::Embedder;
use crate::vector_store::{VectorHit, VectorIndex};
use crate::{RagError, Retriever};

/// Nearest-neighbour retriever
///
/// Scores are the vector index's cosine similarities, kept in the order the
/// index returned them.
pub struct DenseRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl DenseRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Query vector, or `None` for blank input
    pub async fn embed_query(&self, query: &str) -> Result<Option<Vec<f32>>, RagError> {
        if query.trim().is_empty() {
            return Ok(None);
        }
        self.embedder.embed(query).await.map(Some)
    }

    pub async fn search_by_vector(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Candidate>, RagError> {
        let hits = self.index.search(vector, limit).await?;
        tracing::debug!(hits = hits.len(), limit, "Dense search");
        Ok(hits.into_iter().map(candidate_from_hit).collect())
    }

    /// Search and attach an embedding to every candidate
    ///
    /// Candidate vectors are recomputed from content with the same embedder,
    /// so they live in the query's space whatever the index stores.
    pub async fn search_with_embeddings(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Option<(Vec<f32>, Vec<Candidate>)>, RagError> {
        let Some(query_vector) = self.embed_query(query).await? else {
            return Ok(None);
        };

        let mut candidates = self.search_by_vector(&query_vector, limit).await?;
        let contents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&contents).await?;
        if embeddings.len() != candidates.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                candidates.len(),
                embeddings.len()
            )));
        }

        for (candidate, embedding) in candidates.iter_mut().zip(embeddings) {
            candidate.embedding = Some(embedding);
        }
        Ok(Some((query_vector, candidates)))
    }
}

fn candidate_from_hit(hit: VectorHit) -> Candidate {
    Candidate {
        id: hit.id,
        category: hit.category,
        content: hit.content,
        score: hit.score,
        embedding: None,
    }
}

#[async_trait]
impl Retriever for DenseRetriever {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>, RagError> {
        match self.embed_query(query).await? {
            Some(vector) => self.search_by_vector(&vector, limit).await,
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &str {
        "dense"
    }
}
