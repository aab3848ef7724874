//! Maximal Marginal Relevance
//!
//! Fetches a wide dense pool with candidate vectors and greedily picks
//! documents that are relevant to the query but unlike what is already
//! picked: `λ·sim(q, d) − (1 − λ)·max sim(d, s)` over selected `s`. The query
//! similarity is the dense cosine score.

use std::sync::Arc;

use async_trait::async_trait;

use medqa_config::constants::retrieval;
use medqa_config::RetrievalSettings;
use medqa_core::Candidate;

use crate::dense::DenseRetriever;
use crate::embeddings::cosine_similarity;
use crate::{RagError, Retriever};

#[derive(Debug, Clone, Copy)]
pub struct MmrConfig {
    /// 1.0 is pure relevance, 0.0 pure diversity
    pub lambda: f64,
    /// Dense pool size before re-selection
    pub fetch_k: usize,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            lambda: retrieval::MMR_LAMBDA,
            fetch_k: retrieval::MMR_FETCH_K,
        }
    }
}

impl From<&RetrievalSettings> for MmrConfig {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            lambda: settings.mmr_lambda,
            fetch_k: settings.mmr_fetch_k,
        }
    }
}

/// Indices of the picked candidates, in pick order
///
/// Equal MMR scores go to the better-ranked candidate.
pub fn select_mmr(candidates: &[Candidate], limit: usize, lambda: f64) -> Vec<usize> {
    if candidates.is_empty() || limit == 0 {
        return Vec::new();
    }

    let empty: Vec<f32> = Vec::new();
    let vectors: Vec<&Vec<f32>> = candidates
        .iter()
        .map(|c| c.embedding.as_ref().unwrap_or(&empty))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(limit.min(candidates.len()));

    while selected.len() < limit && !remaining.is_empty() {
        let mut best: Option<(usize, f64)> = None;

        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(vectors[idx], vectors[s]))
                .fold(None, |acc: Option<f64>, sim| Some(acc.map_or(sim, |a| a.max(sim))));

            let score = match redundancy {
                Some(max_sim) => lambda * candidates[idx].score - (1.0 - lambda) * max_sim,
                // nothing picked yet: most relevant first
                None => candidates[idx].score,
            };

            if best.map_or(true, |(_, b)| score > b) {
                best = Some((pos, score));
            }
        }

        match best {
            Some((pos, _)) => selected.push(remaining.remove(pos)),
            None => break,
        }
    }

    selected
}

/// Dense retriever with MMR re-selection
pub struct MmrRetriever {
    dense: Arc<DenseRetriever>,
    config: MmrConfig,
}

impl MmrRetriever {
    pub fn new(dense: Arc<DenseRetriever>, config: MmrConfig) -> Result<Self, RagError> {
        if !(0.0..=1.0).contains(&config.lambda) {
            return Err(RagError::Configuration(format!(
                "MMR lambda must be within [0, 1], got {}",
                config.lambda
            )));
        }
        Ok(Self { dense, config })
    }
}

#[async_trait]
impl Retriever for MmrRetriever {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>, RagError> {
        let fetch_k = self.config.fetch_k.max(limit);
        let Some((_, pool)) = self.dense.search_with_embeddings(query, fetch_k).await? else {
            return Ok(Vec::new());
        };

        let mut picked = select_mmr(&pool, limit, self.config.lambda);
        tracing::debug!(pool = pool.len(), picked = picked.len(), "MMR re-selection");

        // keep the dense ranking order among the picked ones
        picked.sort_unstable();
        let mut pool: Vec<Option<Candidate>> = pool.into_iter().map(Some).collect();
        Ok(picked
            .into_iter()
            .filter_map(|idx| pool[idx].take())
            .collect())
    }

    fn name(&self) -> &str {
        "mmr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingConfig, SimpleEmbedder};
    use crate::vector_store::{InMemoryVectorIndex, VectorIndex};
    use medqa_core::Document;

    fn candidate(id: u64, score: f64, embedding: Vec<f32>) -> Candidate {
        Candidate {
            id,
            category: String::new(),
            content: String::new(),
            score,
            embedding: Some(embedding),
        }
    }

    #[test]
    fn test_pure_relevance_follows_scores() {
        let pool = vec![
            candidate(1, 0.9, vec![1.0, 0.0]),
            candidate(2, 0.8, vec![1.0, 0.0]),
            candidate(3, 0.5, vec![0.0, 1.0]),
        ];
        assert_eq!(select_mmr(&pool, 2, 1.0), vec![0, 1]);
    }

    #[test]
    fn test_diversity_skips_duplicate() {
        let pool = vec![
            candidate(1, 0.9, vec![1.0, 0.0]),
            candidate(2, 0.89, vec![1.0, 0.0]),
            candidate(3, 0.6, vec![0.0, 1.0]),
        ];
        // 0.5*0.89 - 0.5*1.0 < 0.5*0.6 - 0.5*0.0
        assert_eq!(select_mmr(&pool, 2, 0.5), vec![0, 2]);
    }

    #[test]
    fn test_limit_and_empty() {
        assert!(select_mmr(&[], 3, 0.5).is_empty());
        let pool = vec![candidate(1, 0.9, vec![1.0])];
        assert_eq!(select_mmr(&pool, 5, 0.5), vec![0]);
        assert!(select_mmr(&pool, 0, 0.5).is_empty());
    }

    fn dense_retriever() -> Arc<DenseRetriever> {
        let embedder = Arc::new(SimpleEmbedder::new(EmbeddingConfig {
            embedding_dim: 128,
            normalize: true,
        }));
        Arc::new(DenseRetriever::new(embedder, Arc::new(InMemoryVectorIndex::new())))
    }

    #[test]
    fn test_lambda_validated() {
        let config = MmrConfig {
            lambda: 1.5,
            fetch_k: 10,
        };
        assert!(matches!(
            MmrRetriever::new(dense_retriever(), config),
            Err(RagError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_search_prefers_diverse_documents() {
        let embedder = SimpleEmbedder::new(EmbeddingConfig {
            embedding_dim: 1024,
            normalize: true,
        });
        let docs = vec![
            Document::new(1, "đau đầu chóng mặt", "neurology"),
            Document::new(2, "đau đầu chóng mặt", "neurology"),
            Document::new(3, "đau bụng", "gastro"),
        ];
        let embeddings: Vec<Vec<f32>> = docs.iter().map(|d| embedder.embed_sync(&d.content)).collect();
        let index = Arc::new(InMemoryVectorIndex::new());
        index.upsert(&docs, &embeddings).await.unwrap();

        let dense = Arc::new(DenseRetriever::new(Arc::new(embedder), index));
        let mmr = MmrRetriever::new(dense, MmrConfig::default()).unwrap();

        let results = mmr.search("đau đầu", 2).await.unwrap();
        let ids: Vec<_> = results.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
