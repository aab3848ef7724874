//! Hybrid Retriever
//!
//! Runs a lexical and a dense retriever over a wide pool and merges the two
//! rankings with Reciprocal Rank Fusion. Only ranks matter: BM25 and cosine
//! scores are never compared directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use medqa_config::constants::retrieval;
use medqa_config::RetrievalSettings;
use medqa_core::{sort_by_score, Candidate, DocumentId};

use crate::{RagError, Retriever};

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Candidates requested from each retriever before fusion
    pub pool_size: usize,
    /// RRF k parameter
    pub rrf_k: f64,
    /// Results kept for the first retrieval round
    pub final_top_k: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            pool_size: retrieval::POOL_SIZE,
            rrf_k: retrieval::RRF_K,
            final_top_k: retrieval::FINAL_TOP_K,
        }
    }
}

impl From<&RetrievalSettings> for RetrieverConfig {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            pool_size: settings.pool_size,
            rrf_k: settings.rrf_k,
            final_top_k: settings.final_top_k,
        }
    }
}

/// Reciprocal Rank Fusion over a lexical and a dense list
///
/// Each list is re-sorted by its own score first; ranks start at 1. An id's
/// content comes from the first list that produced it, lexical before dense.
/// Fused candidates carry no embedding.
pub fn rrf_fuse(
    lexical: Vec<Candidate>,
    dense: Vec<Candidate>,
    k: f64,
    limit: usize,
) -> Vec<Candidate> {
    let mut fused: HashMap<DocumentId, Candidate> = HashMap::new();

    for mut list in [lexical, dense] {
        sort_by_score(&mut list);
        for (idx, candidate) in list.into_iter().enumerate() {
            let contribution = 1.0 / (k + (idx + 1) as f64);
            fused
                .entry(candidate.id)
                .and_modify(|c| c.score += contribution)
                .or_insert_with(|| Candidate {
                    score: contribution,
                    embedding: None,
                    ..candidate
                });
        }
    }

    let mut results: Vec<Candidate> = fused.into_values().collect();
    sort_by_score(&mut results);
    results.truncate(limit);
    results
}

/// Lexical + dense retrieval fused with RRF
pub struct HybridRetriever {
    lexical: Arc<dyn Retriever>,
    dense: Arc<dyn Retriever>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        lexical: Arc<dyn Retriever>,
        dense: Arc<dyn Retriever>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            lexical,
            dense,
            config,
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>, RagError> {
        let pool = self.config.pool_size.max(limit);

        let (lexical, dense) = tokio::join!(
            self.lexical.search(query, pool),
            self.dense.search(query, pool)
        );
        let lexical = lexical?;
        let dense = dense?;

        tracing::debug!(
            lexical = lexical.len(),
            dense = dense.len(),
            pool,
            "Fusing retrieval pools"
        );

        Ok(rrf_fuse(lexical, dense, self.config.rrf_k, limit))
    }

    fn name(&self) -> &str {
        "hybrid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: DocumentId, content: &str, score: f64) -> Candidate {
        Candidate {
            id,
            category: "test".to_string(),
            content: content.to_string(),
            score,
            embedding: None,
        }
    }

    struct FixedRetriever(Vec<Candidate>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &str, limit: usize) -> Result<Vec<Candidate>, RagError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingRetriever;

    #[async_trait]
    impl Retriever for FailingRetriever {
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Candidate>, RagError> {
            Err(RagError::VectorStore("connection refused".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_config_default() {
        let config = RetrieverConfig::default();
        assert_eq!(config.pool_size, 50);
        assert_eq!(config.rrf_k, 60.0);
        assert_eq!(config.final_top_k, 3);
    }

    #[test]
    fn test_single_list_contribution() {
        let fused = rrf_fuse(vec![candidate(7, "a", 12.0)], vec![], 60.0, 10);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rank_one_in_both_dominates() {
        let lexical = vec![candidate(1, "x", 9.0), candidate(2, "y", 5.0), candidate(3, "z", 1.0)];
        let dense = vec![candidate(1, "x", 0.9), candidate(3, "z", 0.8), candidate(4, "w", 0.7)];

        let fused = rrf_fuse(lexical, dense, 60.0, 10);
        assert_eq!(fused[0].id, 1);
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-12);
        assert!(fused[1..].iter().all(|c| c.score < fused[0].score));
    }

    #[test]
    fn test_lists_resorted_by_native_score() {
        // dense list arrives unsorted
        let dense = vec![candidate(2, "b", 0.1), candidate(5, "e", 0.9)];
        let fused = rrf_fuse(vec![], dense, 60.0, 10);
        assert_eq!(fused[0].id, 5);
    }

    #[test]
    fn test_dense_only_id_keeps_its_dense_contribution() {
        let lexical = vec![candidate(1, "a", 8.0), candidate(2, "b", 4.0)];
        // dense ranks: 2 first, 6 second; 6 is absent from the lexical list
        let dense = vec![candidate(6, "f", 0.4), candidate(2, "b", 0.8)];

        let fused = rrf_fuse(lexical, dense, 60.0, 10);
        let dense_only = fused.iter().find(|c| c.id == 6).unwrap();
        assert_eq!(dense_only.score, 1.0 / (60.0 + 2.0));
        assert_eq!(dense_only.content, "f");

        let both = fused.iter().find(|c| c.id == 2).unwrap();
        assert_eq!(both.score, 1.0 / 62.0 + 1.0 / 61.0);
    }

    #[test]
    fn test_first_seen_content_and_tie_break() {
        let lexical = vec![candidate(9, "lexical text", 3.0)];
        let mut dense_hit = candidate(9, "dense text", 0.5);
        dense_hit.embedding = Some(vec![1.0]);
        let fused = rrf_fuse(lexical, vec![dense_hit], 60.0, 10);
        assert_eq!(fused[0].content, "lexical text");
        assert!(fused[0].embedding.is_none());

        // same rank in different lists: equal fused score, ascending id wins
        let fused = rrf_fuse(vec![candidate(8, "a", 1.0)], vec![candidate(4, "b", 1.0)], 60.0, 10);
        assert_eq!(fused.iter().map(|c| c.id).collect::<Vec<_>>(), vec![4, 8]);
    }

    #[test]
    fn test_limit_applied() {
        let lexical: Vec<Candidate> = (1..=10).map(|i| candidate(i, "t", 10.0 - i as f64)).collect();
        assert_eq!(rrf_fuse(lexical, vec![], 60.0, 3).len(), 3);
    }

    #[tokio::test]
    async fn test_hybrid_search() {
        let lexical = Arc::new(FixedRetriever(vec![candidate(1, "a", 4.0), candidate(2, "b", 2.0)]));
        let dense = Arc::new(FixedRetriever(vec![candidate(2, "b", 0.9), candidate(3, "c", 0.8)]));
        let hybrid = HybridRetriever::new(lexical, dense, RetrieverConfig::default());

        let results = hybrid.search("đau đầu", 3).await.unwrap();
        assert_eq!(results[0].id, 2);
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_hybrid_propagates_collaborator_failure() {
        let lexical = Arc::new(FixedRetriever(vec![candidate(1, "a", 4.0)]));
        let hybrid = HybridRetriever::new(lexical, Arc::new(FailingRetriever), RetrieverConfig::default());

        let err = hybrid.search("ho", 3).await.unwrap_err();
        assert!(err.is_collaborator_unavailable());
    }
}
