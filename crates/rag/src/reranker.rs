//! Evidence reranking
//!
//! Re-scores retrieved candidates against the question before they are handed
//! to answer synthesis. Two implementations:
//! - [`LexicalReranker`]: weighted term overlap, no model needed
//! - [`HttpReranker`]: a cross-encoder (ViRanker by default) served by a
//!   text-embeddings-inference compatible `/rerank` endpoint
//!
//! Output is ordered by the new score, ties broken by ascending id.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use medqa_config::constants::{endpoints, models, timeouts};
use medqa_config::RerankerSettings;
use medqa_core::{sort_by_score, Candidate};

use crate::text::normalize;
use crate::RagError;

/// Re-orders candidates by relevance to a query
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Re-scored candidates, best first, at most `top_k`
    async fn rerank(
        &self,
        query: &str,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Vec<Candidate>, RagError>;

    fn name(&self) -> &str;
}

fn apply_scores(candidates: &[Candidate], scores: &[f64], top_k: usize) -> Vec<Candidate> {
    let mut ranked: Vec<Candidate> = candidates
        .iter()
        .zip(scores)
        .map(|(c, score)| Candidate {
            score: *score,
            ..c.clone()
        })
        .collect();
    sort_by_score(&mut ranked);
    ranked.truncate(top_k);
    ranked
}

/// Vietnamese function words ignored when matching
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "và", "là", "của", "có", "không", "bị", "cho", "các", "những", "được", "với", "thì",
        "mà", "này", "đó", "gì", "như", "thế", "nào", "tôi", "bạn", "em", "anh", "chị", "một",
        "ở", "trong", "khi", "nên", "làm", "ra", "vào", "đã", "đang", "sẽ", "rất", "cũng", "hay",
        "hoặc", "nếu", "vì", "sao", "vậy", "à", "ạ", "nhé", "ơi",
    ]
    .into_iter()
    .collect()
});

/// Term-overlap scorer
///
/// Per matched query term: `sqrt(tf) · ln(1 + chars) · position weight ·
/// length norm`, plus a coverage bonus, squashed into `[0, 1)`. Words joined
/// with `_` are compared syllable by syllable.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

impl LexicalReranker {
    fn syllables(text: &str) -> Vec<String> {
        normalize(text)
            .replace('_', " ")
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    pub fn score(query: &str, document: &str) -> f64 {
        let query_terms: Vec<String> = Self::syllables(query)
            .into_iter()
            .filter(|w| !STOPWORDS.contains(w.as_str()))
            .collect();
        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words = Self::syllables(document);
        let doc_len = doc_words.len().max(1) as f64;
        let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());

        let mut total = 0.0;
        let mut matched = 0usize;
        for (pos, term) in query_terms.iter().enumerate() {
            let tf = doc_words.iter().filter(|w| *w == term).count() as f64;
            if tf == 0.0 {
                continue;
            }
            matched += 1;

            let idf_approx = (1.0 + term.chars().count() as f64).ln();
            let position_weight = 1.0 / (1.0 + pos as f64 * 0.1);
            total += tf.sqrt() * idf_approx * position_weight * length_norm;
        }

        let coverage = matched as f64 / query_terms.len() as f64;
        let raw = total + coverage * 0.3;
        raw / (raw + 1.0)
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Vec<Candidate>, RagError> {
        let scores: Vec<f64> = candidates
            .iter()
            .map(|c| Self::score(query, &c.content))
            .collect();
        Ok(apply_scores(candidates, &scores, top_k))
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

/// Cross-encoder endpoint configuration
#[derive(Debug, Clone)]
pub struct HttpRerankerConfig {
    /// Server base URL; `/rerank` is appended
    pub endpoint: String,
    /// Model served at the endpoint, for logs
    pub model: String,
    pub timeout: Duration,
}

impl Default for HttpRerankerConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::RERANKER_DEFAULT.to_string(),
            model: models::RERANKER.to_string(),
            timeout: Duration::from_secs(timeouts::RERANK_REQUEST_SECS),
        }
    }
}

impl From<&RerankerSettings> for HttpRerankerConfig {
    fn from(settings: &RerankerSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    score: f64,
}

/// Cross-encoder reranker over HTTP
pub struct HttpReranker {
    client: Client,
    config: HttpRerankerConfig,
}

impl HttpReranker {
    pub fn new(config: HttpRerankerConfig) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        tracing::info!(endpoint = %config.endpoint, model = %config.model, "HTTP reranker created");
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!("{}/rerank", self.config.endpoint.trim_end_matches('/'))
    }

    /// Map `{index, score}` pairs back onto the candidates
    fn scores_by_index(expected: usize, scores: Vec<RerankScore>) -> Result<Vec<f64>, RagError> {
        let mut by_index: Vec<Option<f64>> = vec![None; expected];
        for entry in scores {
            match by_index.get_mut(entry.index) {
                Some(slot) if slot.is_none() => *slot = Some(entry.score),
                Some(_) => {
                    return Err(RagError::Rerank(format!(
                        "index {} scored twice",
                        entry.index
                    )))
                }
                None => {
                    return Err(RagError::Rerank(format!(
                        "index {} out of range for {} texts",
                        entry.index, expected
                    )))
                }
            }
        }
        by_index
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.ok_or_else(|| RagError::Rerank(format!("text {} was not scored", i))))
            .collect()
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Vec<Candidate>, RagError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            query,
            texts: candidates.iter().map(|c| c.content.as_str()).collect(),
        };

        let response = self
            .client
            .post(self.url())
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Rerank(format!("Rerank request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Rerank(format!("Rerank failed: {} - {}", status, text)));
        }

        let scores: Vec<RerankScore> = response
            .json()
            .await
            .map_err(|e| RagError::Rerank(format!("Failed to parse rerank response: {}", e)))?;

        let scores = Self::scores_by_index(candidates.len(), scores)?;
        tracing::debug!(candidates = candidates.len(), model = %self.config.model, "Reranked");
        Ok(apply_scores(candidates, &scores, top_k))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u64, content: &str) -> Candidate {
        Candidate {
            id,
            category: "test".to_string(),
            content: content.to_string(),
            score: 0.5,
            embedding: None,
        }
    }

    #[test]
    fn test_lexical_score_prefers_overlap() {
        let relevant = LexicalReranker::score(
            "triệu chứng viêm họng",
            "Viêm họng có triệu chứng đau rát họng và sốt nhẹ.",
        );
        let partial = LexicalReranker::score("triệu chứng viêm họng", "Triệu chứng của cảm cúm.");
        let unrelated = LexicalReranker::score("triệu chứng viêm họng", "Giờ khám bệnh từ 7h đến 17h.");

        assert!(relevant > partial);
        assert!(partial > unrelated);
        assert_eq!(unrelated, 0.0);
        assert!(relevant < 1.0);
    }

    #[test]
    fn test_lexical_score_matches_segmented_words() {
        let score = LexicalReranker::score("đau đầu", "Đau_đầu kéo_dài cần đi khám.");
        assert!(score > 0.0);
    }

    #[test]
    fn test_stopword_only_query_scores_zero() {
        assert_eq!(LexicalReranker::score("tôi bị gì vậy à", "tôi bị gì"), 0.0);
    }

    #[tokio::test]
    async fn test_lexical_rerank_orders_and_truncates() {
        let candidates = vec![
            candidate(1, "Lịch khám bệnh viện"),
            candidate(2, "Tiểu đường gây tê chân"),
            candidate(3, "Tê chân ở người tiểu đường do biến chứng thần kinh"),
        ];

        let ranked = LexicalReranker
            .rerank("tê chân tiểu đường biến chứng", &candidates, 2)
            .await
            .unwrap();
        let ids: Vec<_> = ranked.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[tokio::test]
    async fn test_equal_scores_break_ties_by_id() {
        let candidates = vec![candidate(9, "không liên quan"), candidate(4, "cũng không")];
        let ranked = LexicalReranker.rerank("sốt xuất huyết", &candidates, 5).await.unwrap();
        assert_eq!(ranked.iter().map(|c| c.id).collect::<Vec<_>>(), vec![4, 9]);
    }

    #[test]
    fn test_scores_by_index() {
        let scores = HttpReranker::scores_by_index(
            3,
            vec![
                RerankScore { index: 2, score: 0.9 },
                RerankScore { index: 0, score: 0.1 },
                RerankScore { index: 1, score: 0.4 },
            ],
        )
        .unwrap();
        assert_eq!(scores, vec![0.1, 0.4, 0.9]);

        let missing = HttpReranker::scores_by_index(2, vec![RerankScore { index: 0, score: 0.1 }]);
        assert!(matches!(missing, Err(RagError::Rerank(_))));

        let out_of_range = HttpReranker::scores_by_index(1, vec![RerankScore { index: 3, score: 0.1 }]);
        assert!(matches!(out_of_range, Err(RagError::Rerank(_))));
    }

    #[test]
    fn test_response_format() {
        let raw = r#"[{"index": 1, "score": 0.98}, {"index": 0, "score": 0.02}]"#;
        let parsed: Vec<RerankScore> = serde_json::from_str(raw).unwrap();
        let scores = HttpReranker::scores_by_index(2, parsed).unwrap();
        let ranked = apply_scores(&[candidate(5, "a"), candidate(6, "b")], &scores, 2);
        assert_eq!(ranked[0].id, 6);
        assert_eq!(ranked[0].score, 0.98);
    }

    #[tokio::test]
    async fn test_http_reranker_unreachable() {
        let reranker = HttpReranker::new(HttpRerankerConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();

        let err = reranker
            .rerank("ho", &[candidate(1, "ho khan")], 1)
            .await
            .unwrap_err();
        assert!(err.is_collaborator_unavailable());

        // nothing to score: no request is made
        assert!(reranker.rerank("ho", &[], 1).await.unwrap().is_empty());
    }
}
