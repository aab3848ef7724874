//! Corpus documents and retrieval candidates

use serde::{Deserialize, Serialize};

/// Stable document identifier shared by the lexical index and the vector index
pub type DocumentId = u64;

/// A corpus passage
///
/// Documents are immutable once indexed; the corpus only grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(alias = "text")]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Document {
    pub fn new(id: DocumentId, content: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            category: category.into(),
            section: None,
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

/// A retrieval result
///
/// Candidates are produced fresh per query. The score is the producing
/// retriever's native score (BM25, cosine, or fused RRF).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: DocumentId,
    pub category: String,
    pub content: String,
    pub score: f64,
    /// Only populated when the caller asked for vectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Candidate {
    pub fn from_document(doc: &Document, score: f64) -> Self {
        Self {
            id: doc.id,
            category: doc.category.clone(),
            content: doc.content.clone(),
            score,
            embedding: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }
}

/// Sort descending by score, ties broken by ascending id
pub fn sort_by_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_by_score_ties_on_id() {
        let doc = Document::new(0, "x", "c");
        let mut candidates = vec![
            Candidate { id: 9, ..Candidate::from_document(&doc, 1.0) },
            Candidate { id: 3, ..Candidate::from_document(&doc, 1.0) },
            Candidate { id: 5, ..Candidate::from_document(&doc, 2.0) },
        ];
        sort_by_score(&mut candidates);
        let ids: Vec<_> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[test]
    fn test_document_deserialize_defaults() {
        let doc: Document = serde_json::from_str(r#"{"id": 7, "content": "ho khan"}"#).unwrap();
        assert_eq!(doc.id, 7);
        assert_eq!(doc.category, "");
        assert!(doc.section.is_none());
    }
}
