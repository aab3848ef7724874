//! BM25 inverted index
//!
//! Okapi BM25 with the `ln((N - df + 0.5) / (df + 0.5) + 1)` IDF. IDF is
//! never clamped. The index is pure math over terms: tokenization is done by
//! an [`Analyzer`] supplied by the caller, and content lives elsewhere.
//!
//! Snapshots are JSON:
//!
//! ```json
//! {
//!   "meta": {"N": 2, "avg_doc_len": 4.0, "k1": 1.5, "b": 0.75},
//!   "doc_len": {"1": 4, "2": 4},
//!   "idf": {"đau": 0.693},
//!   "postings": {"đau": {"1": 1}}
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use medqa_config::constants::bm25 as defaults;
use medqa_core::{Document, DocumentId};

use crate::text::Analyzer;
use crate::RagError;

/// BM25 free parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: defaults::K1,
            b: defaults::B,
        }
    }
}

impl From<&medqa_config::Bm25Settings> for Bm25Params {
    fn from(settings: &medqa_config::Bm25Settings) -> Self {
        Self {
            k1: settings.k1,
            b: settings.b,
        }
    }
}

/// `ln((N - df + 0.5) / (df + 0.5) + 1)`
pub fn idf(n: usize, df: usize) -> f64 {
    let n = n as f64;
    let df = df as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Contribution of one term occurrence count to a document score
pub fn term_score(idf: f64, tf: u32, doc_len: usize, avg_doc_len: f64, params: Bm25Params) -> f64 {
    let tf = tf as f64;
    let length_ratio = if avg_doc_len > 0.0 {
        doc_len as f64 / avg_doc_len
    } else {
        0.0
    };
    let denom = tf + params.k1 * (1.0 - params.b + params.b * length_ratio);
    idf * (tf * (params.k1 + 1.0)) / denom
}

/// Snapshot scalars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(rename = "N")]
    pub n: usize,
    pub avg_doc_len: f64,
    pub k1: f64,
    pub b: f64,
}

/// Persisted form of the index; ids become JSON string keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Snapshot {
    pub meta: SnapshotMeta,
    pub doc_len: BTreeMap<DocumentId, usize>,
    pub idf: BTreeMap<String, f64>,
    pub postings: BTreeMap<String, BTreeMap<DocumentId, u32>>,
}

/// In-memory BM25 index
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    params: Bm25Params,
    n: usize,
    avg_doc_len: f64,
    doc_len: HashMap<DocumentId, usize>,
    postings: HashMap<String, HashMap<DocumentId, u32>>,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    /// Empty index
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// Batch build from a corpus
    pub fn build(
        documents: &[Document],
        analyzer: &dyn Analyzer,
        params: Bm25Params,
    ) -> Result<Self, RagError> {
        let mut index = Self::new(params);
        index.add_documents(documents, analyzer)?;
        tracing::info!(
            docs = index.n,
            vocabulary = index.postings.len(),
            avg_doc_len = index.avg_doc_len,
            analyzer = analyzer.name(),
            "BM25 index built"
        );
        Ok(index)
    }

    /// Index documents not seen before; returns how many were added
    ///
    /// Ids already in the index are skipped silently. The whole batch is
    /// analyzed before anything is committed, so an analyzer error leaves the
    /// index untouched. `avg_doc_len` and the whole IDF table are recomputed
    /// afterwards.
    pub fn add_documents(
        &mut self,
        documents: &[Document],
        analyzer: &dyn Analyzer,
    ) -> Result<usize, RagError> {
        let mut batch_ids = HashSet::new();
        let mut analyzed: Vec<(DocumentId, Vec<String>)> = Vec::new();

        for doc in documents {
            if self.doc_len.contains_key(&doc.id) || !batch_ids.insert(doc.id) {
                tracing::debug!(id = doc.id, "Skipping already indexed document");
                continue;
            }
            analyzed.push((doc.id, analyzer.analyze(&doc.content)?));
        }

        let mut total_len: usize = self.doc_len.values().sum();
        let added = analyzed.len();

        for (id, terms) in analyzed {
            self.doc_len.insert(id, terms.len());
            total_len += terms.len();

            let mut tf: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *tf.entry(term).or_insert(0) += 1;
            }
            for (term, count) in tf {
                self.postings.entry(term).or_default().insert(id, count);
            }
        }

        self.n += added;
        self.avg_doc_len = if self.n > 0 {
            total_len as f64 / self.n as f64
        } else {
            0.0
        };
        self.recompute_idf();

        Ok(added)
    }

    fn recompute_idf(&mut self) {
        let n = self.n;
        self.idf = self
            .postings
            .iter()
            .map(|(term, docs)| (term.clone(), idf(n, docs.len())))
            .collect();
    }

    /// Score one document; terms absent from the index or the document add nothing
    ///
    /// Repeated query terms count once per occurrence.
    pub fn score(&self, terms: &[String], doc_id: DocumentId) -> f64 {
        let dl = self.doc_len.get(&doc_id).copied().unwrap_or(0);

        terms
            .iter()
            .filter_map(|term| {
                let tf = *self.postings.get(term)?.get(&doc_id)?;
                let idf = self.idf.get(term).copied().unwrap_or(0.0);
                Some(term_score(idf, tf, dl, self.avg_doc_len, self.params))
            })
            .sum()
    }

    /// Rank documents for already-analyzed query terms
    ///
    /// Candidates are the union of the terms' posting lists. Only strictly
    /// positive scores are kept; order is score descending, then id ascending.
    pub fn search_terms(&self, terms: &[String], limit: usize) -> Vec<(DocumentId, f64)> {
        let candidates: HashSet<DocumentId> = terms
            .iter()
            .filter_map(|term| self.postings.get(term))
            .flat_map(|docs| docs.keys().copied())
            .collect();

        let mut scored: Vec<(DocumentId, f64)> = candidates
            .into_iter()
            .map(|id| (id, self.score(terms, id)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }

    /// Analyze `query` and rank documents
    pub fn search(
        &self,
        query: &str,
        analyzer: &dyn Analyzer,
        limit: usize,
    ) -> Result<Vec<(DocumentId, f64)>, RagError> {
        let terms = analyzer.analyze(query)?;
        Ok(self.search_terms(&terms, limit))
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn avg_doc_len(&self) -> f64 {
        self.avg_doc_len
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn vocabulary_size(&self) -> usize {
        self.postings.len()
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.doc_len.contains_key(&id)
    }

    pub fn doc_len(&self, id: DocumentId) -> Option<usize> {
        self.doc_len.get(&id).copied()
    }

    pub fn idf_of(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    pub fn to_snapshot(&self) -> Bm25Snapshot {
        Bm25Snapshot {
            meta: SnapshotMeta {
                n: self.n,
                avg_doc_len: self.avg_doc_len,
                k1: self.params.k1,
                b: self.params.b,
            },
            doc_len: self.doc_len.iter().map(|(k, v)| (*k, *v)).collect(),
            idf: self.idf.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            postings: self
                .postings
                .iter()
                .map(|(term, docs)| {
                    (
                        term.clone(),
                        docs.iter().map(|(k, v)| (*k, *v)).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Restore an index; stored scalars and IDF are taken as-is
    pub fn from_snapshot(snapshot: Bm25Snapshot) -> Result<Self, RagError> {
        for (term, docs) in &snapshot.postings {
            if let Some(id) = docs.keys().find(|id| !snapshot.doc_len.contains_key(id)) {
                return Err(RagError::Index(format!(
                    "posting for term '{}' references document {} missing from doc_len",
                    term, id
                )));
            }
        }

        Ok(Self {
            params: Bm25Params {
                k1: snapshot.meta.k1,
                b: snapshot.meta.b,
            },
            n: snapshot.meta.n,
            avg_doc_len: snapshot.meta.avg_doc_len,
            doc_len: snapshot.doc_len.into_iter().collect(),
            idf: snapshot.idf.into_iter().collect(),
            postings: snapshot
                .postings
                .into_iter()
                .map(|(term, docs)| (term, docs.into_iter().collect()))
                .collect(),
        })
    }

    /// Write the snapshot, replacing `path` atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RagError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(fs::File::create(&tmp_path)?);
            serde_json::to_writer_pretty(&mut writer, &self.to_snapshot())?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, path)?;

        tracing::info!(path = %path.display(), docs = self.n, "BM25 index saved");
        Ok(())
    }

    /// Read a snapshot written by [`Bm25Index::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RagError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RagError::NotFound(format!(
                "Index file not found: {}",
                path.display()
            )));
        }

        let reader = BufReader::new(fs::File::open(path)?);
        let snapshot: Bm25Snapshot = serde_json::from_reader(reader)?;
        let index = Self::from_snapshot(snapshot)?;

        tracing::info!(
            path = %path.display(),
            docs = index.n,
            vocabulary = index.postings.len(),
            "BM25 index loaded"
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::WordAnalyzer;

    fn corpus() -> Vec<Document> {
        vec![
            Document::new(1, "đau đầu chóng mặt", "neurology"),
            Document::new(2, "công thức làm bánh", "cooking"),
        ]
    }

    fn build(docs: &[Document]) -> Bm25Index {
        Bm25Index::build(docs, &WordAnalyzer, Bm25Params::default()).unwrap()
    }

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_build_statistics() {
        let index = build(&corpus());
        assert_eq!(index.len(), 2);
        assert_eq!(index.avg_doc_len(), 4.0);
        assert_eq!(index.doc_len(1), Some(4));
        assert_eq!(index.idf_of("đau"), Some(idf(2, 1)));
        assert!((idf(2, 1) - (1.5f64 / 1.5 + 1.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_search_returns_matching_document_only() {
        let index = build(&corpus());
        let results = index.search("đau đầu", &WordAnalyzer, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 1);
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_scores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.json");

        let index = build(&corpus());
        let before = index.search("đau đầu", &WordAnalyzer, 10).unwrap();
        index.save(&path).unwrap();

        let loaded = Bm25Index::load(&path).unwrap();
        let after = loaded.search("đau đầu", &WordAnalyzer, 10).unwrap();

        assert_eq!(after, before);
        assert_eq!(after[0].1.to_bits(), before[0].1.to_bits());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.params(), Bm25Params::default());
    }

    #[test]
    fn test_snapshot_format_uses_string_ids() {
        let index = build(&corpus());
        let json = serde_json::to_value(index.to_snapshot()).unwrap();

        assert_eq!(json["meta"]["N"], 2);
        assert_eq!(json["meta"]["k1"], 1.5);
        assert_eq!(json["doc_len"]["1"], 4);
        assert_eq!(json["postings"]["bánh"]["2"], 1);
        assert!(json["idf"]["chóng"].is_f64());
    }

    #[test]
    fn test_load_does_not_recompute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.json");
        let raw = r#"{
            "meta": {"N": 10, "avg_doc_len": 3.0, "k1": 1.2, "b": 0.5},
            "doc_len": {"4": 3},
            "idf": {"ho": 2.5},
            "postings": {"ho": {"4": 1}}
        }"#;
        std::fs::write(&path, raw).unwrap();

        let index = Bm25Index::load(&path).unwrap();
        assert_eq!(index.len(), 10);
        assert_eq!(index.avg_doc_len(), 3.0);
        assert_eq!(index.idf_of("ho"), Some(2.5));

        let params = Bm25Params { k1: 1.2, b: 0.5 };
        let expected = term_score(2.5, 1, 3, 3.0, params);
        assert_eq!(index.score(&terms(&["ho"]), 4), expected);
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let result = Bm25Index::load("/nonexistent/dir/bm25.json");
        assert!(matches!(result, Err(RagError::NotFound(_))));
    }

    #[test]
    fn test_load_rejects_dangling_posting() {
        let snapshot = Bm25Snapshot {
            meta: SnapshotMeta { n: 1, avg_doc_len: 1.0, k1: 1.5, b: 0.75 },
            doc_len: BTreeMap::from([(1, 1)]),
            idf: BTreeMap::from([("ho".to_string(), 0.5)]),
            postings: BTreeMap::from([("ho".to_string(), BTreeMap::from([(2, 1)]))]),
        };
        assert!(matches!(
            Bm25Index::from_snapshot(snapshot),
            Err(RagError::Index(_))
        ));
    }

    #[test]
    fn test_unknown_terms_return_empty() {
        let index = build(&corpus());
        assert!(index.search("ung thư phổi", &WordAnalyzer, 5).unwrap().is_empty());
        assert!(index.search("", &WordAnalyzer, 5).unwrap().is_empty());
    }

    #[test]
    fn test_score_monotonic_in_tf() {
        let params = Bm25Params::default();
        let idf = idf(100, 7);
        let mut previous = f64::MIN;
        for tf in 1..=30 {
            let score = term_score(idf, tf, 40, 42.3, params);
            assert!(score >= previous, "score dropped at tf={}", tf);
            previous = score;
        }
    }

    #[test]
    fn test_ties_broken_by_ascending_id() {
        let docs = vec![
            Document::new(7, "viêm họng", "ent"),
            Document::new(3, "viêm họng", "ent"),
            Document::new(5, "viêm xoang", "ent"),
        ];
        let index = build(&docs);
        let ids: Vec<_> = index
            .search("viêm họng", &WordAnalyzer, 10)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![3, 7, 5]);
    }

    #[test]
    fn test_limit_truncates() {
        let docs: Vec<_> = (1..=5)
            .map(|i| Document::new(i, "sốt cao", "general"))
            .collect();
        let index = build(&docs);
        assert_eq!(index.search("sốt", &WordAnalyzer, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_add_documents_skips_existing_and_recomputes() {
        let mut index = build(&corpus());
        let idf_before = index.idf_of("đau").unwrap();

        let added = index
            .add_documents(
                &[
                    Document::new(1, "nội dung khác hẳn", "ignored"),
                    Document::new(3, "đau bụng", "gastro"),
                ],
                &WordAnalyzer,
            )
            .unwrap();

        assert_eq!(added, 1);
        assert_eq!(index.len(), 3);
        assert_eq!(index.doc_len(1), Some(4));
        assert_eq!(index.avg_doc_len(), 10.0 / 3.0);
        // "đau" is now in 2 of 3 documents
        assert_eq!(index.idf_of("đau"), Some(idf(3, 2)));
        assert_ne!(index.idf_of("đau"), Some(idf_before));
        // terms untouched by the batch still get the new N
        assert_eq!(index.idf_of("bánh"), Some(idf(3, 1)));
        assert!(index.idf_of("khác").is_none());
    }

    #[test]
    fn test_add_documents_skips_duplicate_ids_within_batch() {
        let mut index = Bm25Index::new(Bm25Params::default());
        let added = index
            .add_documents(
                &[Document::new(9, "ho khan", "a"), Document::new(9, "ho có đờm", "b")],
                &WordAnalyzer,
            )
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(index.doc_len(9), Some(2));
    }

    #[test]
    fn test_idf_is_not_clamped() {
        // A term in every document keeps the raw formula value
        let docs = vec![
            Document::new(1, "bệnh tim", "cardio"),
            Document::new(2, "bệnh phổi", "pulmo"),
            Document::new(3, "bệnh gan", "hepato"),
        ];
        let index = build(&docs);
        let common = index.idf_of("bệnh").unwrap();
        assert_eq!(common, (0.5f64 / 3.5 + 1.0).ln());
        assert!(common < index.idf_of("tim").unwrap());

        // Negative stored IDF is used verbatim: the contribution is negative
        // and the document drops out of results
        let mut snapshot = index.to_snapshot();
        snapshot.idf.insert("bệnh".to_string(), -0.25);
        let index = Bm25Index::from_snapshot(snapshot).unwrap();
        assert!(index.score(&terms(&["bệnh"]), 1) < 0.0);
        assert!(index.search_terms(&terms(&["bệnh"]), 10).is_empty());

        let mixed = index.search_terms(&terms(&["bệnh", "tim"]), 10);
        assert_eq!(mixed.len(), 1);
        assert_eq!(mixed[0].0, 1);
    }

    struct RejectingAnalyzer;

    impl Analyzer for RejectingAnalyzer {
        fn tokenize(&self, normalized: &str) -> Result<Vec<String>, RagError> {
            if normalized.contains("lỗi") {
                return Err(RagError::Index("cannot analyze".to_string()));
            }
            WordAnalyzer.tokenize(normalized)
        }

        fn name(&self) -> &str {
            "rejecting"
        }
    }

    #[test]
    fn test_failed_batch_leaves_index_untouched() {
        let mut index = Bm25Index::build(&corpus(), &RejectingAnalyzer, Bm25Params::default()).unwrap();
        let before = index.to_snapshot();

        let result = index.add_documents(
            &[
                Document::new(3, "đau bụng", "gastro"),
                Document::new(4, "văn bản lỗi", "broken"),
            ],
            &RejectingAnalyzer,
        );

        assert!(matches!(result, Err(RagError::Index(_))));
        assert_eq!(index.to_snapshot(), before);
        assert!(!index.contains(3));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_empty_build() {
        let index = build(&[]);
        assert!(index.is_empty());
        assert_eq!(index.avg_doc_len(), 0.0);
        assert!(index.search("đau", &WordAnalyzer, 3).unwrap().is_empty());
    }
}
