//! Retrieval for the medical QA assistant
//!
//! Features:
//! - Exact BM25 lexical index with JSON snapshots
//! - Dense vector search via Qdrant
//! - Hybrid fusion with Reciprocal Rank Fusion
//! - MMR diversity re-selection
//! - Evidence reranking (term overlap or an HTTP cross-encoder)
//! - Agentic sufficiency loop driven by an LLM verdict
//! - Vietnamese-aware text normalization and pluggable analyzers

pub mod agentic;
pub mod bm25;
pub mod dense;
pub mod embeddings;
pub mod ingest;
pub mod knowledge_loader;
pub mod mmr;
pub mod reranker;
pub mod ollama_embeddings;
pub mod retriever;
pub mod sparse_search;
pub mod store;
pub mod text;
pub mod vector_store;

pub use agentic::{
    parse_action, ActionDirective, ActionKind, LoopOutcome, LoopState, SufficiencyConfig,
    SufficiencyLoop, Termination,
};
pub use bm25::{Bm25Index, Bm25Params, Bm25Snapshot};
pub use dense::DenseRetriever;
pub use embeddings::{Embedder, EmbeddingConfig, SimpleEmbedder};
pub use ingest::{IngestReport, VectorIngestor};
pub use knowledge_loader::KnowledgeLoader;
pub use mmr::{MmrConfig, MmrRetriever};
pub use reranker::{HttpReranker, HttpRerankerConfig, LexicalReranker, Reranker};
pub use ollama_embeddings::{OllamaEmbedder, OllamaEmbeddingConfig};
pub use retriever::{rrf_fuse, HybridRetriever, RetrieverConfig};
pub use sparse_search::Bm25Retriever;
pub use store::{DocumentStore, InMemoryStore};
pub use text::{normalize, Analyzer, SubwordAnalyzer, WordAnalyzer};
pub use vector_store::{InMemoryVectorIndex, QdrantStore, VectorHit, VectorIndex, VectorStoreConfig};

use async_trait::async_trait;
use medqa_core::Candidate;
use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    /// Lexical search attempted before an index was built or loaded
    #[error("Index not ready: {0}")]
    NotReady(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Rerank error: {0}")]
    Rerank(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RagError {
    /// Failures of an external collaborator (embedder, vector index, LLM, reranker)
    pub fn is_collaborator_unavailable(&self) -> bool {
        matches!(
            self,
            RagError::Embedding(_)
                | RagError::VectorStore(_)
                | RagError::Llm(_)
                | RagError::Rerank(_)
        )
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Serialization(err.to_string())
    }
}

impl From<medqa_llm::LlmError> for RagError {
    fn from(err: medqa_llm::LlmError) -> Self {
        RagError::Llm(err.to_string())
    }
}

impl From<RagError> for medqa_core::Error {
    fn from(err: RagError) -> Self {
        medqa_core::Error::Rag(err.to_string())
    }
}

/// A ranked search over the corpus
///
/// Lexical, dense, hybrid and MMR retrievers all implement this; composite
/// retrievers hold their parts as `Arc<dyn Retriever>`.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Top `limit` candidates for `query`, best first
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>, RagError>;

    /// Short name for logs
    fn name(&self) -> &str;
}
