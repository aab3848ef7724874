//! Default values shared by the settings layer and the runtime configs
//!
//! Runtime crates build their own `Default` impls from these so that a
//! component constructed without settings behaves like a default deployment.

/// BM25 lexical scoring
pub mod bm25 {
    /// Term-frequency saturation
    pub const K1: f64 = 1.5;

    /// Length normalization strength
    pub const B: f64 = 0.75;

    /// Snapshot written by `medqa index`
    pub const INDEX_PATH: &str = "data/bm25_index.json";
}

/// Hybrid retrieval and fusion
pub mod retrieval {
    /// Candidates requested from each retriever before fusion
    pub const POOL_SIZE: usize = 50;

    /// Reciprocal Rank Fusion smoothing constant
    pub const RRF_K: f64 = 60.0;

    /// Results kept after fusion for the first retrieval round
    pub const FINAL_TOP_K: usize = 3;

    /// Relevance/diversity balance for MMR
    pub const MMR_LAMBDA: f64 = 0.5;

    /// Pool fetched before MMR re-selection
    pub const MMR_FETCH_K: usize = 20;
}

/// Agentic sufficiency loop
pub mod agent {
    pub const MAX_ITERATIONS: usize = 2;

    /// Results requested per `retrieve_more_information` action
    pub const RETRIEVE_LIMIT: usize = 3;

    /// Chat messages considered when rewriting the question
    pub const REFLECTION_WINDOW: usize = 3;
}

/// Vector index
pub mod qdrant {
    pub const COLLECTION: &str = "ta_hospital";

    /// bge-m3 dense output size
    pub const VECTOR_DIM: usize = 1024;
}

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Ollama endpoint, used for both chat and embeddings
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";

    /// Qdrant gRPC endpoint
    pub const QDRANT_DEFAULT: &str = "http://127.0.0.1:6334";

    /// OpenAI-compatible chat completions (Groq)
    pub const OPENAI_COMPAT_DEFAULT: &str = "https://api.groq.com/openai/v1";

    /// Cross-encoder rerank server (text-embeddings-inference `/rerank`)
    pub const RERANKER_DEFAULT: &str = "http://localhost:8080";
}

/// Model names
pub mod models {
    pub const EMBEDDING: &str = "bge-m3";
    pub const LLM: &str = "llama-3.3-70b-versatile";
    pub const RERANKER: &str = "namdp-ptit/ViRanker";
}

/// Timeouts
pub mod timeouts {
    /// LLM request timeout (seconds)
    pub const LLM_REQUEST_SECS: u64 = 60;

    /// Embedding request timeout (seconds)
    pub const EMBEDDING_REQUEST_SECS: u64 = 30;

    /// Vector index request timeout (seconds)
    pub const QDRANT_REQUEST_SECS: u64 = 10;

    /// Rerank request timeout (seconds)
    pub const RERANK_REQUEST_SECS: u64 = 30;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bm25_defaults_in_range() {
        assert!(bm25::K1 >= 0.0);
        assert!((0.0..=1.0).contains(&bm25::B));
    }

    #[test]
    fn test_retrieval_defaults() {
        assert!(retrieval::RRF_K > 0.0);
        assert!(retrieval::POOL_SIZE >= retrieval::FINAL_TOP_K);
        assert!((0.0..=1.0).contains(&retrieval::MMR_LAMBDA));
    }
}
