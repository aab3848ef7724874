//! Wiring of collaborators from settings

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use medqa_config::{AnalyzerKind, EmbeddingProvider, RerankerProvider, Settings};
use medqa_rag::{
    Analyzer, Bm25Retriever, DenseRetriever, DocumentStore, Embedder, EmbeddingConfig,
    HttpReranker, HttpRerankerConfig, HybridRetriever, InMemoryVectorIndex, KnowledgeLoader,
    LexicalReranker, MmrConfig, MmrRetriever, OllamaEmbedder, OllamaEmbeddingConfig, QdrantStore,
    Reranker, Retriever, RetrieverConfig, SimpleEmbedder, SubwordAnalyzer, VectorIndex,
    VectorIngestor, VectorStoreConfig, WordAnalyzer,
};

use crate::args::Mode;

pub fn analyzer(settings: &Settings) -> Result<Arc<dyn Analyzer>> {
    let analyzer: Arc<dyn Analyzer> = match settings.bm25.analyzer {
        AnalyzerKind::Word => Arc::new(WordAnalyzer),
        AnalyzerKind::Subword => {
            let path = settings
                .bm25
                .tokenizer_path
                .as_deref()
                .context("bm25.tokenizer_path is required for the subword analyzer")?;
            Arc::new(SubwordAnalyzer::from_file(path)?)
        }
    };
    Ok(analyzer)
}

pub fn embedder(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    let dim = settings.qdrant.vector_dim;
    let embedder: Arc<dyn Embedder> = match settings.embedding.provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
            OllamaEmbeddingConfig::from_settings(&settings.embedding, dim),
        )?),
        EmbeddingProvider::Hash => Arc::new(SimpleEmbedder::new(EmbeddingConfig {
            embedding_dim: dim,
            normalize: true,
        })),
    };
    Ok(embedder)
}

pub fn reranker(settings: &Settings) -> Result<Arc<dyn Reranker>> {
    let reranker: Arc<dyn Reranker> = match settings.reranker.provider {
        RerankerProvider::Lexical => Arc::new(LexicalReranker),
        RerankerProvider::Http => Arc::new(HttpReranker::new(HttpRerankerConfig::from(
            &settings.reranker,
        ))?),
    };
    Ok(reranker)
}

/// Document and vector backends used at query time
pub struct Backends {
    pub store: Arc<dyn DocumentStore>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
}

impl Backends {
    /// Qdrant, or an in-memory index built from `corpus` when given
    pub async fn connect(settings: &Settings, corpus: Option<&Path>) -> Result<Self> {
        let embedder = embedder(settings)?;

        match corpus {
            Some(path) => {
                let documents = KnowledgeLoader::load(path)?;
                let memory = Arc::new(InMemoryVectorIndex::new());
                let report = VectorIngestor::new(embedder.clone(), memory.clone())
                    .ingest(&documents)
                    .await?;
                tracing::info!(documents = report.upserted, "Serving corpus from memory");
                Ok(Self {
                    store: memory.clone(),
                    index: memory,
                    embedder,
                })
            }
            None => {
                let qdrant = Arc::new(
                    QdrantStore::connect(VectorStoreConfig::from(&settings.qdrant))
                        .await
                        .context("vector index unavailable")?,
                );
                Ok(Self {
                    store: qdrant.clone(),
                    index: qdrant,
                    embedder,
                })
            }
        }
    }
}

/// Lexical retriever with the configured snapshot loaded
pub fn lexical(settings: &Settings, store: Arc<dyn DocumentStore>) -> Result<Arc<Bm25Retriever>> {
    let retriever = Bm25Retriever::new(analyzer(settings)?, store);
    retriever
        .load(&settings.bm25.index_path)
        .with_context(|| format!("cannot load BM25 snapshot {}", settings.bm25.index_path))?;
    Ok(Arc::new(retriever))
}

pub fn retriever(settings: &Settings, backends: &Backends, mode: Mode) -> Result<Arc<dyn Retriever>> {
    let dense = || {
        Arc::new(DenseRetriever::new(
            backends.embedder.clone(),
            backends.index.clone(),
        ))
    };

    let retriever: Arc<dyn Retriever> = match mode {
        Mode::Lexical => lexical(settings, backends.store.clone())?,
        Mode::Dense => dense(),
        Mode::Hybrid => Arc::new(HybridRetriever::new(
            lexical(settings, backends.store.clone())?,
            dense(),
            RetrieverConfig::from(&settings.retrieval),
        )),
        Mode::Mmr => Arc::new(MmrRetriever::new(
            dense(),
            MmrConfig::from(&settings.retrieval),
        )?),
    };
    Ok(retriever)
}
