//! Subcommand handlers

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use medqa_agent::prompts::SUFFICIENCY_PROMPT;
use medqa_agent::{AcceptAll, AnswerPipeline, QueryGate, Reflector, SemanticGate};
use medqa_config::Settings;
use medqa_core::Candidate;
use medqa_llm::LlmFactory;
use medqa_rag::{
    Bm25Index, Bm25Params, HybridRetriever, KnowledgeLoader, QdrantStore, RetrieverConfig,
    SufficiencyConfig, SufficiencyLoop, VectorIngestor, VectorStoreConfig,
};

use crate::args::Mode;
use crate::components::{self, Backends};

pub fn index(
    settings: &Settings,
    corpus: &Path,
    output: Option<PathBuf>,
    k1: Option<f64>,
    b: Option<f64>,
) -> Result<()> {
    let output = output.unwrap_or_else(|| PathBuf::from(&settings.bm25.index_path));
    let params = Bm25Params {
        k1: k1.unwrap_or(settings.bm25.k1),
        b: b.unwrap_or(settings.bm25.b),
    };
    let analyzer = components::analyzer(settings)?;
    let documents = KnowledgeLoader::load(corpus)?;

    let index = Bm25Index::build(&documents, analyzer.as_ref(), params)?;
    index.save(&output)?;

    tracing::info!(
        docs = index.len(),
        vocabulary = index.vocabulary_size(),
        avg_doc_len = index.avg_doc_len(),
        output = %output.display(),
        "BM25 snapshot written"
    );
    println!("Indexed {} documents into {}", index.len(), output.display());
    Ok(())
}

pub fn add(settings: &Settings, corpus: &Path, index_path: Option<PathBuf>) -> Result<()> {
    let index_path = index_path.unwrap_or_else(|| PathBuf::from(&settings.bm25.index_path));
    let analyzer = components::analyzer(settings)?;
    let documents = KnowledgeLoader::load(corpus)?;

    let mut index = Bm25Index::load(&index_path)
        .with_context(|| format!("cannot load BM25 snapshot {}", index_path.display()))?;
    let added = index.add_documents(&documents, analyzer.as_ref())?;
    index.save(&index_path)?;

    println!(
        "Added {} of {} documents ({} already indexed); index now holds {}",
        added,
        documents.len(),
        documents.len() - added,
        index.len()
    );
    Ok(())
}

pub async fn upload(settings: &Settings, corpus: &Path, batch_size: usize) -> Result<()> {
    let documents = KnowledgeLoader::load(corpus)?;
    let embedder = components::embedder(settings)?;
    let store = Arc::new(QdrantStore::new(VectorStoreConfig::from(&settings.qdrant))?);
    store.ensure_collection().await?;

    let report = VectorIngestor::new(embedder, store.clone())
        .with_batch_size(batch_size)
        .ingest(&documents)
        .await?;

    println!(
        "Upserted {} documents into '{}' in {} batches ({} skipped, {} ms)",
        report.upserted,
        store.collection(),
        report.batches,
        report.skipped,
        report.elapsed_ms
    );
    Ok(())
}

pub async fn query(
    settings: &Settings,
    text: &str,
    limit: Option<usize>,
    mode: Mode,
    corpus: Option<&Path>,
    json: bool,
) -> Result<()> {
    let backends = Backends::connect(settings, corpus).await?;
    let retriever = components::retriever(settings, &backends, mode)?;
    let limit = limit.unwrap_or(settings.retrieval.final_top_k);

    let candidates = retriever.search(text, limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
    } else {
        print_candidates(&candidates);
    }
    Ok(())
}

pub async fn ask(
    settings: &Settings,
    question: &str,
    corpus: Option<&Path>,
    show_evidence: bool,
) -> Result<()> {
    let backends = Backends::connect(settings, corpus).await?;
    let llm = LlmFactory::create(&settings.llm)?;

    let lexical = components::lexical(settings, backends.store.clone())?;
    let dense = components::retriever(settings, &backends, Mode::Dense)?;
    let hybrid = Arc::new(HybridRetriever::new(
        lexical,
        dense,
        RetrieverConfig::from(&settings.retrieval),
    ));

    let sufficiency = SufficiencyLoop::new(
        llm.clone(),
        hybrid.clone(),
        SufficiencyConfig::from(&settings.agent).with_system_prompt(SUFFICIENCY_PROMPT),
    );

    let gate: Arc<dyn QueryGate> = match settings.agent.routes_path {
        Some(ref path) => Arc::new(SemanticGate::from_file(backends.embedder.clone(), path).await?),
        None => Arc::new(AcceptAll),
    };

    let mut pipeline = AnswerPipeline::new(llm.clone(), hybrid, sufficiency)
        .with_gate(gate)
        .with_initial_top_k(settings.retrieval.final_top_k);
    if settings.agent.reflection_enabled {
        pipeline = pipeline
            .with_reflector(Reflector::new(llm).with_window(settings.agent.reflection_window));
    }
    if settings.agent.rerank_enabled {
        pipeline = pipeline.with_reranker(components::reranker(settings)?);
    }

    let answer = pipeline.ask(question).await?;

    if show_evidence {
        println!(
            "route: {}  sufficient: {}  iterations: {}",
            answer.route.as_str(),
            answer.sufficient,
            answer.iterations
        );
        print_candidates(&answer.evidence);
        println!();
    }
    println!("{}", answer.text);
    Ok(())
}

fn print_candidates(candidates: &[Candidate]) {
    if candidates.is_empty() {
        println!("(no results)");
        return;
    }
    for (rank, c) in candidates.iter().enumerate() {
        let preview: String = c.content.chars().take(120).collect();
        println!("{:>2}. [{}] {:.4} ({}) {}", rank + 1, c.id, c.score, c.category, preview);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_corpus(dir: &Path, name: &str, json: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_index_then_add() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("data/bm25.json");
        let first = write_corpus(
            dir.path(),
            "first.json",
            r#"[{"id": 1, "content": "đau đầu chóng mặt", "category": "neurology"},
                {"id": 2, "content": "ho khan kéo dài", "category": "respiratory"}]"#,
        );
        let second = write_corpus(
            dir.path(),
            "second.json",
            r#"[{"id": 2, "content": "ho khan kéo dài", "category": "respiratory"},
                {"id": 3, "content": "đau bụng", "category": "gastro"}]"#,
        );
        let settings = Settings::default();

        index(&settings, &first, Some(snapshot.clone()), Some(1.2), None).unwrap();
        let built = Bm25Index::load(&snapshot).unwrap();
        assert_eq!(built.len(), 2);
        assert_eq!(built.params().k1, 1.2);
        assert_eq!(built.params().b, settings.bm25.b);

        add(&settings, &second, Some(snapshot.clone())).unwrap();
        let extended = Bm25Index::load(&snapshot).unwrap();
        assert_eq!(extended.len(), 3);
        assert!(extended.contains(3));
    }

    #[test]
    fn test_add_requires_existing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = write_corpus(
            dir.path(),
            "c.json",
            r#"[{"id": 1, "content": "sốt", "category": "general"}]"#,
        );
        let result = add(&Settings::default(), &corpus, Some(dir.path().join("missing.json")));
        assert!(result.is_err());
    }
}
