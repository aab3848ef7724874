//! Vector index ingestion: embed corpus documents in batches and upsert them

use std::sync::Arc;
use std::time::Instant;

use medqa_core::Document;

use crate::embeddings::Embedder;
use crate::vector_store::VectorIndex;
use crate::RagError;

const DEFAULT_BATCH_SIZE: usize = 64;

/// Summary of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub upserted: usize,
    /// Documents with blank content, not sent to the embedder
    pub skipped: usize,
    pub batches: usize,
    pub elapsed_ms: u64,
}

pub struct VectorIngestor {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
}

impl VectorIngestor {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn ingest(&self, documents: &[Document]) -> Result<IngestReport, RagError> {
        let start = Instant::now();
        let (usable, blank): (Vec<&Document>, Vec<&Document>) = documents
            .iter()
            .partition(|doc| !doc.content.trim().is_empty());

        let mut report = IngestReport {
            skipped: blank.len(),
            ..Default::default()
        };

        for batch in usable.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if let Some(bad) = embeddings.iter().find(|e| e.len() != self.embedder.dim()) {
                return Err(RagError::Embedding(format!(
                    "Embedding dimension {} does not match expected {}",
                    bad.len(),
                    self.embedder.dim()
                )));
            }

            let batch_docs: Vec<Document> = batch.iter().map(|d| (*d).clone()).collect();
            self.index.upsert(&batch_docs, &embeddings).await?;

            report.upserted += batch_docs.len();
            report.batches += 1;
            tracing::info!(
                batch = report.batches,
                upserted = report.upserted,
                total = usable.len(),
                "Upserted batch"
            );
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }
}
