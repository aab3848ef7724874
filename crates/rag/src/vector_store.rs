//! Vector Store using Qdrant
//!
//! Dense vector storage and similarity search. Points are keyed by the
//! numeric document id and carry `{id, content, category, section}` payloads,
//! so the collection doubles as the document store for lexical hits.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use qdrant_client::{
    qdrant::{
        point_id::PointIdOptions, value::Kind, CreateCollectionBuilder, Distance,
        GetPointsBuilder, PointId, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value,
        VectorParamsBuilder,
    },
    Qdrant,
};

use medqa_config::constants::{endpoints, qdrant, timeouts};
use medqa_config::QdrantSettings;
use medqa_core::{Document, DocumentId};

use crate::embeddings::cosine_similarity;
use crate::store::DocumentStore;
use crate::RagError;

/// Vector store configuration
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    /// Qdrant endpoint
    pub endpoint: String,
    pub collection: String,
    pub vector_dim: usize,
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::QDRANT_DEFAULT.to_string(),
            collection: qdrant::COLLECTION.to_string(),
            vector_dim: qdrant::VECTOR_DIM,
            api_key: None,
            timeout: Duration::from_secs(timeouts::QDRANT_REQUEST_SECS),
        }
    }
}

impl From<&QdrantSettings> for VectorStoreConfig {
    fn from(settings: &QdrantSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            collection: settings.collection.clone(),
            vector_dim: settings.vector_dim,
            api_key: settings.api_key.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// One nearest-neighbour hit
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: DocumentId,
    /// Cosine similarity
    pub score: f64,
    pub content: String,
    pub category: String,
    pub section: Option<String>,
}

/// The vector index collaborator
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest neighbours of `vector`, best first
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, RagError>;

    /// Insert or replace points; `embeddings[i]` belongs to `documents[i]`
    async fn upsert(&self, documents: &[Document], embeddings: &[Vec<f32>])
        -> Result<(), RagError>;
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn payload_id(payload: &HashMap<String, Value>) -> Option<DocumentId> {
    match payload.get("id").and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => u64::try_from(*n).ok(),
        Some(Kind::StringValue(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Numeric point id, or the payload `id` for UUID-keyed points
fn resolve_id(point_id: Option<&PointId>, payload: &HashMap<String, Value>) -> Option<DocumentId> {
    match point_id.and_then(|p| p.point_id_options.as_ref()) {
        Some(PointIdOptions::Num(n)) => Some(*n),
        _ => payload_id(payload),
    }
}

fn document_from_payload(id: DocumentId, payload: &HashMap<String, Value>) -> Document {
    Document {
        id,
        // older collections stored the passage under "text"
        content: payload_string(payload, "content")
            .or_else(|| payload_string(payload, "text"))
            .unwrap_or_default(),
        category: payload_string(payload, "category").unwrap_or_default(),
        section: payload_string(payload, "section"),
    }
}

fn document_payload(doc: &Document) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert("id".to_string(), (doc.id as i64).into());
    payload.insert("content".to_string(), doc.content.clone().into());
    payload.insert("category".to_string(), doc.category.clone().into());
    if let Some(ref section) = doc.section {
        payload.insert("section".to_string(), section.clone().into());
    }
    payload
}

/// Qdrant client bound to one collection
pub struct QdrantStore {
    client: Qdrant,
    config: VectorStoreConfig,
}

impl QdrantStore {
    /// Create a client; no request is made yet
    pub fn new(config: VectorStoreConfig) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint).timeout(config.timeout);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("Qdrant connection using API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Connect for querying; a missing collection is a configuration error
    pub async fn connect(config: VectorStoreConfig) -> Result<Self, RagError> {
        let store = Self::new(config)?;
        store.verify_collection().await?;
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    pub async fn verify_collection(&self) -> Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        if !exists {
            return Err(RagError::Configuration(format!(
                "Qdrant collection '{}' does not exist at {}",
                self.config.collection, self.config.endpoint
            )));
        }

        tracing::info!(collection = %self.config.collection, "Qdrant collection verified");
        Ok(())
    }

    /// Create the collection (cosine, configured dimension) if missing
    pub async fn ensure_collection(&self) -> Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(self.config.vector_dim as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| RagError::VectorStore(e.to_string()))?;
            tracing::info!(
                collection = %self.config.collection,
                dim = self.config.vector_dim,
                "Qdrant collection created"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, RagError> {
        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.config.collection, vector.to_vec(), limit as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        let hits = results
            .result
            .into_iter()
            .filter_map(|point| {
                let Some(id) = resolve_id(point.id.as_ref(), &point.payload) else {
                    tracing::warn!(point = ?point.id, "Skipping point without a numeric document id");
                    return None;
                };
                let doc = document_from_payload(id, &point.payload);
                Some(VectorHit {
                    id,
                    score: point.score as f64,
                    content: doc.content,
                    category: doc.category,
                    section: doc.section,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn upsert(
        &self,
        documents: &[Document],
        embeddings: &[Vec<f32>],
    ) -> Result<(), RagError> {
        if documents.len() != embeddings.len() {
            return Err(RagError::VectorStore(
                "Document and embedding count mismatch".to_string(),
            ));
        }

        let points: Vec<PointStruct> = documents
            .iter()
            .zip(embeddings.iter())
            .map(|(doc, emb)| PointStruct::new(doc.id, emb.clone(), document_payload(doc)))
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.config.collection, points).wait(true))
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for QdrantStore {
    async fn fetch(&self, ids: &[DocumentId]) -> Result<Vec<Document>, RagError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(*id)).collect();
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.config.collection, point_ids).with_payload(true),
            )
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = resolve_id(point.id.as_ref(), &point.payload)?;
                Some(document_from_payload(id, &point.payload))
            })
            .collect())
    }
}

/// Brute-force cosine index held in memory
#[derive(Default)]
pub struct InMemoryVectorIndex {
    points: RwLock<HashMap<DocumentId, (Document, Vec<f32>)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, RagError> {
        let points = self.points.read();
        let mut hits: Vec<VectorHit> = points
            .values()
            .map(|(doc, emb)| VectorHit {
                id: doc.id,
                score: cosine_similarity(vector, emb),
                content: doc.content.clone(),
                category: doc.category.clone(),
                section: doc.section.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn upsert(
        &self,
        documents: &[Document],
        embeddings: &[Vec<f32>],
    ) -> Result<(), RagError> {
        if documents.len() != embeddings.len() {
            return Err(RagError::VectorStore(
                "Document and embedding count mismatch".to_string(),
            ));
        }
        let mut points = self.points.write();
        for (doc, emb) in documents.iter().zip(embeddings.iter()) {
            points.insert(doc.id, (doc.clone(), emb.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryVectorIndex {
    async fn fetch(&self, ids: &[DocumentId]) -> Result<Vec<Document>, RagError> {
        let points = self.points.read();
        Ok(ids
            .iter()
            .filter_map(|id| points.get(id).map(|(doc, _)| doc.clone()))
            .collect())
    }
}
