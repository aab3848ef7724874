//! Medical gate: decides whether a question goes through retrieval
//!
//! [`SemanticGate`] compares the question embedding with sample utterances
//! per route and picks the best-scoring route.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use medqa_rag::embeddings::cosine_similarity;
use medqa_rag::Embedder;

use crate::AgentError;

/// Route name that enables retrieval
pub const MEDICAL_ROUTE: &str = "medical";

/// Similarity above which a sample counts as a near-duplicate of the query
const EXACT_MATCH: f64 = 0.95;
/// Similarities above this are squared before averaging
const STRONG_MATCH: f64 = 0.75;
const TOP_SAMPLES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Medical,
    Chitchat,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Medical => "medical",
            Route::Chitchat => "chitchat",
        }
    }
}

#[async_trait]
pub trait QueryGate: Send + Sync {
    async fn classify(&self, question: &str) -> Result<Route, AgentError>;
}

/// Sends everything to retrieval
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl QueryGate for AcceptAll {
    async fn classify(&self, _question: &str) -> Result<Route, AgentError> {
        Ok(Route::Medical)
    }
}

#[derive(Debug, Deserialize)]
struct RouteFile {
    routes: BTreeMap<String, Vec<String>>,
}

/// Embedding-similarity router over sample utterances
pub struct SemanticGate {
    embedder: Arc<dyn Embedder>,
    routes: Vec<(String, Vec<Vec<f32>>)>,
}

impl SemanticGate {
    /// Embed every sample up front
    pub async fn from_samples(
        embedder: Arc<dyn Embedder>,
        samples: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, AgentError> {
        let mut routes = Vec::with_capacity(samples.len());
        for (name, utterances) in samples {
            if utterances.is_empty() {
                continue;
            }
            let vectors = embedder.embed_batch(&utterances).await?;
            tracing::info!(route = %name, samples = vectors.len(), "Route samples embedded");
            routes.push((name, vectors));
        }

        if routes.is_empty() {
            return Err(AgentError::Configuration(
                "Semantic gate needs at least one route with samples".to_string(),
            ));
        }
        Ok(Self { embedder, routes })
    }

    /// Load `{routes: {name: [samples]}}` from YAML or JSON
    pub async fn from_file(
        embedder: Arc<dyn Embedder>,
        path: impl AsRef<Path>,
    ) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Configuration(format!("Cannot read routes {}: {}", path.display(), e))
        })?;

        let file: RouteFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| AgentError::Configuration(format!("Invalid routes JSON: {}", e)))?,
            _ => serde_yaml::from_str(&content)
                .map_err(|e| AgentError::Configuration(format!("Invalid routes YAML: {}", e)))?,
        };

        Self::from_samples(embedder, file.routes).await
    }

    /// Best route name and its score
    pub async fn guide(&self, question: &str) -> Result<(String, f64), AgentError> {
        if question.trim().is_empty() {
            return Err(AgentError::EmptyQuestion);
        }
        let query = self.embedder.embed(question).await?;

        let mut best: Option<(&str, f64)> = None;
        for (name, samples) in &self.routes {
            let score = route_score(&query, samples);
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((name.as_str(), score));
            }
        }

        best.map(|(name, score)| (name.to_string(), score))
            .ok_or_else(|| AgentError::Configuration("No routes loaded".to_string()))
    }
}

/// Near-duplicate samples decide alone; otherwise the mean of the top
/// similarities, with strong ones squared
fn route_score(query: &[f32], samples: &[Vec<f32>]) -> f64 {
    let mut sims: Vec<f64> = samples.iter().map(|s| cosine_similarity(query, s)).collect();
    if sims.is_empty() {
        return 0.0;
    }

    let exact: Vec<f64> = sims.iter().copied().filter(|s| *s > EXACT_MATCH).collect();
    if !exact.is_empty() {
        return exact.iter().sum::<f64>() / exact.len() as f64;
    }

    sims.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    sims.truncate(TOP_SAMPLES);
    let total: f64 = sims
        .iter()
        .map(|s| if *s > STRONG_MATCH { s * s } else { *s })
        .sum();
    total / sims.len() as f64
}

#[async_trait]
impl QueryGate for SemanticGate {
    async fn classify(&self, question: &str) -> Result<Route, AgentError> {
        let (name, score) = self.guide(question).await?;
        tracing::debug!(route = %name, score, "Gate decision");
        Ok(if name == MEDICAL_ROUTE {
            Route::Medical
        } else {
            Route::Chitchat
        })
    }
}
