//! Ollama Embeddings
//!
//! Uses Ollama's `/api/embed` endpoint (bge-m3 by default). The request
//! timeout is enforced by the HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use medqa_config::constants::{endpoints, models, qdrant, timeouts};
use medqa_config::EmbeddingSettings;

use crate::embeddings::Embedder;
use crate::RagError;

/// Ollama embedding configuration
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingConfig {
    /// Ollama API endpoint
    pub endpoint: String,
    pub model: String,
    pub embedding_dim: usize,
    pub timeout: Duration,
    /// Texts per request when embedding a batch
    pub batch_size: usize,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::OLLAMA_DEFAULT.to_string(),
            model: models::EMBEDDING.to_string(),
            embedding_dim: qdrant::VECTOR_DIM,
            timeout: Duration::from_secs(timeouts::EMBEDDING_REQUEST_SECS),
            batch_size: 32,
        }
    }
}

impl OllamaEmbeddingConfig {
    pub fn from_settings(settings: &EmbeddingSettings, embedding_dim: usize) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            embedding_dim,
            timeout: Duration::from_secs(settings.timeout_secs),
            ..Default::default()
        }
    }
}

/// Request to Ollama embedding API
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Response from Ollama embedding API
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama embedder
pub struct OllamaEmbedder {
    client: Client,
    config: OllamaEmbeddingConfig,
}

impl OllamaEmbedder {
    pub fn new(config: OllamaEmbeddingConfig) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!("{}/api/embed", self.config.endpoint.trim_end_matches('/'))
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let request = EmbedRequest {
            model: &self.config.model,
            input,
        };

        let response = self
            .client
            .post(self.url())
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "Ollama embedding failed: {} - {}",
                status, text
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("Failed to parse Ollama response: {}", e)))?;

        self.check_response(input.len(), embed_response.embeddings)
    }

    fn check_response(
        &self,
        expected: usize,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        if embeddings.len() != expected {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                expected,
                embeddings.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.config.embedding_dim) {
            return Err(RagError::Embedding(format!(
                "model {} returned dimension {}, expected {}",
                self.config.model,
                bad.len(),
                self.config.embedding_dim
            )));
        }
        Ok(embeddings)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.request(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            embeddings.extend(self.request(chunk).await?);
        }
        Ok(embeddings)
    }

    fn dim(&self) -> usize {
        self.config.embedding_dim
    }
}
