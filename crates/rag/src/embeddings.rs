//! Text Embeddings
//!
//! The [`Embedder`] trait is the embedding collaborator. [`SimpleEmbedder`] is
//! a deterministic hashed bag-of-words model for offline runs and tests; the
//! production model is served by Ollama (see `ollama_embeddings`).

use async_trait::async_trait;

use medqa_config::constants::qdrant;

use crate::text::normalize;
use crate::RagError;

/// Text to dense vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// Embed several texts, order preserved
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Output dimension
    fn dim(&self) -> usize;
}

/// Embedding configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub embedding_dim: usize,
    /// L2-normalize outputs
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            embedding_dim: qdrant::VECTOR_DIM,
            normalize: true,
        }
    }
}

/// Hashed bag-of-words embedder
///
/// Each normalized word is hashed (FNV-1a) into one bucket. Texts sharing
/// words get a positive cosine similarity; disjoint texts get zero.
pub struct SimpleEmbedder {
    config: EmbeddingConfig,
}

impl SimpleEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    fn bucket(&self, word: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.config.embedding_dim as u64) as usize
    }

    /// Synchronous embedding
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.config.embedding_dim];
        if self.config.embedding_dim == 0 {
            return embedding;
        }

        for word in normalize(text).split_whitespace() {
            embedding[self.bucket(word)] += 1.0;
        }

        if self.config.normalize {
            let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in &mut embedding {
                    *v /= norm;
                }
            }
        }

        embedding
    }
}

#[async_trait]
impl Embedder for SimpleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(self.embed_sync(text))
    }

    fn dim(&self) -> usize {
        self.config.embedding_dim
    }
}

/// Cosine similarity; zero when either vector is all zeros
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
