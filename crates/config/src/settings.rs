//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{agent, bm25, endpoints, models, qdrant, retrieval, timeouts};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Lexical index
    #[serde(default)]
    pub bm25: Bm25Settings,

    /// Hybrid fusion and MMR
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Vector index
    #[serde(default)]
    pub qdrant: QdrantSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    /// Evidence reranking before answer synthesis
    #[serde(default)]
    pub reranker: RerankerSettings,

    /// Sufficiency loop and answer pipeline
    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    /// Validate all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_bm25()?;
        self.validate_retrieval()?;
        self.validate_qdrant()?;
        self.validate_llm()?;
        self.validate_reranker()?;
        self.validate_agent()?;
        Ok(())
    }

    fn validate_bm25(&self) -> Result<(), ConfigError> {
        let bm25 = &self.bm25;

        if !bm25.k1.is_finite() || bm25.k1 < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "bm25.k1".to_string(),
                message: format!("Must be a non-negative number, got {}", bm25.k1),
            });
        }

        if !(0.0..=1.0).contains(&bm25.b) {
            return Err(ConfigError::InvalidValue {
                field: "bm25.b".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", bm25.b),
            });
        }

        if bm25.analyzer == AnalyzerKind::Subword && bm25.tokenizer_path.is_none() {
            return Err(ConfigError::MissingField(
                "bm25.tokenizer_path (required by the subword analyzer)".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let retrieval = &self.retrieval;

        if retrieval.rrf_k <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.rrf_k".to_string(),
                message: format!("Must be positive, got {}", retrieval.rrf_k),
            });
        }

        if retrieval.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.pool_size".to_string(),
                message: "Pool size must be at least 1".to_string(),
            });
        }

        if retrieval.final_top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.final_top_k".to_string(),
                message: "Must return at least 1 result".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&retrieval.mmr_lambda) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.mmr_lambda".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", retrieval.mmr_lambda),
            });
        }

        Ok(())
    }

    fn validate_qdrant(&self) -> Result<(), ConfigError> {
        if self.qdrant.collection.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "qdrant.collection".to_string(),
                message: "Collection name cannot be empty".to_string(),
            });
        }

        if self.qdrant.vector_dim == 0 {
            return Err(ConfigError::InvalidValue {
                field: "qdrant.vector_dim".to_string(),
                message: "Vector dimension must be at least 1".to_string(),
            });
        }

        if self.environment.is_production() && self.qdrant.api_key.is_none() {
            tracing::warn!("qdrant.api_key is not set in production");
        }

        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        let llm = &self.llm;

        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                message: format!("Must be between 0.0 and 2.0, got {}", llm.temperature),
            });
        }

        if llm.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.timeout_secs".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }

        // Hosted chat completions always need a key outside development
        if self.environment.is_strict()
            && llm.provider == LlmProvider::OpenAi
            && llm.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingField("llm.api_key".to_string()));
        }

        Ok(())
    }

    fn validate_reranker(&self) -> Result<(), ConfigError> {
        let reranker = &self.reranker;

        if reranker.provider == RerankerProvider::Http && reranker.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "reranker.endpoint (required by the http reranker)".to_string(),
            ));
        }

        if reranker.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reranker.timeout_secs".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }

        Ok(())
    }

    fn validate_agent(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.max_iterations".to_string(),
                message: "Loop needs at least 1 iteration".to_string(),
            });
        }

        if self.agent.retrieve_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.retrieve_limit".to_string(),
                message: "Must retrieve at least 1 document per action".to_string(),
            });
        }

        Ok(())
    }
}

/// Tokenization strategy for the lexical index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    /// Whitespace words; multi-syllable words pre-joined with `_`
    #[default]
    Word,
    /// HuggingFace tokenizer subwords
    Subword,
}

/// BM25 lexical index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Settings {
    /// Snapshot file
    #[serde(default = "default_index_path")]
    pub index_path: String,

    #[serde(default = "default_k1")]
    pub k1: f64,

    #[serde(default = "default_b")]
    pub b: f64,

    #[serde(default)]
    pub analyzer: AnalyzerKind,

    /// `tokenizer.json` for the subword analyzer
    #[serde(default)]
    pub tokenizer_path: Option<String>,
}

fn default_index_path() -> String {
    bm25::INDEX_PATH.to_string()
}
fn default_k1() -> f64 {
    bm25::K1
}
fn default_b() -> f64 {
    bm25::B
}

impl Default for Bm25Settings {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            k1: bm25::K1,
            b: bm25::B,
            analyzer: AnalyzerKind::default(),
            tokenizer_path: None,
        }
    }
}

/// Hybrid retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Candidates taken from each retriever before fusion
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// Results of the initial retrieval round
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,

    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,

    #[serde(default = "default_mmr_fetch_k")]
    pub mmr_fetch_k: usize,
}

fn default_pool_size() -> usize {
    retrieval::POOL_SIZE
}
fn default_rrf_k() -> f64 {
    retrieval::RRF_K
}
fn default_final_top_k() -> usize {
    retrieval::FINAL_TOP_K
}
fn default_mmr_lambda() -> f64 {
    retrieval::MMR_LAMBDA
}
fn default_mmr_fetch_k() -> usize {
    retrieval::MMR_FETCH_K
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            pool_size: retrieval::POOL_SIZE,
            rrf_k: retrieval::RRF_K,
            final_top_k: retrieval::FINAL_TOP_K,
            mmr_lambda: retrieval::MMR_LAMBDA,
            mmr_fetch_k: retrieval::MMR_FETCH_K,
        }
    }
}

/// Qdrant vector index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantSettings {
    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,

    #[serde(default = "default_qdrant_timeout")]
    pub timeout_secs: u64,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}
fn default_collection() -> String {
    qdrant::COLLECTION.to_string()
}
fn default_vector_dim() -> usize {
    qdrant::VECTOR_DIM
}
fn default_qdrant_timeout() -> u64 {
    timeouts::QDRANT_REQUEST_SECS
}

impl Default for QdrantSettings {
    fn default() -> Self {
        Self {
            endpoint: default_qdrant_endpoint(),
            api_key: None,
            collection: default_collection(),
            vector_dim: qdrant::VECTOR_DIM,
            timeout_secs: timeouts::QDRANT_REQUEST_SECS,
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    /// Deterministic hashed bag-of-words, for offline runs
    Hash,
}

/// Embedding service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_ollama_endpoint() -> String {
    endpoints::OLLAMA_DEFAULT.to_string()
}
fn default_embedding_model() -> String {
    models::EMBEDDING.to_string()
}
fn default_embedding_timeout() -> u64 {
    timeouts::EMBEDDING_REQUEST_SECS
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            endpoint: default_ollama_endpoint(),
            model: default_embedding_model(),
            timeout_secs: timeouts::EMBEDDING_REQUEST_SECS,
        }
    }
}

/// LLM transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    /// OpenAI-compatible chat completions (Groq, vLLM, OpenAI)
    OpenAi,
}

/// Language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub provider: LlmProvider,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Defaults to the provider's local endpoint when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_llm_model() -> String {
    models::LLM.to_string()
}
fn default_max_tokens() -> usize {
    1024
}
fn default_temperature() -> f32 {
    0.0
}
fn default_llm_timeout() -> u64 {
    timeouts::LLM_REQUEST_SECS
}
fn default_max_retries() -> u32 {
    3
}

impl LlmSettings {
    /// Configured endpoint, or the provider default
    pub fn resolved_endpoint(&self) -> String {
        match (&self.endpoint, self.provider) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, LlmProvider::Ollama) => endpoints::OLLAMA_DEFAULT.to_string(),
            (None, LlmProvider::OpenAi) => endpoints::OPENAI_COMPAT_DEFAULT.to_string(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_llm_model(),
            endpoint: None,
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: timeouts::LLM_REQUEST_SECS,
            max_retries: default_max_retries(),
        }
    }
}

/// Reranker selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RerankerProvider {
    /// Weighted term overlap, no model needed
    #[default]
    Lexical,
    /// Cross-encoder served over HTTP
    Http,
}

/// Reranker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerSettings {
    #[serde(default)]
    pub provider: RerankerProvider,

    #[serde(default = "default_reranker_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_reranker_model")]
    pub model: String,

    #[serde(default = "default_reranker_timeout")]
    pub timeout_secs: u64,
}

fn default_reranker_endpoint() -> String {
    endpoints::RERANKER_DEFAULT.to_string()
}
fn default_reranker_model() -> String {
    models::RERANKER.to_string()
}
fn default_reranker_timeout() -> u64 {
    timeouts::RERANK_REQUEST_SECS
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self {
            provider: RerankerProvider::default(),
            endpoint: default_reranker_endpoint(),
            model: default_reranker_model(),
            timeout_secs: timeouts::RERANK_REQUEST_SECS,
        }
    }
}

/// Sufficiency loop and answer pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_retrieve_limit")]
    pub retrieve_limit: usize,

    /// Rewrite multi-turn history into a standalone question
    #[serde(default = "default_true")]
    pub reflection_enabled: bool,

    /// Most recent messages shown to the reflection prompt
    #[serde(default = "default_reflection_window")]
    pub reflection_window: usize,

    /// Rerank sufficient evidence against the question before answering
    #[serde(default = "default_true")]
    pub rerank_enabled: bool,

    /// Route samples for the medical gate; every question is treated as
    /// medical when unset
    #[serde(default)]
    pub routes_path: Option<String>,
}

fn default_max_iterations() -> usize {
    agent::MAX_ITERATIONS
}
fn default_retrieve_limit() -> usize {
    agent::RETRIEVE_LIMIT
}
fn default_reflection_window() -> usize {
    agent::REFLECTION_WINDOW
}
fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: agent::MAX_ITERATIONS,
            retrieve_limit: agent::RETRIEVE_LIMIT,
            reflection_enabled: true,
            reflection_window: agent::REFLECTION_WINDOW,
            rerank_enabled: true,
            routes_path: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of human-readable logs
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from `config/` in the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from a config directory
///
/// Sources in increasing priority: `{dir}/default.*`, `{dir}/{env}.*`,
/// `MEDQA__SECTION__KEY` environment variables.
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    let default_path = dir.join("default");
    builder = builder.add_source(File::with_name(&default_path.to_string_lossy()).required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        let env_path = dir.join(env_name);
        builder = builder.add_source(File::with_name(&env_path.to_string_lossy()).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("MEDQA")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.bm25.k1, 1.5);
        assert_eq!(settings.bm25.b, 0.75);
        assert_eq!(settings.retrieval.pool_size, 50);
        assert_eq!(settings.retrieval.rrf_k, 60.0);
        assert_eq!(settings.agent.max_iterations, 2);
        assert_eq!(settings.agent.retrieve_limit, 3);
        assert_eq!(settings.qdrant.collection, "ta_hospital");
        assert_eq!(settings.qdrant.vector_dim, 1024);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_bm25_validation() {
        let mut settings = Settings::default();

        settings.bm25.b = 1.5;
        assert!(settings.validate_bm25().is_err());
        settings.bm25.b = 0.75;

        settings.bm25.k1 = -0.1;
        assert!(settings.validate_bm25().is_err());
        settings.bm25.k1 = 1.2;

        settings.bm25.analyzer = AnalyzerKind::Subword;
        assert!(settings.validate_bm25().is_err());
        settings.bm25.tokenizer_path = Some("models/phobert/tokenizer.json".to_string());
        assert!(settings.validate_bm25().is_ok());
    }

    #[test]
    fn test_retrieval_validation() {
        let mut settings = Settings::default();

        settings.retrieval.rrf_k = 0.0;
        assert!(settings.validate_retrieval().is_err());
        settings.retrieval.rrf_k = -1.0;
        assert!(settings.validate_retrieval().is_err());
        settings.retrieval.rrf_k = 60.0;

        settings.retrieval.final_top_k = 0;
        assert!(settings.validate_retrieval().is_err());
        settings.retrieval.final_top_k = 3;

        assert!(settings.validate_retrieval().is_ok());
    }

    #[test]
    fn test_agent_validation() {
        let mut settings = Settings::default();
        settings.agent.max_iterations = 0;
        assert!(settings.validate_agent().is_err());
    }

    #[test]
    fn test_qdrant_validation() {
        let mut settings = Settings::default();
        settings.qdrant.collection = "  ".to_string();
        assert!(settings.validate_qdrant().is_err());
        settings.qdrant.collection = "ta_hospital".to_string();
        settings.qdrant.vector_dim = 0;
        assert!(settings.validate_qdrant().is_err());
    }

    #[test]
    fn test_production_llm_key_required() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        settings.llm.provider = LlmProvider::OpenAi;
        assert!(settings.validate_llm().is_err());

        settings.llm.api_key = Some("gsk-test".to_string());
        assert!(settings.validate_llm().is_ok());
    }

    #[test]
    fn test_resolved_endpoint() {
        let mut llm = LlmSettings::default();
        assert_eq!(llm.resolved_endpoint(), endpoints::OLLAMA_DEFAULT);
        llm.provider = LlmProvider::OpenAi;
        assert_eq!(llm.resolved_endpoint(), endpoints::OPENAI_COMPAT_DEFAULT);
        llm.endpoint = Some("http://vllm:8000/v1".to_string());
        assert_eq!(llm.resolved_endpoint(), "http://vllm:8000/v1");
    }

    #[test]
    fn test_load_layered_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[bm25]\nk1 = 1.2\n\n[agent]\nmax_iterations = 4\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("staging.toml"), "[bm25]\nk1 = 0.9\n").unwrap();

        let settings = load_settings_from(dir.path(), Some("staging")).unwrap();
        assert_eq!(settings.bm25.k1, 0.9);
        assert_eq!(settings.bm25.b, 0.75);
        assert_eq!(settings.agent.max_iterations, 4);
    }

    #[test]
    fn test_reranker_settings() {
        let mut settings = Settings::default();
        assert!(settings.agent.rerank_enabled);
        assert_eq!(settings.reranker.provider, RerankerProvider::Lexical);
        assert!(settings.validate_reranker().is_ok());

        settings.reranker.provider = RerankerProvider::Http;
        settings.reranker.endpoint = " ".to_string();
        assert!(matches!(settings.validate_reranker(), Err(ConfigError::MissingField(_))));

        settings.reranker.endpoint = endpoints::RERANKER_DEFAULT.to_string();
        settings.reranker.timeout_secs = 0;
        assert!(settings.validate_reranker().is_err());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.toml"), "[bm25]\nb = 3.0\n").unwrap();
        assert!(load_settings_from(dir.path(), None).is_err());
    }

    #[test]
    fn test_settings_serialize_roundtrip_toml() {
        let settings = Settings::default();
        let text = toml::to_string(&settings).unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed.retrieval.final_top_k, settings.retrieval.final_top_k);
    }
}
