//! Configuration management for the medical QA assistant
//!
//! Supports loading configuration from:
//! - TOML/YAML files (`config/default`, then `config/{env}`)
//! - Environment variables (`MEDQA__` prefix, `__` as the section separator)
//!
//! Every section has serde defaults taken from [`constants`], so an empty
//! configuration is a valid development setup.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, load_settings_from, AgentSettings, AnalyzerKind, Bm25Settings,
    EmbeddingProvider, EmbeddingSettings, LlmProvider, LlmSettings, ObservabilitySettings,
    QdrantSettings, RerankerProvider, RerankerSettings, RetrievalSettings, RuntimeEnvironment,
    Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
