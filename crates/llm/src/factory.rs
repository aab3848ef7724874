//! Settings-driven backend construction

use std::sync::Arc;

use medqa_config::{LlmProvider, LlmSettings};

use crate::backend::{LlmBackend, LlmConfig, OllamaBackend, OpenAIBackend, OpenAIConfig};
use crate::LlmError;

/// Creates LLM backends from configuration
pub struct LlmFactory;

impl LlmFactory {
    pub fn create(settings: &LlmSettings) -> Result<Arc<dyn LlmBackend>, LlmError> {
        let backend: Arc<dyn LlmBackend> = match settings.provider {
            LlmProvider::Ollama => Arc::new(OllamaBackend::new(LlmConfig::from(settings))?),
            LlmProvider::OpenAi => Arc::new(OpenAIBackend::new(OpenAIConfig::from(settings))?),
        };

        tracing::info!(
            provider = ?settings.provider,
            model = %backend.model_name(),
            endpoint = %settings.resolved_endpoint(),
            "LLM backend created"
        );

        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_ollama_default() {
        let backend = LlmFactory::create(&LlmSettings::default()).unwrap();
        assert_eq!(backend.model_name(), medqa_config::constants::models::LLM);
    }

    #[test]
    fn test_create_openai_requires_key_for_remote() {
        let mut settings = LlmSettings {
            provider: LlmProvider::OpenAi,
            ..Default::default()
        };
        assert!(LlmFactory::create(&settings).is_err());

        settings.api_key = Some("gsk-test".to_string());
        assert!(LlmFactory::create(&settings).is_ok());
    }
}
