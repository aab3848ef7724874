//! Medical question answering on top of retrieval
//!
//! Features:
//! - Chat reflection into a standalone question
//! - Medical gate (semantic routing over sample utterances)
//! - Grounded answer synthesis driven by the sufficiency loop verdict

pub mod gate;
pub mod pipeline;
pub mod prompts;
pub mod reflection;

pub use gate::{AcceptAll, QueryGate, Route, SemanticGate};
pub use pipeline::{Answer, AnswerPipeline};
pub use reflection::Reflector;

use medqa_llm::LlmError;
use medqa_rag::RagError;
use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Retrieval error: {0}")]
    Rag(#[from] RagError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Empty question")]
    EmptyQuestion,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<AgentError> for medqa_core::Error {
    fn from(err: AgentError) -> Self {
        medqa_core::Error::Agent(err.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use medqa_core::Candidate;
    use medqa_llm::{FinishReason, GenerationResult, LlmBackend, LlmError, Message};
    use medqa_rag::{RagError, Retriever};

    /// Replies in order, then empty strings; records each prompt
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().clone()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
            let prompt = messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            self.prompts.lock().push(prompt);
            let text = self.replies.lock().pop_front().unwrap_or_default();
            Ok(GenerationResult {
                text,
                tokens: 0,
                total_time_ms: 0,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    pub struct FixedRetriever(pub Vec<Candidate>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &str, limit: usize) -> Result<Vec<Candidate>, RagError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }
}
