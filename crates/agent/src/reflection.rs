//! Question reflection: turn the tail of a chat into one standalone question

use std::sync::Arc;

use medqa_config::constants::agent;
use medqa_llm::prompt::render_transcript;
use medqa_llm::{LlmBackend, Message, Role};

use crate::prompts::{fill, REFLECTION_PROMPT};
use crate::AgentError;

pub struct Reflector {
    llm: Arc<dyn LlmBackend>,
    window: usize,
}

impl Reflector {
    pub fn new(llm: Arc<dyn LlmBackend>) -> Self {
        Self {
            llm,
            window: agent::REFLECTION_WINDOW,
        }
    }

    /// Messages of history shown to the model
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Rewrite `history` into a standalone question
    ///
    /// Falls back to the rendered history when the model returns nothing.
    pub async fn reflect(&self, history: &[Message]) -> Result<String, AgentError> {
        if history.is_empty() {
            return Err(AgentError::EmptyQuestion);
        }

        let start = history.len().saturating_sub(self.window);
        let rendered = render_transcript(&history[start..]);
        let prompt = Message::user(fill(REFLECTION_PROMPT, "history", &rendered));

        let result = self.llm.generate(&[prompt]).await?;
        let question = result.text.trim();
        if question.is_empty() {
            tracing::warn!("Reflection returned nothing, using raw history");
            return Ok(rendered);
        }

        tracing::debug!(question = %question, "Reflected question");
        Ok(question.to_string())
    }
}

/// Content of the last user message
pub fn last_user_message(history: &[Message]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}
