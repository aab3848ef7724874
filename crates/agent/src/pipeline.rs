//! Answer pipeline
//!
//! reflection → gate → initial hybrid retrieval → sufficiency loop → rerank →
//! answer. The answer template depends on the route and the loop's verdict;
//! only sufficient evidence is reranked.

use std::sync::Arc;

use medqa_config::constants::retrieval;
use medqa_core::Candidate;
use medqa_llm::{LlmBackend, Message};
use medqa_rag::{Reranker, Retriever, SufficiencyLoop, Termination};

use crate::gate::{AcceptAll, QueryGate, Route};
use crate::prompts::{fill, ANSWER_INSUFFICIENT, ANSWER_WITHOUT_RETRIEVAL, ANSWER_WITH_KNOWLEDGE};
use crate::reflection::{last_user_message, Reflector};
use crate::AgentError;

/// One answered question
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// The standalone question that was retrieved and answered
    pub question: String,
    pub route: Route,
    /// Evidence gathered by the loop, in reranked order when a reranker ran;
    /// empty for non-medical questions
    pub evidence: Vec<Candidate>,
    pub sufficient: bool,
    pub iterations: usize,
    pub termination: Option<Termination>,
}

pub struct AnswerPipeline {
    llm: Arc<dyn LlmBackend>,
    retriever: Arc<dyn Retriever>,
    sufficiency: SufficiencyLoop,
    gate: Arc<dyn QueryGate>,
    reflector: Option<Reflector>,
    reranker: Option<Arc<dyn Reranker>>,
    initial_top_k: usize,
}

impl AnswerPipeline {
    /// Pipeline without reflection that treats every question as medical
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        retriever: Arc<dyn Retriever>,
        sufficiency: SufficiencyLoop,
    ) -> Self {
        Self {
            llm,
            retriever,
            sufficiency,
            gate: Arc::new(AcceptAll),
            reflector: None,
            reranker: None,
            initial_top_k: retrieval::FINAL_TOP_K,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn QueryGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_reflector(mut self, reflector: Reflector) -> Self {
        self.reflector = Some(reflector);
        self
    }

    /// Reorder sufficient evidence against the question before answering
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Candidates fetched before the loop starts
    pub fn with_initial_top_k(mut self, top_k: usize) -> Self {
        self.initial_top_k = top_k.max(1);
        self
    }

    /// Answer a single question
    pub async fn ask(&self, question: &str) -> Result<Answer, AgentError> {
        self.answer(&[Message::user(question)]).await
    }

    /// Answer the latest question of a chat
    pub async fn answer(&self, history: &[Message]) -> Result<Answer, AgentError> {
        let question = match self.reflector {
            Some(ref reflector) => reflector.reflect(history).await?,
            None => last_user_message(history)
                .ok_or(AgentError::EmptyQuestion)?
                .to_string(),
        };
        let question = question.trim().to_string();
        if question.is_empty() {
            return Err(AgentError::EmptyQuestion);
        }

        let route = self.gate.classify(&question).await?;
        tracing::info!(route = route.as_str(), question = %question, "Question routed");

        let (system, evidence, sufficient, iterations, termination) = match route {
            Route::Medical => {
                let initial = self.retriever.search(&question, self.initial_top_k).await?;
                tracing::debug!(initial = initial.len(), retriever = self.retriever.name(), "Initial retrieval");

                let outcome = self.sufficiency.run(&question, initial).await?;
                tracing::info!(
                    sufficient = outcome.sufficient,
                    iterations = outcome.iterations,
                    evidence = outcome.candidates.len(),
                    "Sufficiency loop finished"
                );

                let evidence = match self.reranker {
                    Some(ref reranker) if outcome.sufficient => {
                        let reranked = reranker
                            .rerank(&question, &outcome.candidates, outcome.candidates.len())
                            .await?;
                        tracing::debug!(
                            reranker = reranker.name(),
                            order = ?reranked.iter().map(|c| c.id).collect::<Vec<_>>(),
                            "Evidence reranked"
                        );
                        reranked
                    }
                    _ => outcome.candidates,
                };

                let system = if outcome.sufficient {
                    let knowledge = evidence
                        .iter()
                        .map(|c| c.content.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    fill(ANSWER_WITH_KNOWLEDGE, "knowledge", &knowledge)
                } else {
                    ANSWER_INSUFFICIENT.to_string()
                };
                (
                    system,
                    evidence,
                    outcome.sufficient,
                    outcome.iterations,
                    Some(outcome.termination),
                )
            }
            Route::Chitchat => (ANSWER_WITHOUT_RETRIEVAL.to_string(), Vec::new(), false, 0, None),
        };

        let messages = [Message::system(system), Message::user(question.clone())];
        let result = self.llm.generate(&messages).await?;

        Ok(Answer {
            text: result.text.trim().to_string(),
            question,
            route,
            evidence,
            sufficient,
            iterations,
            termination,
        })
    }
}
