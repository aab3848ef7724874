//! Agentic Sufficiency Loop
//!
//! Wraps retrieval in a bounded conversation with the LLM:
//! 1. Show the accumulated evidence as an observation
//! 2. Ask for a verdict and parse its `Action:` line
//! 3. On `retrieve_more_information`, search again and merge by id
//! 4. Stop on `end_loop`, on a reply without an action, on a malformed
//!    action, or when the iteration cap is reached
//!
//! The evidence set only ever grows. LLM and retrieval errors propagate.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use medqa_config::constants::agent;
use medqa_config::AgentSettings;
use medqa_core::{Candidate, DocumentId};
use medqa_llm::{LlmBackend, Message};

use crate::{RagError, Retriever};

/// Fallback instructions when the caller supplies none
pub const DEFAULT_SYSTEM_PROMPT: &str = "You run in a loop of Thought, Action, PAUSE, Observation.
Use Thought to decide whether the retrieved medical documents are sufficient to answer the question.
Available actions:
retrieve_more_information: <what is missing>
end_loop: \"\"
Call end_loop as soon as the Observation answers the question. Never invent medical facts.";

// a trailing PAUSE on the action line is tolerated
static ACTION_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\baction\s*:").unwrap());
static ACTION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^action\s*:\s*([a-z_]+)\s*(?::\s*(.*?))?\s*(?:\bpause)?\s*$").unwrap()
});

/// The actions the model may call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    EndLoop,
    RetrieveMoreInformation,
}

impl ActionKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "end_loop" => Some(Self::EndLoop),
            "retrieve_more_information" => Some(Self::RetrieveMoreInformation),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::EndLoop => "end_loop",
            Self::RetrieveMoreInformation => "retrieve_more_information",
        }
    }
}

/// A parsed `Action:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDirective {
    Terminate,
    RetrieveMore(String),
    /// The raw action line that did not fit the grammar
    Malformed(String),
}

/// Parse the first `Action: <name>[: <argument>]` line of a reply
///
/// Returns `None` when the reply carries no action at all. Arguments are
/// trimmed of whitespace and quotes; `retrieve_more_information` with an
/// empty argument is malformed.
pub fn parse_action(reply: &str) -> Option<ActionDirective> {
    let marker = ACTION_MARKER.find(reply)?;
    let line = reply[marker.start()..].lines().next().unwrap_or("").trim();

    let Some(caps) = ACTION_LINE.captures(line) else {
        return Some(ActionDirective::Malformed(line.to_string()));
    };

    let argument = caps
        .get(2)
        .map(|m| m.as_str().trim().trim_matches(|c| c == '"' || c == '\''))
        .unwrap_or("")
        .trim();

    match caps.get(1).and_then(|m| ActionKind::from_name(m.as_str())) {
        Some(ActionKind::EndLoop) => Some(ActionDirective::Terminate),
        Some(ActionKind::RetrieveMoreInformation) if !argument.is_empty() => {
            Some(ActionDirective::RetrieveMore(argument.to_string()))
        }
        _ => Some(ActionDirective::Malformed(line.to_string())),
    }
}

/// Loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Gathering,
    AwaitingVerdict,
    Sufficient,
    Exhausted,
    Aborted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sufficient | Self::Exhausted | Self::Aborted)
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The model called `end_loop`
    Signalled,
    /// The reply had no action; taken as a final answer
    NoDirective,
    /// Unknown or malformed action
    ProtocolViolation(String),
    /// Iteration cap reached
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct SufficiencyConfig {
    pub max_iterations: usize,
    /// Results requested per `retrieve_more_information`
    pub retrieve_limit: usize,
    pub system_prompt: String,
}

impl Default for SufficiencyConfig {
    fn default() -> Self {
        Self {
            max_iterations: agent::MAX_ITERATIONS,
            retrieve_limit: agent::RETRIEVE_LIMIT,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl From<&AgentSettings> for SufficiencyConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            retrieve_limit: settings.retrieve_limit,
            ..Default::default()
        }
    }
}

impl SufficiencyConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Result of one loop run
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Initial candidates first, then additions in retrieval order
    pub candidates: Vec<Candidate>,
    pub sufficient: bool,
    /// Verdicts requested
    pub iterations: usize,
    pub state: LoopState,
    pub termination: Termination,
    pub transcript: Vec<Message>,
}

/// Evidence accumulated by one run, unique by id
struct Session {
    candidates: Vec<Candidate>,
    seen: HashSet<DocumentId>,
}

impl Session {
    fn new(initial: Vec<Candidate>) -> Self {
        let mut session = Self {
            candidates: Vec::with_capacity(initial.len()),
            seen: HashSet::new(),
        };
        session.merge(initial);
        session
    }

    /// Append unseen candidates; existing entries are never replaced
    fn merge(&mut self, incoming: Vec<Candidate>) -> usize {
        let before = self.candidates.len();
        for candidate in incoming {
            if self.seen.insert(candidate.id) {
                self.candidates.push(candidate);
            }
        }
        self.candidates.len() - before
    }

    fn observation(&self, question: &str) -> String {
        let evidence = self
            .candidates
            .iter()
            .map(|c| format!("- {}", c.content))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Observation:\n{}\n\nQuestion:\n{}", evidence, question)
    }
}

/// The sufficiency loop over an LLM and a retriever
pub struct SufficiencyLoop {
    llm: Arc<dyn LlmBackend>,
    retriever: Arc<dyn Retriever>,
    config: SufficiencyConfig,
}

impl SufficiencyLoop {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        retriever: Arc<dyn Retriever>,
        config: SufficiencyConfig,
    ) -> Self {
        Self {
            llm,
            retriever,
            config,
        }
    }

    pub fn config(&self) -> &SufficiencyConfig {
        &self.config
    }

    /// Run the loop for `question` starting from `initial`
    pub async fn run(
        &self,
        question: &str,
        initial: Vec<Candidate>,
    ) -> Result<LoopOutcome, RagError> {
        let mut session = Session::new(initial);
        let mut transcript = vec![Message::system(self.config.system_prompt.clone())];
        let mut state = LoopState::Gathering;
        let mut termination = Termination::Exhausted;
        let mut iterations = 0;

        while !state.is_terminal() {
            state = match state {
                LoopState::Gathering if iterations >= self.config.max_iterations => {
                    tracing::info!(iterations, "Sufficiency loop reached iteration cap");
                    termination = Termination::Exhausted;
                    LoopState::Exhausted
                }
                LoopState::Gathering => {
                    transcript.push(Message::user(session.observation(question)));
                    iterations += 1;
                    LoopState::AwaitingVerdict
                }
                LoopState::AwaitingVerdict => {
                    let reply = self.llm.generate(&transcript).await?;
                    tracing::debug!(iteration = iterations, reply = %reply.text, "Loop verdict");
                    let directive = parse_action(&reply.text);
                    transcript.push(Message::assistant(reply.text));

                    match directive {
                        None => {
                            termination = Termination::NoDirective;
                            LoopState::Sufficient
                        }
                        Some(ActionDirective::Terminate) => {
                            termination = Termination::Signalled;
                            LoopState::Sufficient
                        }
                        Some(ActionDirective::RetrieveMore(query)) => {
                            let found = self
                                .retriever
                                .search(&query, self.config.retrieve_limit)
                                .await?;
                            let added = session.merge(found);
                            tracing::info!(
                                iteration = iterations,
                                query = %query,
                                added,
                                total = session.candidates.len(),
                                "Retrieved more evidence"
                            );
                            LoopState::Gathering
                        }
                        Some(ActionDirective::Malformed(raw)) => {
                            tracing::warn!(action = %raw, "Unrecognised loop action, stopping");
                            termination = Termination::ProtocolViolation(raw);
                            LoopState::Aborted
                        }
                    }
                }
                terminal => terminal,
            };
        }

        Ok(LoopOutcome {
            candidates: session.candidates,
            sufficient: state == LoopState::Sufficient,
            iterations,
            state,
            termination,
            transcript,
        })
    }
}
