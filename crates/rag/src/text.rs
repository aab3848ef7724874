//! Text normalization and analyzers for the lexical index
//!
//! Normalization runs before any analyzer, for documents and queries alike:
//! NFC, `-` and newlines to spaces, lowercase, drop bare numbers and list
//! numbering (`"1."`, `"10."`), strip every non-word character. Vietnamese
//! letters with diacritics are word characters and survive untouched.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tokenizers::Tokenizer;
use unicode_normalization::UnicodeNormalization;

use crate::RagError;

static LIST_NUMBERING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.$").unwrap());

// `\w` is Unicode-aware, so this keeps Vietnamese letters and `_`
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]").unwrap());

fn clean_word(word: &str) -> Option<String> {
    let word = word.to_lowercase();

    if LIST_NUMBERING.is_match(&word) || word.chars().all(char::is_numeric) {
        return None;
    }

    let cleaned = NON_WORD.replace_all(&word, "");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.into_owned())
    }
}

/// Normalize raw text into space-separated clean words
pub fn normalize(text: &str) -> String {
    let text: String = text.nfc().collect();
    text.replace(['\n', '-'], " ")
        .split_whitespace()
        .filter_map(clean_word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turns text into index terms
///
/// Implementations only see normalized text; [`Analyzer::analyze`] applies
/// [`normalize`] first so documents and queries go through the same path.
pub trait Analyzer: Send + Sync {
    /// Split already-normalized text into terms
    fn tokenize(&self, normalized: &str) -> Result<Vec<String>, RagError>;

    fn name(&self) -> &str;

    fn analyze(&self, text: &str) -> Result<Vec<String>, RagError> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        self.tokenize(&normalized)
    }
}

/// Whitespace analyzer
///
/// Expects word-segmented input where the syllables of one word are joined
/// with `_` (`đau_đầu`); each such word is one term.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordAnalyzer;

impl Analyzer for WordAnalyzer {
    fn tokenize(&self, normalized: &str) -> Result<Vec<String>, RagError> {
        Ok(normalized.split_whitespace().map(str::to_string).collect())
    }

    fn name(&self) -> &str {
        "word"
    }
}

/// Subword analyzer backed by a HuggingFace `tokenizer.json` (e.g. PhoBERT BPE)
pub struct SubwordAnalyzer {
    tokenizer: Tokenizer,
}

impl SubwordAnalyzer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RagError> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            RagError::Configuration(format!("Failed to load tokenizer {}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), "Subword tokenizer loaded");
        Ok(Self { tokenizer })
    }

    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }
}

impl Analyzer for SubwordAnalyzer {
    fn tokenize(&self, normalized: &str) -> Result<Vec<String>, RagError> {
        let encoding = self
            .tokenizer
            .encode(normalized, false)
            .map_err(|e| RagError::Index(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn name(&self) -> &str {
        "subword"
    }
}
