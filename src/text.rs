//! Token counting, sentence splitting and the source-text quality gate.

use fancy_regex::Regex as FancyRegex;
use once_cell::sync::Lazy;
use serde::Serialize;
use tiktoken_rs::cl100k_base;

/// Sources shorter than this are not worth summarizing.
pub const DEFAULT_MIN_SOURCE_CHARS: usize = 200;
/// Upper bound on source size; the full text is embedded in every prompt.
pub const DEFAULT_MAX_SOURCE_TOKENS: usize = 60_000;

// Use fancy-regex for lookbehind support
static SENTENCE_SPLIT: Lazy<Option<FancyRegex>> = Lazy::new(|| {
    // Split after . ! ? followed by whitespace
    FancyRegex::new(r"(?<=[.!?])\s+").ok()
});

/// Count tokens in text using the cl100k_base tokenizer.
///
/// Falls back to a chars/4 estimate if the tokenizer tables fail to load.
pub fn count_tokens(text: &str) -> usize {
    match cl100k_base() {
        Ok(bpe) => bpe.encode_with_special_tokens(text).len(),
        Err(_) => text.chars().count().div_ceil(4),
    }
}

/// Split text on standard sentence-ending punctuation.
///
/// Empty fragments are dropped and every sentence is trimmed.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let Some(re) = SENTENCE_SPLIT.as_ref() else {
        return vec![text.trim()].into_iter().filter(|s| !s.is_empty()).collect();
    };

    let mut sentences = Vec::new();
    let mut last_end = 0;
    let mut finder = re.find_iter(text);

    while let Some(Ok(m)) = finder.next() {
        let sentence = text[last_end..m.start()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        last_end = m.end();
    }

    let tail = text[last_end..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source text is empty")]
    Empty,
    #[error("source text too short: {chars} chars (min {min})")]
    TooShort { chars: usize, min: usize },
    #[error("source text too long: {tokens} tokens (max {max})")]
    TooLong { tokens: usize, max: usize },
}

/// Normalized document text that passed the quality gate.
///
/// The pipeline only accepts this type, so an unsuitable document is rejected
/// before any model call is made.
#[derive(Debug, Clone, Serialize)]
pub struct SourceText {
    text: String,
    tokens: usize,
    digest: String,
}

impl SourceText {
    pub fn new(text: impl Into<String>, min_chars: usize, max_tokens: usize) -> Result<Self, SourceError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(SourceError::Empty);
        }

        let chars = text.chars().count();
        if chars < min_chars {
            return Err(SourceError::TooShort {
                chars,
                min: min_chars,
            });
        }

        let tokens = count_tokens(&text);
        if tokens > max_tokens {
            return Err(SourceError::TooLong {
                tokens,
                max: max_tokens,
            });
        }

        let digest = blake3::hash(text.as_bytes()).to_hex().to_string();
        Ok(Self {
            text,
            tokens,
            digest,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// blake3 hex digest of the normalized text.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}
