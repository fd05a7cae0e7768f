//! Run configuration.
//!
//! Every field has a default, so `{}` is a valid config file. Provider
//! credentials are not part of it; adapters read those from the environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::gateway::EmbedModel;
use crate::generation::GenerationPolicy;
use crate::prompts::SUMMARY_PROMPTS;
use crate::retry::RetryPolicy;
use crate::text::{SourceError, SourceText, DEFAULT_MAX_SOURCE_TOKENS, DEFAULT_MIN_SOURCE_CHARS};
use crate::validation::SelectionPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustConfig {
    /// OpenRouter model used to write candidate summaries.
    #[serde(default = "default_chat_model")]
    pub summary_model: String,
    /// OpenRouter model used for fact checking.
    #[serde(default = "default_chat_model")]
    pub validation_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: EmbedModel,
    /// Number of candidate summaries (one per prompt variant).
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
    /// Fact-check passes per candidate.
    #[serde(default = "default_validation_passes")]
    pub validation_passes: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_summary_tokens")]
    pub max_summary_tokens: u32,
    #[serde(default = "default_max_validation_tokens")]
    pub max_validation_tokens: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub generation_policy: GenerationPolicy,
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
    #[serde(default = "default_min_source_chars")]
    pub min_source_chars: usize,
    #[serde(default = "default_max_source_tokens")]
    pub max_source_tokens: usize,
}

fn default_chat_model() -> String {
    "openai/gpt-4o-mini".to_string()
}
fn default_embedding_model() -> EmbedModel {
    EmbedModel::OpenAI3Small
}
fn default_candidate_count() -> usize {
    3
}
fn default_validation_passes() -> u32 {
    3
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_summary_tokens() -> u32 {
    1024
}
fn default_max_validation_tokens() -> u32 {
    2048
}
fn default_min_source_chars() -> usize {
    DEFAULT_MIN_SOURCE_CHARS
}
fn default_max_source_tokens() -> usize {
    DEFAULT_MAX_SOURCE_TOKENS
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            summary_model: default_chat_model(),
            validation_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            candidate_count: default_candidate_count(),
            validation_passes: default_validation_passes(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_summary_tokens: default_max_summary_tokens(),
            max_validation_tokens: default_max_validation_tokens(),
            retry: RetryPolicy::default(),
            generation_policy: GenerationPolicy::default(),
            selection_policy: SelectionPolicy::default(),
            min_source_chars: default_min_source_chars(),
            max_source_tokens: default_max_source_tokens(),
        }
    }
}

impl TrustConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: TrustConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_candidates = SUMMARY_PROMPTS.len();
        if self.candidate_count < 2 || self.candidate_count > max_candidates {
            return Err(ConfigError::Invalid(format!(
                "candidate_count must be between 2 and {max_candidates}, got {}",
                self.candidate_count
            )));
        }
        if self.validation_passes == 0 {
            return Err(ConfigError::Invalid(
                "validation_passes must be at least 1".into(),
            ));
        }
        if self.summary_model.trim().is_empty() || self.validation_model.trim().is_empty() {
            return Err(ConfigError::Invalid("model ids must not be empty".into()));
        }
        if self.embedding_model.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid(
                "embedding_model must not be empty".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be in [0, 2], got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if let GenerationPolicy::AllowPartial { min_candidates } = self.generation_policy {
            if min_candidates < 2 || min_candidates > self.candidate_count {
                return Err(ConfigError::Invalid(format!(
                    "allow_partial.min_candidates must be between 2 and candidate_count ({}), got {min_candidates}",
                    self.candidate_count
                )));
            }
        }
        Ok(())
    }

    /// Apply the source quality gate with this config's bounds.
    pub fn source(&self, text: impl Into<String>) -> Result<SourceText, SourceError> {
        SourceText::new(text, self.min_source_chars, self.max_source_tokens)
    }
}
