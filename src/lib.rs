#![forbid(unsafe_code)]

//! # veracity-harness
//!
//! Trust-scored summaries from LLMs.
//!
//! A single summary from a language model gives the reader no way to tell
//! faithful condensation from confident invention. veracity-harness writes
//! several independently prompted summaries of the same document, measures how
//! much they agree with each other (embedding cosine similarity), fact-checks
//! each one sentence by sentence against the source several times, and fuses
//! the two signals into one label: very trustworthy, trustworthy, check before
//! using, or not reliable. Sentences the checker could not support are listed
//! for human review.

pub mod config;
pub mod consistency;
pub mod gateway;
pub mod generation;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod retry;
pub mod text;
pub mod trace;
pub mod trust;
pub mod validation;

pub use config::{ConfigError, TrustConfig};
pub use consistency::{ConsistencyLevel, ConsistencyReport, ConsistencyScorer};
pub use gateway::{
    Attribution, ChatGateway, EmbeddingGateway, ProviderError, ProviderGateway, UsageSink,
};
pub use generation::{CandidateGenerator, CandidateSummary, GenerationError, GenerationPolicy};
pub use pipeline::{run_pipeline, run_pipeline_with_trace_file, PipelineError};
pub use report::{RunCost, TrustReport};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
pub use text::{SourceError, SourceText};
pub use trace::{CallTrace, JsonlTraceSink, RunContext, TraceError, TraceSink, TraceWorker};
pub use trust::{aggregate, SourceConfidenceLevel, TrustError, TrustLevel, TrustVerdict};
pub use validation::{decode_fact_check, FactCheckDecode, FactValidator, SelectionPolicy, ValidationRun};
