//! Source → candidates → {consistency, fact checks} → verdict.
//!
//! 1. **Generate**: one candidate summary per prompt variant, concurrently.
//! 2. **Measure**: embedding consistency and per-candidate fact checks run at
//!    the same time; neither depends on the other.
//! 3. **Aggregate**: fuse the best-supported candidate's confidence with the
//!    consistency band.
//!
//! The run is all-or-nothing: either a complete [`TrustReport`] or a
//! [`PipelineError`].

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, TrustConfig};
use crate::consistency::ConsistencyScorer;
use crate::gateway::{ChatGateway, EmbeddingGateway};
use crate::generation::{CandidateGenerator, GenerationError};
use crate::report::{CandidateReport, RunCost, StageUsage, TrustReport};
use crate::text::SourceText;
use crate::trace::{JsonlTraceSink, RunContext, TraceError, TraceSink};
use crate::trust::{aggregate, support_ratio, TrustError};
use crate::validation::{FactValidator, ValidationRun};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("Aggregation failed: {0}")]
    Aggregation(#[from] TrustError),
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),
}

/// Score one source document.
pub async fn run_pipeline(
    chat: &dyn ChatGateway,
    embeddings: &dyn EmbeddingGateway,
    config: &TrustConfig,
    source: &SourceText,
    trace: Option<&dyn TraceSink>,
) -> Result<TrustReport, PipelineError> {
    config.validate()?;

    let run_id = Uuid::new_v4();
    let ctx = RunContext::new(run_id, trace);
    info!(
        %run_id,
        source_tokens = source.tokens(),
        candidates = config.candidate_count,
        passes = config.validation_passes,
        "starting trust run"
    );

    // --- Phase 1: Generate ---
    let generation = CandidateGenerator::from_config(chat, config)
        .generate(source, ctx)
        .await?;
    let candidates = generation.candidates;

    // --- Phase 2: Consistency and fact checks ---
    let scorer = ConsistencyScorer::from_config(embeddings, config);
    let validator = FactValidator::from_config(chat, config);
    let ((consistency, consistency_usage), validations) = tokio::join!(
        scorer.score(&candidates, ctx),
        validator.validate_all(source, &candidates, ctx),
    );
    info!(
        level = ?consistency.level,
        mean = ?consistency.mean_similarity,
        "consistency measured"
    );

    // --- Phase 3: Aggregate ---
    let best_runs: Vec<ValidationRun> = validations.iter().map(|v| v.best.clone()).collect();
    let mut verdict = aggregate(&best_runs, consistency.level)?;
    let best_position = verdict.best_summary_index;
    // Report the candidate's own index, which differs from its position when
    // a partial policy dropped earlier candidates.
    verdict.best_summary_index = candidates[best_position].index;
    let best_summary = candidates[best_position].text.clone();

    let mut validation_usage = StageUsage::default();
    let mut candidate_reports = Vec::with_capacity(candidates.len());
    for (candidate, validation) in candidates.into_iter().zip(validations) {
        validation_usage.merge(&validation.usage);
        candidate_reports.push(CandidateReport {
            index: candidate.index,
            prompt_slug: candidate.prompt_slug,
            text: candidate.text,
            local_sentence_count: validation.local_sentence_count,
            support_ratio: support_ratio(&validation.best),
            best_run: validation.best,
            best_pass: validation.best_pass,
            passes: validation.passes,
        });
    }

    let cost = RunCost::new(generation.usage, consistency_usage, validation_usage);
    info!(
        %run_id,
        best = verdict.best_summary_index,
        confidence = ?verdict.source_confidence_level,
        trust = %verdict.trust_level,
        review = verdict.review_sentences.len(),
        total_cost_usd = cost.total_dollars(),
        "trust run complete"
    );

    Ok(TrustReport {
        id: run_id,
        created_at: Utc::now(),
        source_digest: source.digest().to_string(),
        source_tokens: source.tokens(),
        config: config.clone(),
        candidates: candidate_reports,
        failed_candidates: generation.failures,
        consistency,
        verdict,
        best_summary,
        cost,
    })
}

/// Convenience: run pipeline and write trace to a file.
pub async fn run_pipeline_with_trace_file(
    chat: &dyn ChatGateway,
    embeddings: &dyn EmbeddingGateway,
    config: &TrustConfig,
    source: &SourceText,
    trace_path: Option<PathBuf>,
) -> Result<TrustReport, PipelineError> {
    let (trace_sink, trace_worker) = if let Some(path) = trace_path {
        let (sink, worker) = JsonlTraceSink::new(path)?;
        (Some(sink), Some(worker))
    } else {
        (None, None)
    };
    let trace_ref = trace_sink.as_ref().map(|s| s as &dyn TraceSink);

    let result = run_pipeline(chat, embeddings, config, source, trace_ref).await;

    drop(trace_sink);
    if let Some(worker) = trace_worker {
        if let Err(err) = worker.join() {
            warn!(error = %err, "trace writer failed");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::ConsistencyLevel;
    use crate::gateway::{
        ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, FinishReason, ProviderError,
    };
    use crate::retry::RetryPolicy;
    use crate::trust::{SourceConfidenceLevel, TrustLevel};
    use std::time::Duration;

    /// Summaries by candidate; fact checks mark every sentence supported.
    struct EchoModel;

    #[async_trait::async_trait]
    impl ChatGateway for EchoModel {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            let content = if req.json_mode {
                r#"{"sentences":[{"sentence":"One.","supported":true},{"sentence":"Two.","supported":true}],"confidence":"High"}"#.to_string()
            } else {
                format!("Summary from candidate {}.", req.attribution.candidate.unwrap_or(99))
            };
            Ok(ChatResponse {
                content,
                input_tokens: 10,
                output_tokens: 10,
                cost_nanodollars: 100,
                latency: Duration::from_millis(1),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    struct NoEmbeddings;

    #[async_trait::async_trait]
    impl EmbeddingGateway for NoEmbeddings {
        async fn embed(&self, _req: EmbedRequest) -> Result<EmbedResponse, ProviderError> {
            Err(ProviderError::config("no embeddings endpoint configured"))
        }
    }

    fn source() -> SourceText {
        SourceText::new("Source text with enough characters.", 5, 1_000).unwrap()
    }

    #[tokio::test]
    async fn missing_embeddings_still_produce_a_verdict() {
        let config = TrustConfig {
            retry: RetryPolicy::immediate(1),
            ..Default::default()
        };
        let report = run_pipeline(&EchoModel, &NoEmbeddings, &config, &source(), None)
            .await
            .unwrap();

        assert_eq!(report.candidates.len(), 3);
        assert_eq!(report.consistency.level, ConsistencyLevel::Unknown);
        assert_eq!(report.verdict.best_summary_index, 0);
        assert_eq!(
            report.verdict.source_confidence_level,
            SourceConfidenceLevel::High
        );
        assert_eq!(report.verdict.trust_level, TrustLevel::Trustworthy);
        assert_eq!(report.best_summary, "Summary from candidate 0.");
        assert_eq!(report.cost.generation.calls, 3);
        assert_eq!(report.cost.validation.calls, 9);
        assert_eq!(report.cost.consistency.failed_calls, 3);
        assert_eq!(report.cost.total_cost_nanodollars, 1_200);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_call() {
        let config = TrustConfig {
            validation_passes: 0,
            ..Default::default()
        };
        let err = run_pipeline(&EchoModel, &NoEmbeddings, &config, &source(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
