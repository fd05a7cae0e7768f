//! Candidate generation: one summary per prompt variant, requested concurrently.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TrustConfig;
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::prompts::{PromptTemplate, SUMMARY_PROMPTS};
use crate::report::StageUsage;
use crate::retry::{RetryError, RetryExecutor};
use crate::text::SourceText;
use crate::trace::{CallTrace, RunContext, Stage};

/// What to do when some candidates cannot be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GenerationPolicy {
    /// Any failed candidate aborts the run.
    #[default]
    RequireAll,
    /// Continue with the survivors if at least `min_candidates` succeeded.
    AllowPartial { min_candidates: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateSummary {
    /// Position in prompt order; kept stable even when earlier candidates fail.
    pub index: usize,
    pub text: String,
    pub prompt_slug: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("candidate {index} ({prompt_slug}) failed: {source}")]
    CandidateFailed {
        index: usize,
        prompt_slug: &'static str,
        #[source]
        source: RetryError<ProviderError>,
    },
    #[error("only {succeeded} of {requested} candidates succeeded, need {required}")]
    TooFewCandidates {
        succeeded: usize,
        requested: usize,
        required: usize,
    },
}

/// A candidate that could not be produced under a partial policy.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateFailure {
    pub index: usize,
    pub prompt_slug: &'static str,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// Successful candidates in index order.
    pub candidates: Vec<CandidateSummary>,
    pub failures: Vec<CandidateFailure>,
    pub usage: StageUsage,
}

pub struct CandidateGenerator<'a> {
    gateway: &'a dyn ChatGateway,
    templates: &'static [PromptTemplate],
    model: String,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    retry: RetryExecutor,
    policy: GenerationPolicy,
}

impl<'a> CandidateGenerator<'a> {
    pub fn from_config(gateway: &'a dyn ChatGateway, config: &TrustConfig) -> Self {
        let count = config.candidate_count.min(SUMMARY_PROMPTS.len());
        Self {
            gateway,
            templates: &SUMMARY_PROMPTS[..count],
            model: config.summary_model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_summary_tokens,
            retry: RetryExecutor::new(config.retry),
            policy: config.generation_policy,
        }
    }

    /// Issue one completion per template concurrently and collect the results.
    pub async fn generate(
        &self,
        source: &SourceText,
        ctx: RunContext<'_>,
    ) -> Result<GenerationOutcome, GenerationError> {
        info!(
            candidates = self.templates.len(),
            model = %self.model,
            "generating candidate summaries"
        );

        let tasks = self
            .templates
            .iter()
            .enumerate()
            .map(|(index, template)| self.generate_one(index, template, source, ctx));
        let results = join_all(tasks).await;

        let mut usage = StageUsage::default();
        let mut candidates = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        let mut first_error = None;

        for (index, result) in results.into_iter().enumerate() {
            let template = &self.templates[index];
            match result {
                Ok((candidate, resp_usage)) => {
                    usage.merge(&resp_usage);
                    candidates.push(candidate);
                }
                Err(err) => {
                    usage.record_failure();
                    warn!(
                        candidate = index,
                        prompt = template.slug,
                        attempts = err.attempts(),
                        error = %err,
                        "candidate generation failed"
                    );
                    failures.push(CandidateFailure {
                        index,
                        prompt_slug: template.slug,
                        attempts: err.attempts(),
                        error: err.to_string(),
                    });
                    if first_error.is_none() {
                        first_error = Some(GenerationError::CandidateFailed {
                            index,
                            prompt_slug: template.slug,
                            source: err,
                        });
                    }
                }
            }
        }

        match (self.policy, first_error) {
            (_, None) => {}
            (GenerationPolicy::RequireAll, Some(err)) => return Err(err),
            (GenerationPolicy::AllowPartial { min_candidates }, Some(_)) => {
                let required = min_candidates.max(2);
                if candidates.len() < required {
                    return Err(GenerationError::TooFewCandidates {
                        succeeded: candidates.len(),
                        requested: self.templates.len(),
                        required,
                    });
                }
            }
        }

        Ok(GenerationOutcome {
            candidates,
            failures,
            usage,
        })
    }

    async fn generate_one(
        &self,
        index: usize,
        template: &'static PromptTemplate,
        source: &SourceText,
        ctx: RunContext<'_>,
    ) -> Result<(CandidateSummary, StageUsage), RetryError<ProviderError>> {
        let prompt = template.render(source.as_str());
        let req = ChatRequest::new(
            ChatModel::openrouter(&self.model),
            prompt.to_messages(),
            Attribution::new("generation::candidate")
                .with_run(ctx.run_id)
                .with_candidate(index),
        )
        .temperature(self.temperature)
        .top_p(self.top_p)
        .max_tokens(self.max_tokens);

        let gateway = self.gateway;
        let result = self
            .retry
            .execute("generation::candidate", || {
                let req = req.clone();
                async move {
                    let resp = gateway.chat(req).await?;
                    // Whitespace-only output is as useless as no output.
                    if resp.content.trim().is_empty() {
                        return Err(ProviderError::EmptyResponse {
                            provider: "openrouter",
                        });
                    }
                    Ok(resp)
                }
            })
            .await;

        let event = CallTrace::new(ctx.run_id, Stage::Generate, index, &self.model);
        match result {
            Ok(done) => {
                let resp = done.value;
                ctx.emit(
                    event
                        .attempts(done.attempts)
                        .usage(resp.input_tokens, resp.output_tokens, resp.cost_nanodollars),
                );
                let mut usage = StageUsage::default();
                usage.record(resp.input_tokens, resp.output_tokens, resp.cost_nanodollars);
                Ok((
                    CandidateSummary {
                        index,
                        text: resp.content.trim().to_string(),
                        prompt_slug: template.slug,
                    },
                    usage,
                ))
            }
            Err(err) => {
                ctx.emit(
                    event
                        .attempts(err.attempts())
                        .failed(err.last_error().code()),
                );
                Err(err)
            }
        }
    }
}
