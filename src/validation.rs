//! Fact validation: repeated sentence-level fact checks of each candidate
//! against the source, keeping the best pass.
//!
//! Passes for one candidate run one after another; candidates run
//! concurrently. A pass that fails outright or returns an unusable document
//! contributes the zero outcome instead of failing the run.

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::TrustConfig;
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest};
use crate::generation::CandidateSummary;
use crate::prompts::FACT_CHECK_V1;
use crate::report::StageUsage;
use crate::retry::RetryExecutor;
use crate::text::{split_sentences, SourceText};
use crate::trace::{CallOutcome, CallTrace, RunContext, Stage};
use crate::trust::support_ratio;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```$").expect("Invalid code fence regex")
});

/// Outcome of one fact-check pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRun {
    pub supported_count: usize,
    pub total_count: usize,
    /// Unsupported sentences in the order the checker listed them.
    pub unsupported_sentences: Vec<String>,
}

impl ValidationRun {
    /// The outcome used when a pass produced nothing usable.
    pub fn zero() -> Self {
        Self::default()
    }
}

/// A decoded fact-check document.
#[derive(Debug, Clone, PartialEq)]
pub struct FactCheck {
    pub run: ValidationRun,
    /// The checker's own High/Medium/Low label. Recorded, never used for scoring.
    pub model_confidence: Option<String>,
    /// Entries dropped for lacking a string `sentence` or boolean `supported`.
    pub skipped_entries: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactCheckDecode {
    Accepted(FactCheck),
    Rejected(String),
}

impl FactCheckDecode {
    pub fn into_run(self) -> ValidationRun {
        match self {
            FactCheckDecode::Accepted(check) => check.run,
            FactCheckDecode::Rejected(_) => ValidationRun::zero(),
        }
    }
}

/// Remove one enclosing Markdown code fence, with or without a language tag.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim(),
        None => trimmed,
    }
}

/// Decode a fact-check response, rejecting anything that does not carry a
/// `sentences` array.
pub fn decode_fact_check(raw: &str) -> FactCheckDecode {
    let body = strip_code_fence(raw);
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => return FactCheckDecode::Rejected(format!("not valid JSON: {err}")),
    };
    let Some(object) = value.as_object() else {
        return FactCheckDecode::Rejected("top level is not a JSON object".into());
    };
    let Some(sentences) = object.get("sentences") else {
        return FactCheckDecode::Rejected("missing \"sentences\" field".into());
    };
    let Some(entries) = sentences.as_array() else {
        return FactCheckDecode::Rejected("\"sentences\" is not an array".into());
    };

    let mut run = ValidationRun::zero();
    let mut skipped_entries = 0;
    for entry in entries {
        let sentence = entry.get("sentence").and_then(Value::as_str);
        let supported = entry.get("supported").and_then(Value::as_bool);
        let (Some(sentence), Some(supported)) = (sentence, supported) else {
            skipped_entries += 1;
            continue;
        };
        run.total_count += 1;
        if supported {
            run.supported_count += 1;
        } else {
            run.unsupported_sentences.push(sentence.trim().to_string());
        }
    }

    FactCheckDecode::Accepted(FactCheck {
        run,
        model_confidence: object
            .get("confidence")
            .and_then(Value::as_str)
            .map(str::to_string),
        skipped_entries,
    })
}

/// How the best pass of a candidate is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Most supported sentences.
    #[default]
    MostSupported,
    /// Highest supported / total ratio.
    HighestRatio,
}

/// Index of the best run; the first one wins ties. `None` only for no runs.
pub fn select_best(runs: &[ValidationRun], policy: SelectionPolicy) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, run) in runs.iter().enumerate() {
        let better = match best {
            None => true,
            Some(current) => match policy {
                SelectionPolicy::MostSupported => {
                    run.supported_count > runs[current].supported_count
                }
                SelectionPolicy::HighestRatio => {
                    support_ratio(run) > support_ratio(&runs[current])
                }
            },
        };
        if better {
            best = Some(index);
        }
    }
    best
}

#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    /// 1-based pass number.
    pub pass: u32,
    pub attempts: u32,
    pub outcome: CallOutcome,
    pub supported_count: usize,
    pub total_count: usize,
    pub model_confidence: Option<String>,
    pub skipped_entries: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CandidateValidation {
    pub index: usize,
    pub best: ValidationRun,
    /// 1-based pass that produced `best`.
    pub best_pass: u32,
    pub passes: Vec<PassSummary>,
    /// Sentence count from the local splitter, for comparison with the checker.
    pub local_sentence_count: usize,
    pub usage: StageUsage,
}

pub struct FactValidator<'a> {
    gateway: &'a dyn ChatGateway,
    model: String,
    passes: u32,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    retry: RetryExecutor,
    selection: SelectionPolicy,
}

impl<'a> FactValidator<'a> {
    pub fn from_config(gateway: &'a dyn ChatGateway, config: &TrustConfig) -> Self {
        Self {
            gateway,
            model: config.validation_model.clone(),
            passes: config.validation_passes.max(1),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_validation_tokens,
            retry: RetryExecutor::new(config.retry),
            selection: config.selection_policy,
        }
    }

    /// Validate every candidate concurrently; results are in candidate order.
    pub async fn validate_all(
        &self,
        source: &SourceText,
        candidates: &[CandidateSummary],
        ctx: RunContext<'_>,
    ) -> Vec<CandidateValidation> {
        info!(
            candidates = candidates.len(),
            passes = self.passes,
            model = %self.model,
            "fact checking candidates"
        );
        let tasks = candidates
            .iter()
            .map(|candidate| self.validate_candidate(source, candidate, ctx));
        join_all(tasks).await
    }

    pub async fn validate_candidate(
        &self,
        source: &SourceText,
        candidate: &CandidateSummary,
        ctx: RunContext<'_>,
    ) -> CandidateValidation {
        let prompt = FACT_CHECK_V1.render_with_summary(source.as_str(), &candidate.text);
        let local_sentence_count = split_sentences(&candidate.text).len();

        let mut runs = Vec::with_capacity(self.passes as usize);
        let mut passes = Vec::with_capacity(self.passes as usize);
        let mut usage = StageUsage::default();

        for pass in 1..=self.passes {
            let req = ChatRequest::new(
                ChatModel::openrouter(&self.model),
                prompt.to_messages(),
                Attribution::new("validation::fact_check")
                    .with_run(ctx.run_id)
                    .with_candidate(candidate.index),
            )
            .temperature(self.temperature)
            .top_p(self.top_p)
            .max_tokens(self.max_tokens)
            .json();

            let gateway = self.gateway;
            let result = self
                .retry
                .execute("validation::fact_check", || {
                    let req = req.clone();
                    async move { gateway.chat(req).await }
                })
                .await;

            let event =
                CallTrace::new(ctx.run_id, Stage::Validate, candidate.index, &self.model).pass(pass);
            let (run, summary) = match result {
                Ok(done) => {
                    let resp = done.value;
                    usage.record(resp.input_tokens, resp.output_tokens, resp.cost_nanodollars);
                    let event = event.attempts(done.attempts).usage(
                        resp.input_tokens,
                        resp.output_tokens,
                        resp.cost_nanodollars,
                    );
                    match decode_fact_check(&resp.content) {
                        FactCheckDecode::Accepted(check) => {
                            ctx.emit(event);
                            let summary = PassSummary {
                                pass,
                                attempts: done.attempts,
                                outcome: CallOutcome::Ok,
                                supported_count: check.run.supported_count,
                                total_count: check.run.total_count,
                                model_confidence: check.model_confidence,
                                skipped_entries: check.skipped_entries,
                                error: None,
                            };
                            (check.run, summary)
                        }
                        FactCheckDecode::Rejected(reason) => {
                            warn!(
                                candidate = candidate.index,
                                pass,
                                reason = %reason,
                                "unusable fact-check response; counting as zero"
                            );
                            ctx.emit(event.rejected(reason.clone()));
                            (
                                ValidationRun::zero(),
                                PassSummary::zero(pass, done.attempts, CallOutcome::Rejected, reason),
                            )
                        }
                    }
                }
                Err(err) => {
                    usage.record_failure();
                    warn!(
                        candidate = candidate.index,
                        pass,
                        attempts = err.attempts(),
                        error = %err,
                        "fact-check pass failed; counting as zero"
                    );
                    ctx.emit(
                        event
                            .attempts(err.attempts())
                            .failed(err.last_error().code()),
                    );
                    (
                        ValidationRun::zero(),
                        PassSummary::zero(pass, err.attempts(), CallOutcome::Failed, err.to_string()),
                    )
                }
            };

            if summary.outcome == CallOutcome::Ok && run.total_count != local_sentence_count {
                debug!(
                    candidate = candidate.index,
                    pass,
                    checker = run.total_count,
                    local = local_sentence_count,
                    "checker sentence split differs from local split"
                );
            }
            runs.push(run);
            passes.push(summary);
        }

        let best_offset = select_best(&runs, self.selection).unwrap_or(0);
        let best = runs.swap_remove(best_offset);
        debug!(
            candidate = candidate.index,
            best_pass = best_offset + 1,
            supported = best.supported_count,
            total = best.total_count,
            "best fact-check pass selected"
        );

        CandidateValidation {
            index: candidate.index,
            best,
            best_pass: best_offset as u32 + 1,
            passes,
            local_sentence_count,
            usage,
        }
    }
}

impl PassSummary {
    fn zero(pass: u32, attempts: u32, outcome: CallOutcome, error: String) -> Self {
        Self {
            pass,
            attempts,
            outcome,
            supported_count: 0,
            total_count: 0,
            model_confidence: None,
            skipped_entries: 0,
            error: Some(error),
        }
    }
}
