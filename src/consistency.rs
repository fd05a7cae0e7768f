//! Cross-candidate consistency from embedding cosine similarity.
//!
//! Candidates written from differently worded prompts that still land close
//! together in embedding space are a sign the model is not improvising. The
//! scorer never fails the run: anything that goes wrong yields `Unknown`.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TrustConfig;
use crate::gateway::{Attribution, EmbedModel, EmbedRequest, EmbeddingGateway, ProviderError};
use crate::generation::CandidateSummary;
use crate::report::StageUsage;
use crate::retry::RetryExecutor;
use crate::trace::{CallTrace, RunContext, Stage};

/// Mean similarity needed for `High`.
pub const HIGH_SIMILARITY: f64 = 0.85;
/// Mean similarity needed for `Medium`.
pub const MEDIUM_SIMILARITY: f64 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    High,
    Medium,
    Low,
    /// Consistency could not be measured.
    Unknown,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SimilarityError {
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Cosine similarity in [-1, 1]. Returns 0.0 if either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let (mut dot, mut mag_a, mut mag_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f64::EPSILON {
        Ok(0.0)
    } else {
        Ok((dot / denom).clamp(-1.0, 1.0))
    }
}

/// Similarity of one unordered candidate pair; `i < j` always.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub i: usize,
    pub j: usize,
    pub similarity: f64,
}

/// All unordered pairs of `(candidate index, vector)`.
pub fn pairwise_similarities(
    vectors: &[(usize, Vec<f32>)],
) -> Result<Vec<SimilarityPair>, SimilarityError> {
    let mut pairs = Vec::with_capacity(vectors.len() * vectors.len().saturating_sub(1) / 2);
    for (a, (ia, va)) in vectors.iter().enumerate() {
        for (ib, vb) in &vectors[a + 1..] {
            let similarity = cosine_similarity(va, vb)?;
            let (i, j) = if ia < ib { (*ia, *ib) } else { (*ib, *ia) };
            pairs.push(SimilarityPair { i, j, similarity });
        }
    }
    Ok(pairs)
}

pub fn mean_similarity(pairs: &[SimilarityPair]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let mean = pairs.iter().map(|p| p.similarity).sum::<f64>() / pairs.len() as f64;
    mean.is_finite().then_some(mean)
}

pub fn band(mean: f64) -> ConsistencyLevel {
    if mean >= HIGH_SIMILARITY {
        ConsistencyLevel::High
    } else if mean >= MEDIUM_SIMILARITY {
        ConsistencyLevel::Medium
    } else {
        ConsistencyLevel::Low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub level: ConsistencyLevel,
    pub mean_similarity: Option<f64>,
    pub pairs: Vec<SimilarityPair>,
    /// Why the level is `Unknown`, when it is.
    pub failure: Option<String>,
}

impl ConsistencyReport {
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            level: ConsistencyLevel::Unknown,
            mean_similarity: None,
            pairs: Vec::new(),
            failure: Some(reason.into()),
        }
    }

    /// Band the mean of the given pairs.
    pub fn from_pairs(pairs: Vec<SimilarityPair>) -> Self {
        match mean_similarity(&pairs) {
            Some(mean) => Self {
                level: band(mean),
                mean_similarity: Some(mean),
                pairs,
                failure: None,
            },
            None => Self::unknown("no finite mean similarity"),
        }
    }
}

pub struct ConsistencyScorer<'a> {
    gateway: &'a dyn EmbeddingGateway,
    model: EmbedModel,
    retry: RetryExecutor,
}

impl<'a> ConsistencyScorer<'a> {
    pub fn from_config(gateway: &'a dyn EmbeddingGateway, config: &TrustConfig) -> Self {
        Self {
            gateway,
            model: config.embedding_model.clone(),
            retry: RetryExecutor::new(config.retry),
        }
    }

    /// Embed every candidate concurrently, then compare all pairs.
    pub async fn score(
        &self,
        candidates: &[CandidateSummary],
        ctx: RunContext<'_>,
    ) -> (ConsistencyReport, StageUsage) {
        let mut usage = StageUsage::default();
        if candidates.len() < 2 {
            return (
                ConsistencyReport::unknown("fewer than two candidates"),
                usage,
            );
        }

        info!(candidates = candidates.len(), model = self.model.as_str(), "scoring consistency");

        let tasks = candidates.iter().map(|c| self.embed_one(c, ctx));
        let results = join_all(tasks).await;

        let mut vectors = Vec::with_capacity(results.len());
        let mut first_failure = None;
        for (candidate, result) in candidates.iter().zip(results) {
            match result {
                Ok((vector, tokens, cost)) => {
                    usage.record(tokens, 0, cost);
                    vectors.push((candidate.index, vector));
                }
                Err(err) => {
                    usage.record_failure();
                    warn!(candidate = candidate.index, error = %err, "embedding failed");
                    first_failure.get_or_insert_with(|| {
                        format!("embedding candidate {}: {err}", candidate.index)
                    });
                }
            }
        }

        if let Some(reason) = first_failure {
            return (ConsistencyReport::unknown(reason), usage);
        }

        let report = match pairwise_similarities(&vectors) {
            Ok(pairs) => ConsistencyReport::from_pairs(pairs),
            Err(err) => {
                warn!(error = %err, "cannot compare embeddings");
                ConsistencyReport::unknown(err.to_string())
            }
        };
        debug!(
            level = ?report.level,
            mean = ?report.mean_similarity,
            "consistency scored"
        );
        (report, usage)
    }

    async fn embed_one(
        &self,
        candidate: &CandidateSummary,
        ctx: RunContext<'_>,
    ) -> Result<(Vec<f32>, u32, i64), String> {
        let req = EmbedRequest::single(
            self.model.clone(),
            candidate.text.clone(),
            Attribution::new("consistency::embed")
                .with_run(ctx.run_id)
                .with_candidate(candidate.index),
        );

        let gateway = self.gateway;
        let result = self
            .retry
            .execute("consistency::embed", || {
                let req = req.clone();
                async move { gateway.embed(req).await }
            })
            .await;

        let event = CallTrace::new(ctx.run_id, Stage::Embed, candidate.index, self.model.as_str());
        match result {
            Ok(done) => {
                let resp = done.value;
                ctx.emit(
                    event
                        .attempts(done.attempts)
                        .usage(resp.tokens, 0, resp.cost_nanodollars),
                );
                match resp.embeddings.into_iter().next() {
                    Some(vector) => Ok((vector, resp.tokens, resp.cost_nanodollars)),
                    None => Err(ProviderError::EmptyResponse {
                        provider: self.model.provider(),
                    }
                    .to_string()),
                }
            }
            Err(err) => {
                ctx.emit(
                    event
                        .attempts(err.attempts())
                        .failed(err.last_error().code()),
                );
                Err(err.to_string())
            }
        }
    }
}
