//! Serializable run report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::TrustConfig;
use crate::consistency::ConsistencyReport;
use crate::generation::CandidateFailure;
use crate::trust::TrustVerdict;
use crate::validation::{PassSummary, ValidationRun};

/// Token and cost totals for one pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageUsage {
    /// Calls that returned a response (after retries).
    pub calls: u32,
    /// Calls that never produced a response.
    pub failed_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_nanodollars: i64,
}

impl StageUsage {
    pub fn record(&mut self, input_tokens: u32, output_tokens: u32, cost_nanodollars: i64) {
        self.calls += 1;
        self.input_tokens += u64::from(input_tokens);
        self.output_tokens += u64::from(output_tokens);
        self.cost_nanodollars = self.cost_nanodollars.saturating_add(cost_nanodollars);
    }

    pub fn record_failure(&mut self) {
        self.failed_calls += 1;
    }

    pub fn merge(&mut self, other: &StageUsage) {
        self.calls += other.calls;
        self.failed_calls += other.failed_calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_nanodollars = self.cost_nanodollars.saturating_add(other.cost_nanodollars);
    }
}

/// Cost breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct RunCost {
    pub generation: StageUsage,
    pub consistency: StageUsage,
    pub validation: StageUsage,
    pub total_cost_nanodollars: i64,
}

impl RunCost {
    pub fn new(generation: StageUsage, consistency: StageUsage, validation: StageUsage) -> Self {
        let total_cost_nanodollars = generation
            .cost_nanodollars
            .saturating_add(consistency.cost_nanodollars)
            .saturating_add(validation.cost_nanodollars);
        Self {
            generation,
            consistency,
            validation,
            total_cost_nanodollars,
        }
    }

    pub fn total_dollars(&self) -> f64 {
        self.total_cost_nanodollars as f64 / 1_000_000_000.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub index: usize,
    pub prompt_slug: &'static str,
    pub text: String,
    pub local_sentence_count: usize,
    pub best_run: ValidationRun,
    /// 1-based pass that produced `best_run`.
    pub best_pass: u32,
    pub support_ratio: f64,
    pub passes: Vec<PassSummary>,
}

/// Everything a consumer needs to present or audit one scored summary.
#[derive(Debug, Clone, Serialize)]
pub struct TrustReport {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub source_digest: String,
    pub source_tokens: usize,
    pub config: TrustConfig,
    pub candidates: Vec<CandidateReport>,
    /// Candidates dropped under a partial generation policy.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_candidates: Vec<CandidateFailure>,
    pub consistency: ConsistencyReport,
    pub verdict: TrustVerdict,
    pub best_summary: String,
    pub cost: RunCost,
}
