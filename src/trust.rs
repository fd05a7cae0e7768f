//! Trust aggregation: fuse fact-check support and cross-candidate consistency
//! into a single reader-facing label.
//!
//! Everything here is pure. The pipeline hands over one best run per candidate
//! (in candidate order) and the consistency band, and gets back a verdict.

use serde::{Deserialize, Serialize};

use crate::consistency::ConsistencyLevel;
use crate::validation::ValidationRun;

/// Share of supported sentences needed for `High`.
pub const HIGH_SUPPORT_RATIO: f64 = 0.90;
/// Share of supported sentences needed for `Medium`.
pub const MEDIUM_SUPPORT_RATIO: f64 = 0.60;

/// How well the best summary is backed by the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceConfidenceLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustLevel {
    VeryTrustworthy,
    Trustworthy,
    CheckBeforeUsing,
    NotReliable,
}

impl TrustLevel {
    /// Label shown to readers.
    pub fn label(self) -> &'static str {
        match self {
            TrustLevel::VeryTrustworthy => "Very trustworthy",
            TrustLevel::Trustworthy => "Trustworthy",
            TrustLevel::CheckBeforeUsing => "Check before using",
            TrustLevel::NotReliable => "Not reliable",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustVerdict {
    pub best_summary_index: usize,
    /// Support ratio of the chosen candidate.
    pub support_ratio: f64,
    pub source_confidence_level: SourceConfidenceLevel,
    pub consistency_level: ConsistencyLevel,
    pub trust_level: TrustLevel,
    /// Sentences a human should double check; empty when confidence is High.
    pub review_sentences: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrustError {
    #[error("no candidate runs to aggregate")]
    NoCandidates,
}

/// supported / total, or 0.0 for a run that judged no sentences.
pub fn support_ratio(run: &ValidationRun) -> f64 {
    if run.total_count == 0 {
        0.0
    } else {
        run.supported_count as f64 / run.total_count as f64
    }
}

pub fn band_ratio(ratio: f64) -> SourceConfidenceLevel {
    if ratio >= HIGH_SUPPORT_RATIO {
        SourceConfidenceLevel::High
    } else if ratio >= MEDIUM_SUPPORT_RATIO {
        SourceConfidenceLevel::Medium
    } else {
        SourceConfidenceLevel::Low
    }
}

/// Fusion table, first matching row wins.
pub fn fuse(confidence: SourceConfidenceLevel, consistency: ConsistencyLevel) -> TrustLevel {
    use ConsistencyLevel as C;
    use SourceConfidenceLevel as S;

    match (confidence, consistency) {
        (S::High, C::High) => TrustLevel::VeryTrustworthy,
        (S::High, _) | (_, C::High) => TrustLevel::Trustworthy,
        (S::Medium, C::Medium) => TrustLevel::CheckBeforeUsing,
        _ => TrustLevel::NotReliable,
    }
}

/// Pick the best-supported candidate and label it.
///
/// `best_runs[i]` is candidate `i`'s best fact-check run. Ties on ratio go to
/// the lowest index.
pub fn aggregate(
    best_runs: &[ValidationRun],
    consistency: ConsistencyLevel,
) -> Result<TrustVerdict, TrustError> {
    let mut best: Option<(usize, f64)> = None;
    for (index, run) in best_runs.iter().enumerate() {
        let ratio = support_ratio(run);
        match best {
            Some((_, top)) if ratio <= top => {}
            _ => best = Some((index, ratio)),
        }
    }
    let (best_summary_index, ratio) = best.ok_or(TrustError::NoCandidates)?;

    let confidence = band_ratio(ratio);
    let trust_level = fuse(confidence, consistency);
    let unsupported = &best_runs[best_summary_index].unsupported_sentences;
    let review_sentences = if confidence != SourceConfidenceLevel::High && !unsupported.is_empty()
    {
        unsupported.clone()
    } else {
        Vec::new()
    };

    Ok(TrustVerdict {
        best_summary_index,
        support_ratio: ratio,
        source_confidence_level: confidence,
        consistency_level: consistency,
        trust_level,
        review_sentences,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency;

    fn run(supported: usize, total: usize, unsupported: &[&str]) -> ValidationRun {
        ValidationRun {
            supported_count: supported,
            total_count: total,
            unsupported_sentences: unsupported.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn ratio_is_zero_for_empty_run() {
        assert_eq!(support_ratio(&ValidationRun::zero()), 0.0);
        assert_eq!(support_ratio(&run(3, 4, &[])), 0.75);
    }

    #[test]
    fn ratio_band_boundaries() {
        assert_eq!(band_ratio(0.90), SourceConfidenceLevel::High);
        assert_eq!(band_ratio(1.0), SourceConfidenceLevel::High);
        assert_eq!(band_ratio(0.60), SourceConfidenceLevel::Medium);
        assert_eq!(band_ratio(0.89), SourceConfidenceLevel::Medium);
        assert_eq!(band_ratio(0.59), SourceConfidenceLevel::Low);
        assert_eq!(band_ratio(0.0), SourceConfidenceLevel::Low);
    }

    #[test]
    fn fusion_table_listed_pairs() {
        use ConsistencyLevel as C;
        use SourceConfidenceLevel as S;

        assert_eq!(fuse(S::High, C::High), TrustLevel::VeryTrustworthy);
        assert_eq!(fuse(S::High, C::Low), TrustLevel::Trustworthy);
        assert_eq!(fuse(S::High, C::Unknown), TrustLevel::Trustworthy);
        assert_eq!(fuse(S::Low, C::High), TrustLevel::Trustworthy);
        assert_eq!(fuse(S::Medium, C::Medium), TrustLevel::CheckBeforeUsing);
        assert_eq!(fuse(S::Medium, C::Low), TrustLevel::NotReliable);
        assert_eq!(fuse(S::Medium, C::Unknown), TrustLevel::NotReliable);
        assert_eq!(fuse(S::Low, C::Low), TrustLevel::NotReliable);
    }

    #[test]
    fn fusion_is_total_and_ordered() {
        use ConsistencyLevel as C;
        use SourceConfidenceLevel as S;

        for s in [S::High, S::Medium, S::Low] {
            for c in [C::High, C::Medium, C::Low, C::Unknown] {
                let level = fuse(s, c);
                let expected = if s == S::High && c == C::High {
                    TrustLevel::VeryTrustworthy
                } else if s == S::High || c == C::High {
                    TrustLevel::Trustworthy
                } else if s == S::Medium && c == C::Medium {
                    TrustLevel::CheckBeforeUsing
                } else {
                    TrustLevel::NotReliable
                };
                assert_eq!(level, expected, "({s:?}, {c:?})");
            }
        }
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(
            aggregate(&[], ConsistencyLevel::High),
            Err(TrustError::NoCandidates)
        );
    }

    #[test]
    fn ties_go_to_the_first_candidate() {
        let runs = [run(1, 2, &[]), run(2, 4, &[]), run(3, 4, &[])];
        let verdict = aggregate(&runs, ConsistencyLevel::Low).unwrap();
        assert_eq!(verdict.best_summary_index, 2);

        let runs = [run(2, 4, &[]), run(1, 2, &[])];
        let verdict = aggregate(&runs, ConsistencyLevel::Low).unwrap();
        assert_eq!(verdict.best_summary_index, 0);
    }

    #[test]
    fn all_zero_runs_pick_index_zero_with_low_confidence() {
        let runs = [ValidationRun::zero(), ValidationRun::zero()];
        let verdict = aggregate(&runs, ConsistencyLevel::Unknown).unwrap();
        assert_eq!(verdict.best_summary_index, 0);
        assert_eq!(verdict.source_confidence_level, SourceConfidenceLevel::Low);
        assert_eq!(verdict.trust_level, TrustLevel::NotReliable);
        assert!(verdict.review_sentences.is_empty());
    }

    #[test]
    fn review_sentences_only_below_high_confidence() {
        // 9/10 is High even though one sentence is unsupported.
        let high = aggregate(&[run(9, 10, &["odd claim."])], ConsistencyLevel::Medium).unwrap();
        assert_eq!(high.source_confidence_level, SourceConfidenceLevel::High);
        assert!(high.review_sentences.is_empty());

        let medium = aggregate(&[run(7, 10, &["a.", "b.", "c."])], ConsistencyLevel::Medium).unwrap();
        assert_eq!(medium.review_sentences, vec!["a.", "b.", "c."]);
    }

    #[test]
    fn scenario_clear_winner_with_high_consistency() {
        let runs = [
            run(10, 10, &[]),
            run(8, 10, &["x.", "y."]),
            run(5, 10, &["p.", "q.", "r.", "s.", "t."]),
        ];
        let verdict = aggregate(&runs, consistency::band(0.92)).unwrap();
        assert_eq!(verdict.best_summary_index, 0);
        assert_eq!(verdict.source_confidence_level, SourceConfidenceLevel::High);
        assert_eq!(verdict.consistency_level, ConsistencyLevel::High);
        assert_eq!(verdict.trust_level, TrustLevel::VeryTrustworthy);
        assert!(verdict.review_sentences.is_empty());
    }

    #[test]
    fn scenario_middling_support_and_medium_consistency() {
        let runs = [
            run(13, 20, &["a."]),
            run(13, 20, &["b."]),
            run(13, 20, &["c."]),
        ];
        let verdict = aggregate(&runs, consistency::band(0.72)).unwrap();
        assert_eq!(verdict.best_summary_index, 0);
        assert_eq!(verdict.source_confidence_level, SourceConfidenceLevel::Medium);
        assert_eq!(verdict.consistency_level, ConsistencyLevel::Medium);
        assert_eq!(verdict.trust_level, TrustLevel::CheckBeforeUsing);
        assert_eq!(verdict.review_sentences, vec!["a."]);
    }
}
