//! src/scoring.rs
//!
//! Per-completion scoring math. Everything here is a pure function of one
//! completion's candidate codes and the batch ground truth.

use crate::codes::{GroundTruth, dedup_preserving_order, truncate};
use std::collections::HashSet;

/// Rounds to three decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Fraction of the reference size covered by candidates that are reference codes.
///
/// Candidates are expected to be bounded to `ground_truth.len()`.
pub fn overlap_score(candidates: &[String], ground_truth: &GroundTruth) -> f64 {
    let tally = candidates
        .iter()
        .filter(|code| ground_truth.contains(code))
        .count();
    round3(tally as f64 / ground_truth.len() as f64)
}

/// 1.0 if any candidate is a reference code, else 0.0.
pub fn any_match_score(candidates: &[String], ground_truth: &GroundTruth) -> f64 {
    if candidates.iter().any(|code| ground_truth.contains(code)) {
        1.0
    } else {
        0.0
    }
}

/// Recall of the distinct reference prefixes by the distinct candidate prefixes.
pub fn prefix_recall(
    candidates: &[String],
    ground_truth: &GroundTruth,
    prefix_length: usize,
) -> f64 {
    let reference: HashSet<&str> = ground_truth.truncated(prefix_length).into_iter().collect();
    let predicted =
        dedup_preserving_order(candidates.iter().map(|c| truncate(c, prefix_length)));

    let hits = predicted
        .iter()
        .filter(|prefix| reference.contains(*prefix))
        .count();
    hits as f64 / reference.len() as f64
}

/// 1 / (1 + rank) of the first candidate accepted by `matches`, 0.0 if none is.
pub fn reciprocal_rank<F>(candidates: &[String], matches: F) -> f64
where
    F: Fn(&str) -> bool,
{
    candidates
        .iter()
        .position(|code| matches(code.as_str()))
        .map_or(0.0, |rank| 1.0 / (rank + 1) as f64)
}

/// Reciprocal rank of the first exact occurrence of `target`.
pub fn exact_rank_score(candidates: &[String], target: &str) -> f64 {
    reciprocal_rank(candidates, |code| code == target)
}

/// Reciprocal rank of the first candidate sharing `target`'s prefix.
pub fn prefix_rank_score(candidates: &[String], target: &str, prefix_length: usize) -> f64 {
    let target = truncate(target, prefix_length);
    reciprocal_rank(candidates, |code| truncate(code, prefix_length) == target)
}
