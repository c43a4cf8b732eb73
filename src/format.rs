//! src/format.rs
//!
//! Format compliance rewards. These only look at structure, never at whether the
//! codes are real, so they give signal long before the semantic rewards do.

use crate::completion::Completion;
use crate::extraction::{Extraction, has_reasoning_content};
use rayon::prelude::*;

/// Weight awarded for each satisfied format check.
pub const FORMAT_REWARD: f64 = 0.5;

/// Scores every message record (not every completion) for a non-empty
/// `<reasoning>` region. The output is the flattened per-record score list.
pub fn reasoning_format_reward(completions: &[Completion]) -> Vec<f64> {
    completions
        .par_iter()
        .flat_map_iter(|completion| {
            completion.messages().iter().map(|message| {
                if has_reasoning_content(&message.content) {
                    FORMAT_REWARD
                } else {
                    0.0
                }
            })
        })
        .collect()
}

/// Scores each completion on whether its answer looks like `[item, item, ...]`.
pub fn list_format_reward(completions: &[Completion]) -> Vec<f64> {
    completions
        .par_iter()
        .map(|completion| {
            let answer = Extraction::parse(completion.primary_content());
            if is_valid_list(answer.text()) {
                FORMAT_REWARD
            } else {
                0.0
            }
        })
        .collect()
}

/// Bracketed, comma-delimited, with no blank items.
pub fn is_valid_list(s: &str) -> bool {
    let Some(inner) = s.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) else {
        return false;
    };
    inner.split(',').all(|item| !item.trim().is_empty())
}
