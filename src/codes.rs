//! src/codes.rs
//!
//! Ground-truth parsing and code helpers.
//!
//! Codes are hierarchical: the first few characters name a diagnostic family and the
//! full string names the specific diagnosis. Every completion in a batch was sampled
//! from the same prompt, so a batch shares one semicolon-delimited reference.

use crate::error::RewardError;
use std::collections::HashSet;

const CODE_DELIMITER: char = ';';

/// The reference code set shared by every completion of a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroundTruth {
    codes: Vec<String>,
}

impl GroundTruth {
    /// Parses one `;`-delimited reference. Blank entries are dropped and duplicates
    /// collapse onto their first occurrence.
    pub fn parse(reference: &str) -> Result<Self, RewardError> {
        let codes = dedup_preserving_order(
            reference
                .split(CODE_DELIMITER)
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string),
        );

        if codes.is_empty() {
            return Err(RewardError::EmptyGroundTruth {
                reference: reference.to_string(),
            });
        }

        Ok(Self { codes })
    }

    /// Builds the shared reference for a batch of `batch_len` completions.
    ///
    /// `references` is either a single entry or one entry per completion; in the
    /// latter case every entry must be identical, since all completions are scored
    /// against the same reference.
    pub fn from_batch<S: AsRef<str>>(
        references: &[S],
        batch_len: usize,
    ) -> Result<Self, RewardError> {
        let first = references
            .first()
            .ok_or(RewardError::MissingGroundTruth)?
            .as_ref();

        if references.len() != 1 && references.len() != batch_len {
            return Err(RewardError::BatchShapeMismatch {
                completions: batch_len,
                references: references.len(),
            });
        }

        if let Some((index, other)) = references
            .iter()
            .map(|r| r.as_ref())
            .enumerate()
            .skip(1)
            .find(|(_, r)| *r != first)
        {
            return Err(RewardError::HeterogeneousGroundTruth {
                index,
                expected: first.to_string(),
                found: other.to_string(),
            });
        }

        Self::parse(first)
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    /// Number of distinct reference codes. Never zero.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The first reference code, used by the ranked rewards.
    pub fn primary(&self) -> &str {
        &self.codes[0]
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }

    /// Distinct prefixes of the reference codes, in first-occurrence order.
    pub fn truncated(&self, prefix_length: usize) -> Vec<&str> {
        dedup_preserving_order(self.codes.iter().map(|c| truncate(c, prefix_length)))
    }
}

/// First `prefix_length` characters of `code`; shorter codes come back whole.
pub fn truncate(code: &str, prefix_length: usize) -> &str {
    code.char_indices()
        .nth(prefix_length)
        .map_or(code, |(end, _)| &code[..end])
}

/// Removes repeats, keeping the first occurrence of each item in place.
pub fn dedup_preserving_order<T, I>(items: I) -> Vec<T>
where
    T: Eq + std::hash::Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
