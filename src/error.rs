//! src/error.rs

use thiserror::Error;

/// Errors that abort scoring of a batch.
///
/// Malformed model output is never an error: it simply scores zero. These variants
/// cover broken contracts with the training loop or the retrieval index, where any
/// number returned would be a wrong reward.
#[derive(Debug, Error)]
pub enum RewardError {
    /// The batch carried no ground-truth reference at all.
    #[error("no ground-truth reference supplied for the batch")]
    MissingGroundTruth,

    /// The reference parsed to zero codes.
    #[error("ground-truth reference {reference:?} contains no codes")]
    EmptyGroundTruth {
        /// Raw reference string.
        reference: String,
    },

    /// References differ within a batch that must share one.
    #[error("ground-truth reference at index {index} ({found:?}) differs from the batch reference ({expected:?})")]
    HeterogeneousGroundTruth {
        index: usize,
        expected: String,
        found: String,
    },

    /// Reference list length matches neither one nor the completion count.
    #[error("batch has {completions} completions but {references} ground-truth references")]
    BatchShapeMismatch {
        completions: usize,
        references: usize,
    },

    /// A prefix length of zero would make every code match every other.
    #[error("prefix length must be at least 1")]
    ZeroPrefixLength,

    /// The retriever answered a different number of queries than it was asked.
    #[error("retriever returned {results} result lists for {queries} queries")]
    RetrievalShapeMismatch { queries: usize, results: usize },

    /// A retrieved hit had no usable code.
    #[error("retriever returned a hit without a document id (query {query}, rank {rank})")]
    MalformedCandidate { query: usize, rank: usize },

    /// The retriever itself failed.
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),
}

impl RewardError {
    /// True for failures of the retrieval collaborator, false for contract violations
    /// by the caller.
    pub fn is_retrieval(&self) -> bool {
        matches!(
            self,
            RewardError::RetrievalShapeMismatch { .. }
                | RewardError::MalformedCandidate { .. }
                | RewardError::Retrieval(_)
        )
    }
}
