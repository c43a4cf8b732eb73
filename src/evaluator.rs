//! src/evaluator.rs
//!
//! Core reward evaluation logic.

use crate::codes::GroundTruth;
use crate::completion::Completion;
use crate::error::RewardError;
use crate::extraction::Extraction;
use crate::format;
use crate::resolver::{CodeResolver, CodeRetriever};
use crate::scoring;
use anyhow::{Result, ensure};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

// ==========================================================================================

/// Configuration for `RewardEvaluator`.
#[derive(Clone, Debug)]
pub struct EvaluatorConfig {
    /// Prefix length for the family-level match reward.
    pub prefix_length: usize,

    /// Prefix length for the recall reward. Longer than `prefix_length`, so recall
    /// is judged at a more specific level.
    pub recall_prefix_length: usize,

    /// Prefix length for the ranked family-level reward.
    pub topk_prefix_length: usize,

    /// Number of candidates retrieved for the ranked rewards.
    ///
    /// The set-based rewards ask for as many candidates as there are reference codes.
    pub default_k: usize,

    /// Send identical answers within a batch to the retriever only once.
    pub dedupe_queries: bool,

    /// Number of Rayon threads for parallel scoring.
    ///
    /// - `Some(n)`: Use exactly `n` threads
    /// - `None`: Use default (number of CPU cores)
    pub num_threads: Option<usize>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            prefix_length: 6,
            recall_prefix_length: 7,
            topk_prefix_length: 3,
            default_k: 10,
            dedupe_queries: true,
            num_threads: None,
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.prefix_length > 0,
            "prefix_length must be at least 1, got {}",
            self.prefix_length
        );
        ensure!(
            self.recall_prefix_length > 0,
            "recall_prefix_length must be at least 1, got {}",
            self.recall_prefix_length
        );
        ensure!(
            self.topk_prefix_length > 0,
            "topk_prefix_length must be at least 1, got {}",
            self.topk_prefix_length
        );
        ensure!(
            self.default_k > 0,
            "default_k (candidates for ranked rewards) must be at least 1, got {}",
            self.default_k
        );
        if let Some(num_threads) = self.num_threads {
            ensure!(num_threads > 0, "num_threads must be at least 1 when set");
        }

        // Unusual but not invalid
        if self.recall_prefix_length < self.prefix_length {
            warn!(
                recall_prefix_length = self.recall_prefix_length,
                prefix_length = self.prefix_length,
                "recall is judged at a coarser prefix than prefix match"
            );
        }

        Ok(())
    }
}

// ==========================================================================================

/// Main reward evaluator.
///
/// Every reward follows the same path: extract the answer from each completion,
/// resolve the answers to ranked candidate codes through the retrieval index, then
/// score each completion against the batch ground truth. Scoring runs on the Rayon
/// pool; retrieval is one batched call per reward.
///
/// All completions of a batch share one ground-truth reference. Callers pass either
/// that single reference or one (identical) copy per completion.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use icdrlrewards::{Completion, EvaluatorConfig, RewardEvaluator, StaticRetriever};
///
/// let index = StaticRetriever::new().with_entry("[essential hypertension]", ["I10", "I15.0"]);
/// let evaluator = RewardEvaluator::with_retriever(EvaluatorConfig::default(), Arc::new(index))?;
///
/// let completions = vec![Completion::from_text("<answer>[essential hypertension]</answer>")];
/// let scores = evaluator.code_topk_reward(&completions, &["I10"])?;
/// assert_eq!(scores, vec![1.0]);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct RewardEvaluator {
    config: EvaluatorConfig,
    resolver: CodeResolver,
}

impl RewardEvaluator {
    pub fn new(config: EvaluatorConfig, resolver: CodeResolver) -> Result<Self> {
        config.validate()?;

        if let Some(num_threads) = config.num_threads {
            if let Err(err) = ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
            {
                warn!(num_threads, %err, "global rayon pool already initialized; keeping it");
            }
        }

        let resolver = resolver.with_query_dedup(config.dedupe_queries);
        Ok(Self { config, resolver })
    }

    pub fn with_retriever(
        config: EvaluatorConfig,
        retriever: Arc<dyn CodeRetriever>,
    ) -> Result<Self> {
        Self::new(config, CodeResolver::new(retriever))
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// 0.5 per message record with a non-empty `<reasoning>` region.
    pub fn reasoning_format_reward(&self, completions: &[Completion]) -> Vec<f64> {
        format::reasoning_format_reward(completions)
    }

    /// 0.5 per completion whose answer is a bracketed comma-delimited list.
    pub fn list_format_reward(&self, completions: &[Completion]) -> Vec<f64> {
        format::list_format_reward(completions)
    }

    /// Share of the reference codes found among the top |reference| candidates,
    /// rounded to three decimals.
    #[instrument(skip_all, fields(batch = completions.len()))]
    pub fn code_match_reward<S: AsRef<str>>(
        &self,
        completions: &[Completion],
        ground_truth: &[S],
    ) -> Result<Vec<f64>, RewardError> {
        let reference = GroundTruth::from_batch(ground_truth, completions.len())?;
        let candidates = self.candidates(completions, reference.len())?;
        Ok(score_batch(&candidates, |c| {
            scoring::overlap_score(c, &reference)
        }))
    }

    /// 1.0 if any of the top |reference| candidates is a reference code, else 0.0.
    #[instrument(skip_all, fields(batch = completions.len()))]
    pub fn code_any_match_reward<S: AsRef<str>>(
        &self,
        completions: &[Completion],
        ground_truth: &[S],
    ) -> Result<Vec<f64>, RewardError> {
        let reference = GroundTruth::from_batch(ground_truth, completions.len())?;
        let candidates = self.candidates(completions, reference.len())?;
        Ok(score_batch(&candidates, |c| {
            scoring::any_match_score(c, &reference)
        }))
    }

    /// Family-level recall at the configured `prefix_length`, rounded to three decimals.
    pub fn code_prefix_match_reward<S: AsRef<str>>(
        &self,
        completions: &[Completion],
        ground_truth: &[S],
    ) -> Result<Vec<f64>, RewardError> {
        self.code_prefix_match_reward_at(completions, ground_truth, self.config.prefix_length)
    }

    #[instrument(skip(self, completions, ground_truth), fields(batch = completions.len()))]
    pub fn code_prefix_match_reward_at<S: AsRef<str>>(
        &self,
        completions: &[Completion],
        ground_truth: &[S],
        prefix_length: usize,
    ) -> Result<Vec<f64>, RewardError> {
        if prefix_length == 0 {
            return Err(RewardError::ZeroPrefixLength);
        }
        let reference = GroundTruth::from_batch(ground_truth, completions.len())?;
        let candidates = self.candidates(completions, reference.len())?;
        Ok(score_batch(&candidates, |c| {
            scoring::round3(scoring::prefix_recall(c, &reference, prefix_length))
        }))
    }

    /// Set recall of reference prefixes at the configured `recall_prefix_length`.
    pub fn recall_reward<S: AsRef<str>>(
        &self,
        completions: &[Completion],
        ground_truth: &[S],
    ) -> Result<Vec<f64>, RewardError> {
        self.recall_reward_at(completions, ground_truth, self.config.recall_prefix_length)
    }

    #[instrument(skip(self, completions, ground_truth), fields(batch = completions.len()))]
    pub fn recall_reward_at<S: AsRef<str>>(
        &self,
        completions: &[Completion],
        ground_truth: &[S],
        prefix_length: usize,
    ) -> Result<Vec<f64>, RewardError> {
        if prefix_length == 0 {
            return Err(RewardError::ZeroPrefixLength);
        }
        let reference = GroundTruth::from_batch(ground_truth, completions.len())?;
        let candidates = self.candidates(completions, reference.len())?;
        Ok(score_batch(&candidates, |c| {
            scoring::prefix_recall(c, &reference, prefix_length)
        }))
    }

    /// Reciprocal rank of the first exact match of the primary reference code among
    /// `default_k` candidates.
    #[instrument(skip_all, fields(batch = completions.len()))]
    pub fn code_topk_reward<S: AsRef<str>>(
        &self,
        completions: &[Completion],
        ground_truth: &[S],
    ) -> Result<Vec<f64>, RewardError> {
        let reference = GroundTruth::from_batch(ground_truth, completions.len())?;
        let target = reference.primary();
        let candidates = self.candidates(completions, self.config.default_k)?;
        Ok(score_batch(&candidates, |c| {
            scoring::exact_rank_score(c, target)
        }))
    }

    /// Reciprocal rank of the first candidate sharing the primary reference code's
    /// `topk_prefix_length` prefix.
    #[instrument(skip_all, fields(batch = completions.len()))]
    pub fn code_topk_prefix_reward<S: AsRef<str>>(
        &self,
        completions: &[Completion],
        ground_truth: &[S],
    ) -> Result<Vec<f64>, RewardError> {
        let reference = GroundTruth::from_batch(ground_truth, completions.len())?;
        let target = reference.primary();
        let prefix_length = self.config.topk_prefix_length;
        let candidates = self.candidates(completions, self.config.default_k)?;
        Ok(score_batch(&candidates, |c| {
            scoring::prefix_rank_score(c, target, prefix_length)
        }))
    }

    /// Extracts every completion's answer and resolves it to at most `k` candidates.
    fn candidates(
        &self,
        completions: &[Completion],
        k: usize,
    ) -> Result<Vec<Vec<String>>, RewardError> {
        let extractions: Vec<Extraction<'_>> = completions
            .iter()
            .map(|c| Extraction::parse(c.primary_content()))
            .collect();

        let degraded = extractions.iter().filter(|e| !e.is_tagged()).count();
        if degraded > 0 {
            debug!(degraded, "answers extracted without a complete <answer> pair");
        }

        let answers: Vec<&str> = extractions.iter().map(Extraction::text).collect();
        self.resolver.resolve(&answers, k)
    }
}

fn score_batch<F>(candidates: &[Vec<String>], score: F) -> Vec<f64>
where
    F: Fn(&[String]) -> f64 + Sync,
{
    candidates.par_iter().map(|c| score(c.as_slice())).collect()
}
