//! src/resolver.rs
//!
//! Resolution of free-text answers to ranked candidate codes.
//!
//! The retrieval index (embedding model, nearest-neighbour search) lives outside this
//! crate and is reached only through [`CodeRetriever`]. [`CodeResolver`] is the single
//! seam the reward functions use: it batches queries, checks the shape of what comes
//! back and turns hits into code lists.

use crate::error::RewardError;
use std::collections::HashMap;
use std::sync::Arc;
#[cfg(any(test, feature = "mock"))]
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// One retrieved document. `document_id` is the code.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub document_id: String,
    pub score: f64,
}

impl SearchHit {
    pub fn new(document_id: impl Into<String>, score: f64) -> Self {
        Self {
            document_id: document_id.into(),
            score,
        }
    }
}

/// Nearest-neighbour retrieval over the code catalogue.
///
/// Implementations return one hit list per query, in query order, each ordered by
/// decreasing relevance.
pub trait CodeRetriever: Send + Sync {
    fn search(&self, queries: &[String], k: usize) -> anyhow::Result<Vec<Vec<SearchHit>>>;
}

/// Turns extracted answers into candidate code lists via a [`CodeRetriever`].
#[derive(Clone)]
pub struct CodeResolver {
    retriever: Arc<dyn CodeRetriever>,
    dedupe_queries: bool,
}

impl CodeResolver {
    pub fn new(retriever: Arc<dyn CodeRetriever>) -> Self {
        Self {
            retriever,
            dedupe_queries: true,
        }
    }

    /// Whether identical answers within a batch are sent to the retriever once.
    pub fn with_query_dedup(mut self, enabled: bool) -> Self {
        self.dedupe_queries = enabled;
        self
    }

    /// Returns up to `k` candidate codes per answer, most relevant first.
    ///
    /// Result lists longer than `k` are cut to `k`.
    pub fn resolve<S: AsRef<str>>(
        &self,
        answers: &[S],
        k: usize,
    ) -> Result<Vec<Vec<String>>, RewardError> {
        if answers.is_empty() {
            return Ok(Vec::new());
        }
        if k == 0 {
            return Ok(vec![Vec::new(); answers.len()]);
        }

        // slot[i] is the position of answers[i] in the query list
        let (queries, slots) = if self.dedupe_queries {
            let mut positions: HashMap<&str, usize> = HashMap::new();
            let mut queries = Vec::new();
            let slots = answers
                .iter()
                .map(|answer| {
                    let answer = answer.as_ref();
                    *positions.entry(answer).or_insert_with(|| {
                        queries.push(answer.to_string());
                        queries.len() - 1
                    })
                })
                .collect::<Vec<_>>();
            (queries, slots)
        } else {
            let queries = answers
                .iter()
                .map(|a| a.as_ref().to_string())
                .collect::<Vec<_>>();
            let slots = (0..queries.len()).collect();
            (queries, slots)
        };

        debug!(
            answers = answers.len(),
            queries = queries.len(),
            k,
            "querying retrieval index"
        );

        let results = self
            .retriever
            .search(&queries, k)
            .map_err(RewardError::Retrieval)?;

        if results.len() != queries.len() {
            return Err(RewardError::RetrievalShapeMismatch {
                queries: queries.len(),
                results: results.len(),
            });
        }

        let candidates = results
            .into_iter()
            .enumerate()
            .map(|(query, hits)| {
                hits.into_iter()
                    .take(k)
                    .enumerate()
                    .map(|(rank, hit)| {
                        if hit.document_id.trim().is_empty() {
                            Err(RewardError::MalformedCandidate { query, rank })
                        } else {
                            Ok(hit.document_id)
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(slots.into_iter().map(|slot| candidates[slot].clone()).collect())
    }
}

/// Deterministic in-memory retriever: fixed candidate lists for fixed query strings.
///
/// Unknown queries return no hits. Scores decrease with rank. Counts the number of
/// `search` calls and queries it has served.
#[cfg(any(test, feature = "mock"))]
#[derive(Debug, Default)]
pub struct StaticRetriever {
    table: HashMap<String, Vec<String>>,
    calls: AtomicUsize,
    queries_served: AtomicUsize,
}

#[cfg(any(test, feature = "mock"))]
impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry<I, S>(mut self, query: impl Into<String>, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(query, codes);
        self
    }

    pub fn insert<I, S>(&mut self, query: impl Into<String>, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table
            .insert(query.into(), codes.into_iter().map(Into::into).collect());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn queries_served(&self) -> usize {
        self.queries_served.load(Ordering::Relaxed)
    }
}

#[cfg(any(test, feature = "mock"))]
impl CodeRetriever for StaticRetriever {
    fn search(&self, queries: &[String], k: usize) -> anyhow::Result<Vec<Vec<SearchHit>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.queries_served
            .fetch_add(queries.len(), Ordering::Relaxed);

        Ok(queries
            .iter()
            .map(|query| {
                self.table
                    .get(query)
                    .map(|codes| {
                        codes
                            .iter()
                            .take(k)
                            .enumerate()
                            .map(|(rank, code)| {
                                SearchHit::new(code.clone(), 1.0 / (rank + 1) as f64)
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            })
            .collect())
    }
}
