//! src/bindings.rs
//!
//! Python bindings. The reward methods follow TRL's reward-function signature
//! `(completions, **kwargs) -> list[float]`, so they can be registered directly.
//!
//! # Examples
//! ```python
//! from ragatouille import RAGPretrainedModel
//! from icdrlrewards import RewardEvaluator, reasoning_format_reward, list_format_reward
//!
//! index = RAGPretrainedModel.from_index(".ragatouille/colbert/indexes/icd_cm")
//! evaluator = RewardEvaluator(index, ground_truth_key="gt_codes")
//! reward_funcs = [
//!     reasoning_format_reward,
//!     list_format_reward,
//!     evaluator.code_match_reward,
//!     evaluator.code_prefix_match_reward,
//!     evaluator.code_topk_reward,
//!     evaluator.code_topk_prefix_reward,
//! ]
//! ```

use crate::completion::{Completion, Message};
use crate::error::RewardError;
use crate::evaluator::{EvaluatorConfig, RewardEvaluator};
use crate::format;
use crate::resolver::{CodeResolver, CodeRetriever, SearchHit};
use anyhow::{Context, anyhow};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use std::sync::Arc;

/// Retrieval index implemented in Python.
///
/// Any object with `search(queries: list[str], k: int)` returning, per query, a list of
/// dicts carrying `document_id` (and optionally `score`).
struct PyRetriever {
    index: Py<PyAny>,
}

impl CodeRetriever for PyRetriever {
    fn search(&self, queries: &[String], k: usize) -> anyhow::Result<Vec<Vec<SearchHit>>> {
        Python::attach(|py| {
            let kwargs = PyDict::new(py);
            kwargs.set_item("k", k)?;
            let raw = self
                .index
                .bind(py)
                .call_method("search", (queries.to_vec(),), Some(&kwargs))
                .context("index.search raised")?;
            parse_search_results(&raw, queries.len())
        })
    }
}

/// Accepts a list of hit lists, or a flat hit list when there was a single query.
fn parse_search_results(
    raw: &Bound<'_, PyAny>,
    expected: usize,
) -> anyhow::Result<Vec<Vec<SearchHit>>> {
    let outer = raw
        .downcast::<PyList>()
        .map_err(|_| anyhow!("index.search must return a list"))?;

    let flat = expected == 1
        && outer
            .iter()
            .next()
            .is_some_and(|first| first.downcast::<PyDict>().is_ok());
    if flat {
        return Ok(vec![parse_hits(outer.as_any())?]);
    }

    outer.iter().map(|hits| parse_hits(&hits)).collect()
}

fn parse_hits(raw: &Bound<'_, PyAny>) -> anyhow::Result<Vec<SearchHit>> {
    let hits = raw
        .downcast::<PyList>()
        .map_err(|_| anyhow!("each search result must be a list of hits"))?;

    let mut result = Vec::with_capacity(hits.len());
    for (rank, hit) in hits.iter().enumerate() {
        let hit = hit
            .downcast::<PyDict>()
            .map_err(|_| anyhow!("hit {rank} must be a dict"))?;

        // Missing or None ids become blank and are rejected by the resolver
        let document_id = match hit.get_item("document_id")? {
            Some(id) if !id.is_none() => id.extract::<String>().map_err(|_| {
                anyhow!("hit {rank} has a non-string document_id: {id}")
            })?,
            _ => String::new(),
        };
        let score = match hit.get_item("score")? {
            Some(score) if !score.is_none() => score
                .extract::<f64>()
                .map_err(|_| anyhow!("hit {rank} has a non-numeric score: {score}"))?,
            _ => 0.0,
        };
        result.push(SearchHit { document_id, score });
    }

    Ok(result)
}

fn to_py_err(err: RewardError) -> PyErr {
    if err.is_retrieval() {
        PyRuntimeError::new_err(err.to_string())
    } else {
        PyValueError::new_err(err.to_string())
    }
}

/// Python-facing reward evaluator class
#[pyclass(name = "RewardEvaluator")]
pub struct PyRewardEvaluator {
    evaluator: RewardEvaluator,
    ground_truth_key: String,
}

#[pymethods]
impl PyRewardEvaluator {
    #[new]
    #[pyo3(signature = (
        index,
        ground_truth_key="gt_codes".to_string(),
        prefix_length=6,
        recall_prefix_length=7,
        topk_prefix_length=3,
        default_k=10,
        dedupe_queries=true,
        num_threads=None,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        index: Py<PyAny>,
        ground_truth_key: String,
        prefix_length: usize,
        recall_prefix_length: usize,
        topk_prefix_length: usize,
        default_k: usize,
        dedupe_queries: bool,
        num_threads: Option<usize>,
    ) -> PyResult<Self> {
        let config = EvaluatorConfig {
            prefix_length,
            recall_prefix_length,
            topk_prefix_length,
            default_k,
            dedupe_queries,
            num_threads,
        };

        let resolver = CodeResolver::new(Arc::new(PyRetriever { index }));
        let evaluator = RewardEvaluator::new(config, resolver)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;

        Ok(Self {
            evaluator,
            ground_truth_key,
        })
    }

    #[pyo3(signature = (completions, **_kwargs))]
    fn reasoning_format_reward(
        &self,
        completions: &Bound<'_, PyList>,
        _kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Vec<f64>> {
        let completions = extract_completions_from_pylist(completions)?;
        Ok(self.evaluator.reasoning_format_reward(&completions))
    }

    #[pyo3(signature = (completions, **_kwargs))]
    fn list_format_reward(
        &self,
        completions: &Bound<'_, PyList>,
        _kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Vec<f64>> {
        let completions = extract_completions_from_pylist(completions)?;
        Ok(self.evaluator.list_format_reward(&completions))
    }

    #[pyo3(signature = (completions, **kwargs))]
    fn code_match_reward(
        &self,
        completions: &Bound<'_, PyList>,
        kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Vec<f64>> {
        let (completions, ground_truth) = self.batch(completions, kwargs)?;
        self.evaluator
            .code_match_reward(&completions, &ground_truth)
            .map_err(to_py_err)
    }

    #[pyo3(signature = (completions, **kwargs))]
    fn code_any_match_reward(
        &self,
        completions: &Bound<'_, PyList>,
        kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Vec<f64>> {
        let (completions, ground_truth) = self.batch(completions, kwargs)?;
        self.evaluator
            .code_any_match_reward(&completions, &ground_truth)
            .map_err(to_py_err)
    }

    #[pyo3(signature = (completions, **kwargs))]
    fn code_prefix_match_reward(
        &self,
        completions: &Bound<'_, PyList>,
        kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Vec<f64>> {
        let (completions, ground_truth) = self.batch(completions, kwargs)?;
        self.evaluator
            .code_prefix_match_reward(&completions, &ground_truth)
            .map_err(to_py_err)
    }

    #[pyo3(signature = (completions, **kwargs))]
    fn recall_reward(
        &self,
        completions: &Bound<'_, PyList>,
        kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Vec<f64>> {
        let (completions, ground_truth) = self.batch(completions, kwargs)?;
        self.evaluator
            .recall_reward(&completions, &ground_truth)
            .map_err(to_py_err)
    }

    #[pyo3(signature = (completions, **kwargs))]
    fn code_topk_reward(
        &self,
        completions: &Bound<'_, PyList>,
        kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Vec<f64>> {
        let (completions, ground_truth) = self.batch(completions, kwargs)?;
        self.evaluator
            .code_topk_reward(&completions, &ground_truth)
            .map_err(to_py_err)
    }

    #[pyo3(signature = (completions, **kwargs))]
    fn code_topk_prefix_reward(
        &self,
        completions: &Bound<'_, PyList>,
        kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Vec<f64>> {
        let (completions, ground_truth) = self.batch(completions, kwargs)?;
        self.evaluator
            .code_topk_prefix_reward(&completions, &ground_truth)
            .map_err(to_py_err)
    }
}

impl PyRewardEvaluator {
    fn batch(
        &self,
        completions: &Bound<'_, PyList>,
        kwargs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<(Vec<Completion>, Vec<String>)> {
        let completions = extract_completions_from_pylist(completions)?;
        let ground_truth = extract_ground_truth(kwargs, &self.ground_truth_key)?;
        Ok((completions, ground_truth))
    }
}

/// Helper function to extract completions from various input formats
fn extract_completions_from_pylist(completions: &Bound<'_, PyList>) -> PyResult<Vec<Completion>> {
    let mut result = Vec::with_capacity(completions.len());

    for item in completions.iter() {
        let completion = if let Ok(s) = item.extract::<String>() {
            // Direct string
            Completion::from_text(s)
        } else if let Ok(dict) = item.downcast::<PyDict>() {
            // Single {"content": ...} record
            Completion::new(vec![message_from_dict(dict)?])
        } else if let Ok(list) = item.downcast::<PyList>() {
            // List of message records
            let mut messages = Vec::with_capacity(list.len());
            for record in list.iter() {
                let message = if let Ok(dict) = record.downcast::<PyDict>() {
                    message_from_dict(dict)?
                } else {
                    Message::new(record.str()?.to_string())
                };
                messages.push(message);
            }
            Completion::new(messages)
        } else {
            // Fallback: convert to string
            Completion::from_text(item.str()?.to_string())
        };

        result.push(completion);
    }

    Ok(result)
}

fn message_from_dict(dict: &Bound<'_, PyDict>) -> PyResult<Message> {
    let content = dict
        .get_item("content")?
        .and_then(|v| v.extract::<String>().ok())
        .unwrap_or_default();
    Ok(Message::new(content))
}

/// Reads the batch reference list passed by the training loop under `key`.
///
/// A bare string counts as a single shared reference.
fn extract_ground_truth(kwargs: Option<&Bound<'_, PyDict>>, key: &str) -> PyResult<Vec<String>> {
    let value = kwargs
        .map(|kwargs| kwargs.get_item(key))
        .transpose()?
        .flatten()
        .ok_or_else(|| {
            PyValueError::new_err(format!("missing ground-truth keyword argument '{key}'"))
        })?;

    if let Ok(reference) = value.extract::<String>() {
        return Ok(vec![reference]);
    }

    value.extract::<Vec<String>>().map_err(|_| {
        PyValueError::new_err(format!(
            "ground-truth keyword argument '{key}' must be a string or a list of strings"
        ))
    })
}

/// Extract the answer segment of a completion string.
#[pyfunction]
pub fn extract_answer(completion: &str) -> String {
    crate::extraction::extract_answer(completion)
}

/// Module-level reasoning-format reward (needs no retrieval index)
#[pyfunction]
#[pyo3(signature = (completions, **_kwargs))]
pub fn reasoning_format_reward(
    completions: &Bound<'_, PyList>,
    _kwargs: Option<&Bound<'_, PyDict>>,
) -> PyResult<Vec<f64>> {
    let completions = extract_completions_from_pylist(completions)?;
    Ok(format::reasoning_format_reward(&completions))
}

/// Module-level list-format reward (needs no retrieval index)
#[pyfunction]
#[pyo3(signature = (completions, **_kwargs))]
pub fn list_format_reward(
    completions: &Bound<'_, PyList>,
    _kwargs: Option<&Bound<'_, PyDict>>,
) -> PyResult<Vec<f64>> {
    let completions = extract_completions_from_pylist(completions)?;
    Ok(format::list_format_reward(&completions))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_SOURCE: &std::ffi::CStr = c"
class Index:
    def __init__(self, hits):
        self.hits = hits

    def search(self, queries, k=10):
        return [self.hits[:k] for _ in queries]
";

    fn hit<'py>(py: Python<'py>, id: &str, score: f64) -> PyResult<Bound<'py, PyDict>> {
        let hit = PyDict::new(py);
        hit.set_item("document_id", id)?;
        hit.set_item("score", score)?;
        Ok(hit)
    }

    /// Resolves one query against a Python index returning `hits` for every query.
    fn resolve_with_hits<F>(build_hits: F) -> Result<Vec<Vec<String>>, RewardError>
    where
        F: FnOnce(Python<'_>) -> PyResult<Py<PyList>>,
    {
        Python::initialize();
        let index = Python::attach(|py| -> PyResult<Py<PyAny>> {
            let module = PyModule::from_code(py, INDEX_SOURCE, c"index.py", c"index")?;
            let hits = build_hits(py)?;
            Ok(module.getattr("Index")?.call1((hits,))?.unbind())
        })
        .unwrap();

        CodeResolver::new(Arc::new(PyRetriever { index })).resolve(&["[asthma]"], 5)
    }

    #[test]
    fn accepts_nested_and_flat_result_lists() -> PyResult<()> {
        Python::initialize();
        Python::attach(|py| {
            let hits = PyList::empty(py);
            hits.append(hit(py, "J45.909", 0.9)?)?;
            hits.append(hit(py, "J45.20", 0.7)?)?;

            let nested = PyList::empty(py);
            nested.append(&hits)?;
            nested.append(PyList::empty(py))?;
            let parsed = parse_search_results(nested.as_any(), 2).unwrap();
            assert_eq!(parsed.len(), 2);
            assert_eq!(parsed[0][1], SearchHit::new("J45.20", 0.7));
            assert!(parsed[1].is_empty());

            let flat = parse_search_results(hits.as_any(), 1).unwrap();
            assert_eq!(
                flat,
                vec![vec![
                    SearchHit::new("J45.909", 0.9),
                    SearchHit::new("J45.20", 0.7)
                ]]
            );

            // Not a list at all
            assert!(parse_search_results(hit(py, "J45.909", 0.9)?.as_any(), 1).is_err());
            Ok(())
        })
    }

    #[test]
    fn python_index_results_reach_the_resolver() {
        let candidates = resolve_with_hits(|py| {
            let hits = PyList::empty(py);
            hits.append(hit(py, "J45.909", 0.9)?)?;
            hits.append(hit(py, "J45.20", 0.7)?)?;
            Ok(hits.unbind())
        })
        .unwrap();
        assert_eq!(
            candidates,
            vec![vec!["J45.909".to_string(), "J45.20".to_string()]]
        );
    }

    #[test]
    fn missing_document_id_is_a_malformed_candidate() {
        let err = resolve_with_hits(|py| {
            let hits = PyList::empty(py);
            hits.append(hit(py, "J45.909", 0.9)?)?;
            let missing = PyDict::new(py);
            missing.set_item("score", 0.5)?;
            hits.append(missing)?;
            Ok(hits.unbind())
        })
        .unwrap_err();
        assert!(matches!(err, RewardError::MalformedCandidate { query: 0, rank: 1 }));
    }

    #[test]
    fn none_document_id_is_a_malformed_candidate() {
        let err = resolve_with_hits(|py| {
            let none_id = PyDict::new(py);
            none_id.set_item("document_id", py.None())?;
            let hits = PyList::empty(py);
            hits.append(none_id)?;
            Ok(hits.unbind())
        })
        .unwrap_err();
        assert!(matches!(err, RewardError::MalformedCandidate { query: 0, rank: 0 }));
    }

    #[test]
    fn non_string_ids_and_scores_fail_retrieval() {
        let err = resolve_with_hits(|py| {
            let numeric_id = PyDict::new(py);
            numeric_id.set_item("document_id", 4590)?;
            let hits = PyList::empty(py);
            hits.append(numeric_id)?;
            Ok(hits.unbind())
        })
        .unwrap_err();
        assert!(matches!(err, RewardError::Retrieval(_)));
        assert!(err.to_string().contains("non-string document_id"));

        let err = resolve_with_hits(|py| {
            let bad_score = PyDict::new(py);
            bad_score.set_item("document_id", "J45.909")?;
            bad_score.set_item("score", "high")?;
            let hits = PyList::empty(py);
            hits.append(bad_score)?;
            Ok(hits.unbind())
        })
        .unwrap_err();
        assert!(matches!(err, RewardError::Retrieval(_)));
        assert!(err.to_string().contains("non-numeric score"));
    }

    #[test]
    fn ground_truth_from_string_or_list() -> PyResult<()> {
        Python::initialize();
        Python::attach(|py| {
            let kwargs = PyDict::new(py);
            kwargs.set_item("gt_codes", "I10;E11.9")?;
            assert_eq!(
                extract_ground_truth(Some(&kwargs), "gt_codes")?,
                vec!["I10;E11.9".to_string()]
            );

            kwargs.set_item("gt_codes", vec!["I10;E11.9", "I10;E11.9"])?;
            assert_eq!(extract_ground_truth(Some(&kwargs), "gt_codes")?.len(), 2);

            kwargs.set_item("gt_codes", 42)?;
            assert!(extract_ground_truth(Some(&kwargs), "gt_codes").is_err());
            assert!(extract_ground_truth(Some(&kwargs), "answer").is_err());
            assert!(extract_ground_truth(None, "gt_codes").is_err());
            Ok(())
        })
    }

    #[test]
    fn completions_from_strings_dicts_and_message_lists() -> PyResult<()> {
        Python::initialize();
        Python::attach(|py| {
            let single = PyDict::new(py);
            single.set_item("content", "<answer>[I10]</answer>")?;

            let first = PyDict::new(py);
            first.set_item("role", "assistant")?;
            first.set_item("content", "<reasoning>bp</reasoning>")?;
            let second = PyDict::new(py);
            second.set_item("content", "<answer>[E11.9]</answer>")?;
            let messages = PyList::empty(py);
            messages.append(first)?;
            messages.append(second)?;

            let completions = PyList::empty(py);
            completions.append("<answer>[J45.909]</answer>")?;
            completions.append(single)?;
            completions.append(messages)?;
            completions.append(PyList::empty(py))?;

            let parsed = extract_completions_from_pylist(&completions)?;
            assert_eq!(parsed.len(), 4);
            assert_eq!(parsed[0].primary_content(), "<answer>[J45.909]</answer>");
            assert_eq!(parsed[1].primary_content(), "<answer>[I10]</answer>");
            assert_eq!(parsed[2].messages().len(), 2);
            assert_eq!(parsed[2].primary_content(), "<reasoning>bp</reasoning>");
            assert_eq!(parsed[3].primary_content(), "");

            assert_eq!(format::reasoning_format_reward(&parsed), vec![0.0, 0.0, 0.5, 0.0]);
            Ok(())
        })
    }
}
