//! Reward functions for reinforcement-learning fine-tuning of a clinical coding model.
//!
//! The model answers in a `<reasoning>...</reasoning><answer>...</answer>` format. Its
//! answers are mapped to diagnosis codes through an external retrieval index and scored
//! against the reference codes of the prompt.

pub mod codes;
pub mod completion;
pub mod error;
pub mod evaluator;
pub mod extraction;
pub mod format;
pub mod resolver;
pub mod scoring;

#[cfg(feature = "python")]
mod bindings;

pub use codes::GroundTruth;
pub use completion::{Completion, Message};
pub use error::RewardError;
pub use evaluator::{EvaluatorConfig, RewardEvaluator};
pub use extraction::{Extraction, extract_answer};
pub use resolver::{CodeResolver, CodeRetriever, SearchHit};

#[cfg(any(test, feature = "mock"))]
pub use resolver::StaticRetriever;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn icdrlrewards(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<bindings::PyRewardEvaluator>()?;
    m.add_function(wrap_pyfunction!(bindings::reasoning_format_reward, m)?)?;
    m.add_function(wrap_pyfunction!(bindings::list_format_reward, m)?)?;
    m.add_function(wrap_pyfunction!(bindings::extract_answer, m)?)?;
    Ok(())
}
