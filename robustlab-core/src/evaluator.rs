//! Collaborator interfaces: candidate generation and evaluation.
//!
//! The search engine never simulates a strategy itself. It drives two
//! external collaborators:
//! - a [`Generator`] producing fresh candidates from a seed, and
//! - an [`Evaluator`] scoring candidates at a fractional budget.
//!
//! Evaluators that are plain closures, or that answer with a single result or
//! a `{ results }` wrapper, are adapted once here via [`FnEvaluator`] and
//! [`EvalResponse`], so the schedulers only ever see `Vec<EvaluationResult>`.

use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, EvaluationResult};
use crate::error::{CollaboratorError, SearchError};

/// Options passed with every evaluation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalOptions {
    /// Fraction of the full evaluation resource, in `(0, 1]`.
    pub budget: f64,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self { budget: 1.0 }
    }
}

/// Produces the initial candidate pool for a Hyperband round.
pub trait Generator {
    fn create_initial_candidates(
        &mut self,
        n: usize,
        seed: u64,
    ) -> Result<Vec<Candidate>, SearchError>;
}

/// Scores candidates at a given budget.
///
/// Results need not be in input order, and may be fewer than the inputs.
pub trait Evaluator {
    fn evaluate(
        &mut self,
        candidates: &[Candidate],
        options: &EvalOptions,
    ) -> Result<Vec<EvaluationResult>, SearchError>;
}

impl<E: Evaluator + ?Sized> Evaluator for &mut E {
    fn evaluate(
        &mut self,
        candidates: &[Candidate],
        options: &EvalOptions,
    ) -> Result<Vec<EvaluationResult>, SearchError> {
        (**self).evaluate(candidates, options)
    }
}

impl<G: Generator + ?Sized> Generator for &mut G {
    fn create_initial_candidates(
        &mut self,
        n: usize,
        seed: u64,
    ) -> Result<Vec<Candidate>, SearchError> {
        (**self).create_initial_candidates(n, seed)
    }
}

/// Heterogeneous evaluator answers, normalized at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvalResponse {
    Wrapped { results: Vec<EvaluationResult> },
    Many(Vec<EvaluationResult>),
    Single(EvaluationResult),
}

impl EvalResponse {
    pub fn into_results(self) -> Vec<EvaluationResult> {
        match self {
            EvalResponse::Wrapped { results } | EvalResponse::Many(results) => results,
            EvalResponse::Single(result) => vec![result],
        }
    }
}

impl From<Vec<EvaluationResult>> for EvalResponse {
    fn from(results: Vec<EvaluationResult>) -> Self {
        EvalResponse::Many(results)
    }
}

impl From<EvaluationResult> for EvalResponse {
    fn from(result: EvaluationResult) -> Self {
        EvalResponse::Single(result)
    }
}

/// Adapts a closure into an [`Evaluator`].
pub struct FnEvaluator<F> {
    f: F,
}

impl<F> FnEvaluator<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, R, E> Evaluator for FnEvaluator<F>
where
    F: FnMut(&[Candidate], &EvalOptions) -> Result<R, E>,
    R: Into<EvalResponse>,
    E: Into<CollaboratorError>,
{
    fn evaluate(
        &mut self,
        candidates: &[Candidate],
        options: &EvalOptions,
    ) -> Result<Vec<EvaluationResult>, SearchError> {
        (self.f)(candidates, options)
            .map(|r| r.into().into_results())
            .map_err(|e| SearchError::Evaluator(e.into()))
    }
}

/// Adapts a closure into a [`Generator`].
pub struct FnGenerator<F> {
    f: F,
}

impl<F> FnGenerator<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, E> Generator for FnGenerator<F>
where
    F: FnMut(usize, u64) -> Result<Vec<Candidate>, E>,
    E: Into<CollaboratorError>,
{
    fn create_initial_candidates(
        &mut self,
        n: usize,
        seed: u64,
    ) -> Result<Vec<Candidate>, SearchError> {
        (self.f)(n, seed).map_err(|e| SearchError::Generator(e.into()))
    }
}

/// Evaluate a single candidate and keep only the first result.
pub fn evaluate_one<E: Evaluator + ?Sized>(
    evaluator: &mut E,
    candidate: &Candidate,
    options: &EvalOptions,
) -> Result<Option<EvaluationResult>, SearchError> {
    let results = evaluator.evaluate(std::slice::from_ref(candidate), options)?;
    Ok(results.into_iter().next())
}
