//! Errors raised by the search engine.

use thiserror::Error;

/// Boxed error returned by an external evaluator or generator.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from Hyperband and SPSA.
///
/// Configuration and shape errors are raised before the first evaluation.
/// Collaborator failures are passed through unchanged; nothing is retried.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search config: {0}")]
    InvalidConfig(String),
    #[error("search space has no dimensions")]
    EmptySpace,
    #[error("encoded vector has {actual} dimensions, bounds define {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("generator failed: {0}")]
    Generator(#[source] CollaboratorError),
    #[error("evaluator failed: {0}")]
    Evaluator(#[source] CollaboratorError),
}
