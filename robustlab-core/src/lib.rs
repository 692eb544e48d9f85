//! RobustLab Core — budget-aware parameter search.
//!
//! This crate drives externally supplied evaluators; it never simulates a
//! strategy itself. It provides:
//! - Domain types (candidates, evaluation results, parameter bounds)
//! - Generator / Evaluator collaborator traits
//! - Deterministic LCG for per-round re-seeding
//! - Hyperband / successive-halving budget scheduler
//! - SPSA local refinement
//! - RBF surrogate for cheap score prediction

pub mod candidate;
pub mod error;
pub mod evaluator;
pub mod hyperband;
pub mod rng;
pub mod spsa;
pub mod surrogate;

pub use candidate::{
    objective_value, Candidate, EvaluationResult, ParamBound, ParamKind, STABILITY_SCORE_KEY,
};
pub use error::{CollaboratorError, SearchError};
pub use evaluator::{EvalOptions, EvalResponse, Evaluator, FnEvaluator, FnGenerator, Generator};
pub use hyperband::{
    build_budget_levels, run_hyperband, run_hyperband_with_rng, HyperbandConfig,
    HyperbandProgress,
};
pub use rng::SeededRng;
pub use spsa::{run_spsa, NamedCodec, SearchSpace, SpsaConfig, SpsaOutcome, SpsaProgress, VectorCodec};
pub use surrogate::RbfSurrogate;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: public value types are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Candidate>();
        require_sync::<Candidate>();
        require_send::<EvaluationResult>();
        require_sync::<EvaluationResult>();
        require_send::<HyperbandConfig>();
        require_sync::<HyperbandConfig>();
        require_send::<HyperbandProgress>();
        require_sync::<HyperbandProgress>();
        require_send::<SpsaConfig>();
        require_sync::<SpsaConfig>();
        require_send::<SpsaOutcome>();
        require_sync::<SpsaOutcome>();
        require_send::<SearchSpace>();
        require_sync::<SearchSpace>();
        require_send::<RbfSurrogate>();
        require_sync::<RbfSurrogate>();
        require_send::<SearchError>();
        require_sync::<SearchError>();
    }
}
