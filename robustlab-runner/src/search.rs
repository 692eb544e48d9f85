//! End-to-end search over a built-in benchmark objective.
//!
//! Wires the core engine together the way an external orchestrator would:
//! Hyperband picks a winner across budget levels, an optional RBF surrogate
//! pre-screens each Hyperband batch so only the most promising share is
//! evaluated live, and SPSA refines the winner at full budget.

use std::cmp::Ordering;
use std::f64::consts::PI;
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use robustlab_core::{
    objective_value, run_hyperband, run_spsa, Candidate, EvalOptions, EvaluationResult, Evaluator,
    Generator, HyperbandProgress, NamedCodec, ParamBound, RbfSurrogate, SearchError, SearchSpace,
    SeededRng, SpsaOutcome, SpsaProgress, VectorCodec,
};

use crate::config::{SearchConfig, SurrogateSettings};

/// Raw-metric key marking a result the surrogate screened out.
pub const SCREENED_KEY: &str = "surrogate_screened";
/// Raw-metric key holding the benchmark loss.
pub const LOSS_KEY: &str = "loss";

// ─── Benchmark objective ─────────────────────────────────────────────

/// Synthetic loss surfaces used to exercise the search engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkObjective {
    /// `Σ x²`, a single smooth basin at the origin.
    #[default]
    Sphere,
    /// `10n + Σ (x² − 10 cos 2πx)`, many local minima, global at the origin.
    Rastrigin,
}

impl BenchmarkObjective {
    /// Loss at `values` (lower is better).
    pub fn loss(self, values: &[f64]) -> f64 {
        match self {
            BenchmarkObjective::Sphere => values.iter().map(|x| x * x).sum(),
            BenchmarkObjective::Rastrigin => {
                10.0 * values.len() as f64
                    + values
                        .iter()
                        .map(|x| x * x - 10.0 * (2.0 * PI * x).cos())
                        .sum::<f64>()
            }
        }
    }

    /// Score at a partial budget: the negated loss, worsened by a
    /// deterministic distortion that vanishes at full budget. Never above
    /// the full-budget score.
    pub fn score(self, values: &[f64], budget: f64) -> f64 {
        let wobble = 0.5 * (1.0 + (3.0 * values.iter().sum::<f64>()).sin());
        -self.loss(values) * (1.0 + (1.0 - budget.clamp(0.0, 1.0)) * wobble)
    }
}

/// Uniform random candidates inside the bounds.
#[derive(Debug, Clone)]
pub struct BenchmarkGenerator {
    bounds: Vec<(String, ParamBound)>,
}

impl BenchmarkGenerator {
    pub fn new(space: &SearchSpace) -> Self {
        Self {
            bounds: space
                .bounds()
                .iter()
                .map(|(name, bound)| (name.clone(), *bound))
                .collect(),
        }
    }
}

impl Generator for BenchmarkGenerator {
    fn create_initial_candidates(&mut self, n: usize, seed: u64) -> Result<Vec<Candidate>, SearchError> {
        let mut rng = SeededRng::new(seed);
        Ok((0..n)
            .map(|_| {
                self.bounds
                    .iter()
                    .map(|(name, bound)| {
                        let raw = bound.min + rng.next_unit() * (bound.max - bound.min);
                        (name.clone(), bound.clamp(raw))
                    })
                    .collect()
            })
            .collect())
    }
}

/// Live evaluator over a benchmark objective; counts every evaluation.
#[derive(Debug, Clone)]
pub struct BenchmarkEvaluator {
    objective: BenchmarkObjective,
    codec: NamedCodec,
    evaluations: usize,
}

impl BenchmarkEvaluator {
    pub fn new(objective: BenchmarkObjective, space: &SearchSpace) -> Self {
        Self {
            objective,
            codec: NamedCodec::for_space(space),
            evaluations: 0,
        }
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }
}

impl Evaluator for BenchmarkEvaluator {
    fn evaluate(
        &mut self,
        candidates: &[Candidate],
        options: &EvalOptions,
    ) -> Result<Vec<EvaluationResult>, SearchError> {
        self.evaluations += candidates.len();
        Ok(candidates
            .iter()
            .map(|c| {
                let values: Vec<f64> = self
                    .codec
                    .encode(c)
                    .into_iter()
                    .map(|v| if v.is_finite() { v } else { 0.0 })
                    .collect();
                EvaluationResult::new(c.clone(), self.objective.score(&values, options.budget))
                    .with_metric(LOSS_KEY, self.objective.loss(&values))
            })
            .collect())
    }
}

// ─── Surrogate screening ─────────────────────────────────────────────

/// Evaluator wrapper that consults an RBF surrogate before spending live
/// evaluations.
///
/// Until `warmup` live observations exist every candidate is evaluated.
/// Afterwards candidates are ranked by predicted score and only the top
/// `keep_fraction` (at least one) reach the inner evaluator; the rest come
/// back as unusable results tagged with [`SCREENED_KEY`].
pub struct ScreenedEvaluator<E> {
    inner: E,
    surrogate: RbfSurrogate,
    codec: NamedCodec,
    settings: SurrogateSettings,
    screened_out: usize,
}

impl<E: Evaluator> ScreenedEvaluator<E> {
    pub fn new(inner: E, space: &SearchSpace, settings: SurrogateSettings) -> Self {
        let surrogate = match settings.gamma {
            Some(g) => RbfSurrogate::with_gamma(g),
            None => RbfSurrogate::new(),
        };
        Self {
            inner,
            surrogate,
            codec: NamedCodec::for_space(space),
            settings,
            screened_out: 0,
        }
    }

    pub fn inner_mut(&mut self) -> &mut E {
        &mut self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    pub fn screened_out(&self) -> usize {
        self.screened_out
    }

    pub fn surrogate(&self) -> &RbfSurrogate {
        &self.surrogate
    }

    fn live_count(&self, n: usize) -> usize {
        if n == 0 || !self.settings.enabled || self.surrogate.size() < self.settings.warmup {
            return n;
        }
        ((n as f64 * self.settings.keep_fraction).ceil() as usize).clamp(1, n)
    }
}

impl<E: Evaluator> Evaluator for ScreenedEvaluator<E> {
    fn evaluate(
        &mut self,
        candidates: &[Candidate],
        options: &EvalOptions,
    ) -> Result<Vec<EvaluationResult>, SearchError> {
        let n = candidates.len();
        let keep = self.live_count(n);

        let mut order: Vec<usize> = (0..n).collect();
        if keep < n {
            let predicted: Vec<f64> = candidates
                .iter()
                .map(|c| self.surrogate.predict(&self.codec.encode(c)))
                .collect();
            order.sort_by(|&a, &b| predicted[b].partial_cmp(&predicted[a]).unwrap_or(Ordering::Equal));
        }

        let live: Vec<Candidate> = order[..keep].iter().map(|&i| candidates[i].clone()).collect();
        let mut results = self.inner.evaluate(&live, options)?;
        if self.settings.enabled {
            for r in &results {
                self.surrogate.add(&self.codec.encode(&r.candidate), r.objective_value);
            }
        }

        if keep < n {
            debug!(live = keep, screened = n - keep, budget = options.budget, "surrogate screened batch");
            self.screened_out += n - keep;
            results.extend(
                order[keep..]
                    .iter()
                    .map(|&i| EvaluationResult::unusable(candidates[i].clone()).with_metric(SCREENED_KEY, 1.0)),
            );
        }
        Ok(results)
    }
}

// ─── Orchestration ───────────────────────────────────────────────────

/// Progress across both search phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SearchProgress {
    Hyperband(HyperbandProgress),
    Spsa(SpsaProgress),
}

/// Outcome of [`run_search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    /// Best result across both phases.
    pub best: Option<EvaluationResult>,
    pub hyperband_best: Option<EvaluationResult>,
    pub refinement: Option<SpsaOutcome>,
    pub live_evaluations: usize,
    pub screened_out: usize,
    pub surrogate_samples: usize,
}

/// Run Hyperband, then optionally SPSA, over the configured benchmark.
pub fn run_search(
    config: &SearchConfig,
    progress_cb: Option<&dyn Fn(&SearchProgress)>,
    cancel: Option<&AtomicBool>,
) -> Result<SearchReport, SearchError> {
    let space = SearchSpace::new(config.bounds.clone());
    if space.is_empty() {
        return Err(SearchError::EmptySpace);
    }

    let mut generator = BenchmarkGenerator::new(&space);
    let live = BenchmarkEvaluator::new(config.objective, &space);
    let mut evaluator = ScreenedEvaluator::new(live, &space, config.surrogate.clone());

    let hb_cb = progress_cb.map(|cb| move |p: &HyperbandProgress| cb(&SearchProgress::Hyperband(p.clone())));
    let hyperband_best = run_hyperband(
        &config.hyperband,
        &mut generator,
        &mut evaluator,
        objective_value,
        hb_cb.as_ref().map(|f| f as &dyn Fn(&HyperbandProgress)),
        cancel,
    )?;

    let refinement = match (&hyperband_best, config.refine) {
        (Some(start), true) => {
            let codec = NamedCodec::for_space(&space);
            let mut rng = SeededRng::new(config.hyperband.seed.wrapping_add(1));
            let spsa_cb = progress_cb.map(|cb| move |p: &SpsaProgress| cb(&SearchProgress::Spsa(*p)));
            Some(run_spsa(
                &start.candidate,
                &space,
                &codec,
                evaluator.inner_mut(),
                objective_value,
                &config.spsa,
                &mut rng,
                spsa_cb.as_ref().map(|f| f as &dyn Fn(&SpsaProgress)),
                cancel,
            )?)
        }
        _ => None,
    };

    let refined_best = refinement.as_ref().and_then(|r| r.best_evaluation.clone());
    let best = match (hyperband_best.clone(), refined_best) {
        (Some(h), Some(r)) if r.objective_value > h.objective_value => Some(r),
        (Some(h), _) => Some(h),
        (None, r) => r,
    };

    let report = SearchReport {
        best,
        hyperband_best,
        refinement,
        live_evaluations: evaluator.inner_mut().evaluations(),
        screened_out: evaluator.screened_out(),
        surrogate_samples: evaluator.surrogate().size(),
    };
    info!(
        objective = ?config.objective,
        best = report.best.as_ref().map(|b| b.objective_value),
        live_evaluations = report.live_evaluations,
        screened_out = report.screened_out,
        "search complete"
    );
    Ok(report)
}
