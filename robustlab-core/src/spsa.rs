//! SPSA local refinement.
//!
//! Simultaneous Perturbation Stochastic Approximation: each step perturbs every
//! dimension at once by a random ±1 vector, evaluates the two mirrored points,
//! and estimates the gradient from their difference. Two evaluations per step,
//! regardless of dimensionality.
//!
//! All perturbation happens in a normalized `[0, 1]^d` space built from the
//! parameter bounds; points are mapped back to real values (rounded for
//! integer dimensions), decoded, and passed through the optional constraint
//! hook before being evaluated.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, EvaluationResult, ParamBound, ParamKind};
use crate::error::SearchError;
use crate::evaluator::{evaluate_one, EvalOptions, Evaluator};

/// Span substituted for degenerate dimensions (`max == min`).
const MIN_SPAN: f64 = 1e-9;
/// Gradient denominators smaller than this contribute zero.
const GRADIENT_EPSILON: f64 = 1e-12;

type ConstraintFix = Box<dyn Fn(Candidate) -> Candidate + Send + Sync>;

// ─── Configuration ───────────────────────────────────────────────────

/// Gain schedule and step count for SPSA.
///
/// Gains decay as `a_t = a0 / (t+1)^alpha` and `c_t = c0 / (t+1)^gamma`.
/// Defaults are Spall's recommended exponents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpsaConfig {
    pub steps: usize,
    pub a0: f64,
    pub c0: f64,
    pub alpha: f64,
    pub gamma: f64,
}

impl Default for SpsaConfig {
    fn default() -> Self {
        Self {
            steps: 30,
            a0: 0.2,
            c0: 0.1,
            alpha: 0.602,
            gamma: 0.101,
        }
    }
}

impl SpsaConfig {
    pub fn validate(&self) -> Result<(), SearchError> {
        for (name, value) in [
            ("a0", self.a0),
            ("c0", self.c0),
            ("alpha", self.alpha),
            ("gamma", self.gamma),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SearchError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.c0 == 0.0 {
            return Err(SearchError::InvalidConfig("c0 must be > 0".into()));
        }
        Ok(())
    }

    fn gains(&self, step: usize) -> (f64, f64) {
        let k = (step + 1) as f64;
        (self.a0 / k.powf(self.alpha), self.c0 / k.powf(self.gamma))
    }
}

// ─── Search space ────────────────────────────────────────────────────

/// Bounded parameter space with an optional constraint hook.
///
/// Dimensions are ordered by parameter name.
pub struct SearchSpace {
    bounds: BTreeMap<String, ParamBound>,
    constraint_fix: Option<ConstraintFix>,
}

impl std::fmt::Debug for SearchSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSpace")
            .field("bounds", &self.bounds)
            .field("constraint_fix", &self.constraint_fix.is_some())
            .finish()
    }
}

impl SearchSpace {
    pub fn new(bounds: BTreeMap<String, ParamBound>) -> Self {
        Self {
            bounds,
            constraint_fix: None,
        }
    }

    /// Install a hook applied to every decoded candidate.
    pub fn with_constraint_fix<F>(mut self, fix: F) -> Self
    where
        F: Fn(Candidate) -> Candidate + Send + Sync + 'static,
    {
        self.constraint_fix = Some(Box::new(fix));
        self
    }

    pub fn dims(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn bounds(&self) -> &BTreeMap<String, ParamBound> {
        &self.bounds
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bounds.keys().map(String::as_str)
    }

    /// Apply the constraint hook (identity when none is installed).
    pub fn fix(&self, candidate: Candidate) -> Candidate {
        match &self.constraint_fix {
            Some(fix) => fix(candidate),
            None => candidate,
        }
    }
}

/// Maps between a candidate and its real-valued parameter vector.
pub trait VectorCodec {
    fn encode(&self, params: &Candidate) -> Vec<f64>;
    /// Rebuild a candidate from `vec`, starting from `template` so that
    /// parameters outside the search space are carried over untouched.
    fn decode(&self, vec: &[f64], template: &Candidate) -> Candidate;
}

/// Codec reading and writing the space's parameters by name.
///
/// Missing parameters encode as NaN, which normalizes to the middle of the range.
#[derive(Debug, Clone)]
pub struct NamedCodec {
    names: Vec<String>,
}

impl NamedCodec {
    pub fn for_space(space: &SearchSpace) -> Self {
        Self {
            names: space.names().map(str::to_string).collect(),
        }
    }
}

impl VectorCodec for NamedCodec {
    fn encode(&self, params: &Candidate) -> Vec<f64> {
        self.names
            .iter()
            .map(|n| params.get(n).unwrap_or(f64::NAN))
            .collect()
    }

    fn decode(&self, vec: &[f64], template: &Candidate) -> Candidate {
        let mut out = template.clone();
        for (name, &value) in self.names.iter().zip(vec) {
            out.set(name.clone(), value);
        }
        out
    }
}

/// Per-dimension linear map between real values and `[0, 1]`.
#[derive(Debug, Clone, Copy)]
struct UnitScale {
    min: f64,
    max: f64,
    span: f64,
    kind: ParamKind,
}

impl UnitScale {
    fn from_bound(bound: &ParamBound) -> Self {
        let (min, max) = if bound.min <= bound.max {
            (bound.min, bound.max)
        } else {
            (bound.max, bound.min)
        };
        let span = if max - min > 0.0 { max - min } else { MIN_SPAN };
        Self {
            min,
            max,
            span,
            kind: bound.kind,
        }
    }

    fn to_unit(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return 0.5;
        }
        clamp01((value - self.min) / self.span)
    }

    fn from_unit(&self, unit: f64) -> f64 {
        self.clamp(self.min + clamp01(unit) * self.span)
    }

    fn clamp(&self, value: f64) -> f64 {
        match self.kind {
            ParamKind::Int => value.round().clamp(self.min, self.max),
            ParamKind::Float => value.clamp(self.min, self.max),
        }
    }
}

fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

// ─── Progress & outcome ──────────────────────────────────────────────

/// Progress update emitted after each SPSA step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpsaProgress {
    pub step: usize,
    pub best_score: f64,
}

/// Best point found by SPSA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpsaOutcome {
    pub best_params: Candidate,
    pub best_score: f64,
    pub best_evaluation: Option<EvaluationResult>,
    pub steps_completed: usize,
}

// ─── Core loop ───────────────────────────────────────────────────────

struct Refiner<'a, C: ?Sized, E: ?Sized, O> {
    space: &'a SearchSpace,
    scales: Vec<UnitScale>,
    codec: &'a C,
    template: &'a Candidate,
    evaluator: &'a mut E,
    objective: O,
    best: SpsaOutcome,
}

impl<C, E, O> Refiner<'_, C, E, O>
where
    C: VectorCodec + ?Sized,
    E: Evaluator + ?Sized,
    O: Fn(&EvaluationResult) -> f64,
{
    /// Map `theta` to a candidate through the constraint hook, clamp it back
    /// into bounds, and return the normalized vector of what was produced.
    fn project(&self, theta: &[f64]) -> (Vec<f64>, Candidate) {
        let real: Vec<f64> = self
            .scales
            .iter()
            .zip(theta)
            .map(|(s, &u)| s.from_unit(u))
            .collect();
        let fixed = self.space.fix(self.codec.decode(&real, self.template));
        let clamped: Vec<f64> = self
            .scales
            .iter()
            .zip(self.codec.encode(&fixed))
            .zip(&real)
            .map(|((s, v), &fallback)| if v.is_finite() { s.clamp(v) } else { fallback })
            .collect();
        let candidate = self.codec.decode(&clamped, &fixed);
        let unit = self
            .scales
            .iter()
            .zip(&clamped)
            .map(|(s, &v)| s.to_unit(v))
            .collect();
        (unit, candidate)
    }

    /// Evaluate the point at `theta`, update the running best, return its score.
    fn evaluate_at(&mut self, theta: &[f64]) -> Result<f64, SearchError> {
        let (_, params) = self.project(theta);
        let evaluation = evaluate_one(self.evaluator, &params, &EvalOptions::default())?;
        let score = evaluation
            .as_ref()
            .map(|r| (self.objective)(r))
            .filter(|s| !s.is_nan())
            .unwrap_or(f64::NEG_INFINITY);
        if score > self.best.best_score {
            self.best.best_score = score;
            self.best.best_params = params;
            self.best.best_evaluation = evaluation;
        }
        Ok(score)
    }
}

/// Refine `start` with SPSA, maximizing `objective`.
///
/// # Arguments
/// - `start`: initial parameters; evaluated first to seed the running best.
/// - `space`: bounds and constraint hook.
/// - `codec`: candidate ↔ vector mapping; must yield one value per bound.
/// - `rng`: source of the ±1 perturbations.
/// - `progress_cb`: optional per-step callback.
/// - `cancel`: optional flag polled before each step.
#[allow(clippy::too_many_arguments)]
pub fn run_spsa<C, E, O, R>(
    start: &Candidate,
    space: &SearchSpace,
    codec: &C,
    evaluator: &mut E,
    objective: O,
    config: &SpsaConfig,
    rng: &mut R,
    progress_cb: Option<&dyn Fn(&SpsaProgress)>,
    cancel: Option<&AtomicBool>,
) -> Result<SpsaOutcome, SearchError>
where
    C: VectorCodec + ?Sized,
    E: Evaluator + ?Sized,
    O: Fn(&EvaluationResult) -> f64,
    R: Rng + ?Sized,
{
    config.validate()?;
    if space.is_empty() {
        return Err(SearchError::EmptySpace);
    }

    let encoded = codec.encode(start);
    if encoded.len() != space.dims() {
        return Err(SearchError::DimensionMismatch {
            expected: space.dims(),
            actual: encoded.len(),
        });
    }

    let scales: Vec<UnitScale> = space.bounds().values().map(UnitScale::from_bound).collect();
    let theta: Vec<f64> = scales
        .iter()
        .zip(&encoded)
        .map(|(s, &v)| s.to_unit(v))
        .collect();

    let mut refiner = Refiner {
        space,
        scales,
        codec,
        template: start,
        evaluator,
        objective,
        best: SpsaOutcome {
            best_params: start.clone(),
            best_score: f64::NEG_INFINITY,
            best_evaluation: None,
            steps_completed: 0,
        },
    };

    // Seed the running best from the unperturbed start point.
    let (mut theta, initial) = refiner.project(&theta);
    let evaluation = evaluate_one(refiner.evaluator, &initial, &EvalOptions::default())?;
    refiner.best.best_score = evaluation
        .as_ref()
        .map(|r| (refiner.objective)(r))
        .filter(|s| !s.is_nan())
        .unwrap_or(f64::NEG_INFINITY);
    refiner.best.best_params = initial;
    refiner.best.best_evaluation = evaluation;

    for step in 0..config.steps {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            warn!(step, "spsa cancelled");
            break;
        }

        let (a_t, c_t) = config.gains(step);
        let delta: Vec<f64> = (0..theta.len())
            .map(|_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 })
            .collect();

        let theta_plus: Vec<f64> = theta
            .iter()
            .zip(&delta)
            .map(|(t, d)| clamp01(t + c_t * d))
            .collect();
        let theta_minus: Vec<f64> = theta
            .iter()
            .zip(&delta)
            .map(|(t, d)| clamp01(t - c_t * d))
            .collect();

        let y_plus = refiner.evaluate_at(&theta_plus)?;
        let y_minus = refiner.evaluate_at(&theta_minus)?;

        // Descend on the loss (negated objective).
        let loss_diff = (-y_plus) - (-y_minus);
        for (t, d) in theta.iter_mut().zip(&delta) {
            let denom = 2.0 * c_t * d;
            let grad = if !denom.is_finite() || denom.abs() < GRADIENT_EPSILON {
                0.0
            } else {
                let g = loss_diff / denom;
                if g.is_finite() {
                    g
                } else {
                    0.0
                }
            };
            *t = clamp01(*t - a_t * grad);
        }
        // Keep theta on points the constraint hook would actually produce.
        theta = refiner.project(&theta).0;

        refiner.best.steps_completed = step + 1;
        debug!(
            step = step + 1,
            a_t,
            c_t,
            y_plus,
            y_minus,
            best = refiner.best.best_score,
            "spsa step"
        );
        if let Some(cb) = progress_cb {
            cb(&SpsaProgress {
                step: step + 1,
                best_score: refiner.best.best_score,
            });
        }
    }

    info!(
        steps = refiner.best.steps_completed,
        best = refiner.best.best_score,
        "spsa finished"
    );
    Ok(refiner.best)
}
