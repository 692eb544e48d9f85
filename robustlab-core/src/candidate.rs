//! Candidate parameter sets and their evaluation results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw-metric key under which an evaluator may report a parameter-sensitivity
/// stability score (0–100).
pub const STABILITY_SCORE_KEY: &str = "stability_score";

/// A parameter set: parameter name → numeric value.
///
/// Keys are kept sorted so iteration order (and therefore vector encoding) is
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(pub BTreeMap<String, f64>);

impl Candidate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Candidate {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Outcome of evaluating one candidate at one budget.
///
/// `objective_value` is `f64::NEG_INFINITY` when the evaluation is unusable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub candidate: Candidate,
    pub objective_value: f64,
    #[serde(default)]
    pub raw_metrics: BTreeMap<String, f64>,
}

impl EvaluationResult {
    pub fn new(candidate: Candidate, objective_value: f64) -> Self {
        Self {
            candidate,
            objective_value,
            raw_metrics: BTreeMap::new(),
        }
    }

    /// A result for a candidate that could not be scored.
    pub fn unusable(candidate: Candidate) -> Self {
        Self::new(candidate, f64::NEG_INFINITY)
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.raw_metrics.insert(name.into(), value);
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.raw_metrics.get(name).copied()
    }

    /// Parameter-sensitivity stability score, when the evaluator reported one.
    pub fn stability_score(&self) -> Option<f64> {
        self.metric(STABILITY_SCORE_KEY).filter(|v| v.is_finite())
    }
}

/// Default objective: the evaluator-reported objective value.
pub fn objective_value(result: &EvaluationResult) -> f64 {
    result.objective_value
}

/// Value kind of a search dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    #[default]
    Float,
}

/// Inclusive range of one search dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBound {
    pub min: f64,
    pub max: f64,
    #[serde(default, rename = "type")]
    pub kind: ParamKind,
}

impl ParamBound {
    pub fn float(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            kind: ParamKind::Float,
        }
    }

    pub fn int(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            kind: ParamKind::Int,
        }
    }

    /// Clamp a value into range, rounding integer dimensions.
    pub fn clamp(&self, value: f64) -> f64 {
        let (lo, hi) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        let v = if value.is_finite() { value } else { lo };
        match self.kind {
            ParamKind::Int => v.round().clamp(lo, hi),
            ParamKind::Float => v.clamp(lo, hi),
        }
    }
}
