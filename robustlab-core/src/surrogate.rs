//! RBF surrogate model.
//!
//! Predicts an objective value for a parameter vector as a Gaussian-kernel
//! weighted average of previously observed `(vector, score)` samples. Callers
//! own the instance and decide when to consult it; nothing here is shared or
//! global.

use serde::{Deserialize, Serialize};

/// Kernel width used when no adaptive width can be derived.
const DEFAULT_GAMMA: f64 = 0.5;
/// Number of stored points probed when deriving an adaptive width.
const GAMMA_PROBE_COUNT: usize = 12;
/// Stride used to pick probe points (prime, so probes spread over the store).
const GAMMA_PROBE_STRIDE: usize = 9973;
const DISTANCE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    vec: Vec<f64>,
    score: f64,
}

/// Gaussian radial-basis-function surrogate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RbfSurrogate {
    /// Fixed kernel width; `None` derives one per query.
    gamma: Option<f64>,
    samples: Vec<Sample>,
}

impl RbfSurrogate {
    /// Surrogate with a per-query adaptive kernel width.
    pub fn new() -> Self {
        Self::default()
    }

    /// Surrogate with a fixed kernel width. Non-positive or non-finite
    /// values fall back to adaptive width.
    pub fn with_gamma(gamma: f64) -> Self {
        Self {
            gamma: (gamma.is_finite() && gamma > 0.0).then_some(gamma),
            samples: Vec::new(),
        }
    }

    /// Record an observation. Non-finite scores are ignored.
    pub fn add(&mut self, vec: &[f64], score: f64) {
        if !score.is_finite() {
            return;
        }
        self.samples.push(Sample {
            vec: vec.to_vec(),
            score,
        });
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Predict the score at `vec`.
    ///
    /// - no samples → `0`
    /// - one sample → that sample's score
    /// - otherwise the kernel-weighted mean, falling back to the plain mean
    ///   when every weight underflows to zero.
    pub fn predict(&self, vec: &[f64]) -> f64 {
        match self.samples.len() {
            0 => return 0.0,
            1 => return self.samples[0].score,
            _ => {}
        }

        let gamma = self.gamma.unwrap_or_else(|| self.adaptive_gamma(vec));
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for sample in &self.samples {
            let weight = (-gamma * squared_distance(&sample.vec, vec)).exp();
            numerator += weight * sample.score;
            denominator += weight;
        }

        if denominator > 0.0 && denominator.is_finite() {
            numerator / denominator
        } else {
            self.mean_score()
        }
    }

    /// `1 / (2 d²)` where `d` is the mean distance from `vec` to a
    /// deterministic stride-selected subset of stored points.
    fn adaptive_gamma(&self, vec: &[f64]) -> f64 {
        let size = self.samples.len();
        if size < 2 {
            return DEFAULT_GAMMA;
        }
        let probes = GAMMA_PROBE_COUNT.min(size);
        let total: f64 = (0..probes)
            .map(|i| {
                let idx = (i * GAMMA_PROBE_STRIDE) % size;
                squared_distance(&self.samples[idx].vec, vec).sqrt()
            })
            .sum();
        let avg = total / probes as f64;
        if !avg.is_finite() || avg < DISTANCE_EPSILON {
            return DEFAULT_GAMMA;
        }
        1.0 / (2.0 * avg * avg)
    }

    fn mean_score(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.score).sum::<f64>() / self.samples.len() as f64
    }
}

/// Squared Euclidean distance over the shorter of the two vectors.
fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
