//! Composite 0–100 overfit score.
//!
//! Starts from 100 and subtracts weighted penalties:
//! - PBO: `p · 100` (100 when unknown)
//! - DSR: `max(0, 50 − 50 · dsr)` (50 when unknown)
//! - island: `50 − 50 · island`
//!
//! Higher is better. The weights are normalised to sum to one.

use serde::{Deserialize, Serialize};

use crate::stats::clamp01;

/// Relative weight of each penalty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverfitWeights {
    pub pbo: f64,
    pub dsr: f64,
    pub island: f64,
}

impl Default for OverfitWeights {
    fn default() -> Self {
        Self {
            pbo: 0.5,
            dsr: 0.25,
            island: 0.25,
        }
    }
}

impl OverfitWeights {
    /// Weights scaled to sum to one. Negative or non-finite entries take
    /// their default value; a zero total falls back to the defaults.
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let pick = |v: f64, d: f64| if v.is_finite() && v >= 0.0 { v } else { d };
        let pbo = pick(self.pbo, defaults.pbo);
        let dsr = pick(self.dsr, defaults.dsr);
        let island = pick(self.island, defaults.island);
        let sum = pbo + dsr + island;
        if sum <= 0.0 {
            return defaults;
        }
        Self {
            pbo: pbo / sum,
            dsr: dsr / sum,
            island: island / sum,
        }
    }
}

/// Penalty breakdown behind a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverfitScore {
    pub score: f64,
    pub pbo_penalty: f64,
    pub dsr_penalty: f64,
    pub island_penalty: f64,
}

/// Combine the three robustness signals into one score in `[0, 100]`.
///
/// `pbo`, `dsr` and `island` are each clamped to `[0, 1]`; a missing or
/// non-finite `pbo`/`dsr` takes the maximum penalty.
pub fn compute_overfit_score(
    pbo: Option<f64>,
    dsr: Option<f64>,
    island: f64,
    weights: &OverfitWeights,
) -> OverfitScore {
    let w = weights.normalized();
    let pbo = pbo.filter(|p| p.is_finite()).map(clamp01);
    let dsr = dsr.filter(|d| d.is_finite()).map(clamp01);
    let island = clamp01(island);

    let pbo_penalty = w.pbo * pbo.map_or(100.0, |p| p * 100.0);
    let dsr_penalty = w.dsr * dsr.map_or(50.0, |d| (50.0 - d * 50.0).max(0.0));
    let island_penalty = w.island * (50.0 - island * 50.0);

    OverfitScore {
        score: (100.0 - pbo_penalty - dsr_penalty - island_penalty).clamp(0.0, 100.0),
        pbo_penalty,
        dsr_penalty,
        island_penalty,
    }
}
