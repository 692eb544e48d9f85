//! Per-candidate robustness ("island") scoring.
//!
//! A candidate sitting on a broad, flat plateau of good parameters tends to
//! win many CSCV splits and keep a tight out-of-sample distribution. The
//! island score turns a candidate's row of the [`PboReport`] into a single
//! number in `[0, 1]`:
//!
//! - **area**: `clamp01(champion_share · 4)`, saturating once the candidate
//!   wins a quarter of the splits
//! - **dispersion**: `1 − clamp01(iqr / (scale · 1.5))`
//! - **edge**: `1 − clamp01(edge_span / (scale · 4))`, penalising a heavy
//!   one-sided tail
//!
//! with `scale = max(|median|, 1)` and `score = 0.45·area + 0.35·dispersion +
//! 0.20·edge`. Candidates without CSCV data fall back to their parameter
//! sensitivity stability score, then to a neutral 0.5.

use serde::{Deserialize, Serialize};

use robustlab_core::EvaluationResult;

use crate::cscv::PboReport;
use crate::stats::{clamp01, median_of_sorted, nearest_rank, sorted_finite};

const AREA_WEIGHT: f64 = 0.45;
const DISPERSION_WEIGHT: f64 = 0.35;
const EDGE_WEIGHT: f64 = 0.20;
const AREA_SATURATION: f64 = 4.0;
const DISPERSION_SCALE: f64 = 1.5;
const EDGE_SCALE: f64 = 4.0;
/// Minimum OOS samples before quartiles are trusted.
const MIN_IQR_SAMPLES: usize = 4;
pub const NEUTRAL_SCORE: f64 = 0.5;

// ─── Sensitivity fallback ────────────────────────────────────────────

/// Summary block of a parameter-sensitivity analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensitivitySummary {
    /// Stability on a 0–100 scale.
    #[serde(default)]
    pub stability_score: Option<f64>,
}

/// Parameter-sensitivity analysis attached to a result by its producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    #[serde(default)]
    pub summary: SensitivitySummary,
}

/// Anything that can supply a 0–100 stability score for the fallback path.
pub trait StabilitySource {
    fn stability_score(&self) -> Option<f64>;
}

impl StabilitySource for EvaluationResult {
    fn stability_score(&self) -> Option<f64> {
        EvaluationResult::stability_score(self)
    }
}

impl StabilitySource for SensitivityReport {
    fn stability_score(&self) -> Option<f64> {
        self.summary.stability_score
    }
}

impl<T: StabilitySource> StabilitySource for Option<T> {
    fn stability_score(&self) -> Option<f64> {
        self.as_ref().and_then(StabilitySource::stability_score)
    }
}

// ─── Insight ─────────────────────────────────────────────────────────

/// Where an insight's score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    Cscv,
    Sensitivity,
    Neutral,
}

/// Inputs and components behind a CSCV-derived island score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IslandComponents {
    pub champion_share: f64,
    pub median: f64,
    pub iqr: f64,
    pub max: f64,
    pub min: f64,
    pub area: f64,
    pub dispersion: f64,
    pub edge: f64,
}

impl IslandComponents {
    /// Derive the components from an OOS distribution. `None` when the
    /// distribution holds no finite value.
    pub fn from_distribution(champion_share: f64, oos: &[f64]) -> Option<Self> {
        let sorted = sorted_finite(oos);
        let median = median_of_sorted(&sorted)?;
        let min = *sorted.first()?;
        let max = *sorted.last()?;
        let iqr = if sorted.len() >= MIN_IQR_SAMPLES {
            match (nearest_rank(&sorted, 0.75), nearest_rank(&sorted, 0.25)) {
                (Some(q3), Some(q1)) => q3 - q1,
                _ => 0.0,
            }
        } else {
            0.0
        };

        let scale = median.abs().max(1.0);
        let edge_span = (max - median).abs().max((median - min).abs());

        Some(Self {
            champion_share,
            median,
            iqr,
            max,
            min,
            area: clamp01(champion_share * AREA_SATURATION),
            dispersion: 1.0 - clamp01(iqr / (scale * DISPERSION_SCALE)),
            edge: 1.0 - clamp01(edge_span / (scale * EDGE_SCALE)),
        })
    }

    pub fn score(&self) -> f64 {
        clamp01(AREA_WEIGHT * self.area + DISPERSION_WEIGHT * self.dispersion + EDGE_WEIGHT * self.edge)
    }
}

/// Robustness insight for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IslandInsight {
    /// Robustness in `[0, 1]`.
    pub score: f64,
    pub source: InsightSource,
    pub components: Option<IslandComponents>,
}

impl IslandInsight {
    fn from_components(components: IslandComponents) -> Self {
        Self {
            score: components.score(),
            source: InsightSource::Cscv,
            components: Some(components),
        }
    }

    fn fallback(stability: Option<f64>) -> Self {
        match stability.filter(|s| s.is_finite()) {
            Some(s) => Self {
                score: clamp01(s / 100.0),
                source: InsightSource::Sensitivity,
                components: None,
            },
            None => Self {
                score: NEUTRAL_SCORE,
                source: InsightSource::Neutral,
                components: None,
            },
        }
    }
}

/// Compute one insight per entry of `results`, in the same order.
///
/// `matrix_rows` pairs a result index with the row it occupies in the
/// matrix `cscv` was computed from. Pairs pointing outside either side are
/// ignored; results without a usable CSCV row fall back to sensitivity or
/// neutral scores. Never fails.
pub fn compute_island_insights<S: StabilitySource>(
    results: &[S],
    cscv: Option<&PboReport>,
    matrix_rows: &[(usize, usize)],
) -> Vec<IslandInsight> {
    let mut insights: Vec<Option<IslandInsight>> = vec![None; results.len()];

    if let Some(report) = cscv {
        for &(result_idx, matrix_idx) in matrix_rows {
            if result_idx >= results.len() {
                continue;
            }
            let Some(oos) = report.oos_distributions.get(matrix_idx) else {
                continue;
            };
            let wins = report.champion_counts.get(matrix_idx).copied().unwrap_or(0);
            let share = if report.evaluated_splits > 0 {
                wins as f64 / report.evaluated_splits as f64
            } else {
                0.0
            };
            if let Some(components) = IslandComponents::from_distribution(share, oos) {
                insights[result_idx] = Some(IslandInsight::from_components(components));
            }
        }
    }

    insights
        .into_iter()
        .zip(results)
        .map(|(insight, result)| insight.unwrap_or_else(|| IslandInsight::fallback(result.stability_score())))
        .collect()
}
