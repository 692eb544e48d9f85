//! Batch overfitting pipeline.
//!
//! Takes a batch of evaluated configurations (each with its equity curve)
//! and runs the full analysis chain:
//!
//! 1. equity curve → daily returns → per-block metrics → performance matrix
//! 2. CSCV over the matrix → PBO report
//! 3. island insights per configuration
//! 4. Deflated Sharpe per configuration, deflated by the batch size
//! 5. composite overfit score and verdict per configuration
//! 6. batch summary and overall verdict
//!
//! When candidates carry grid positions, plateau detection over the grid of
//! OOS medians runs alongside and is reported next to the per-candidate
//! island scores.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::block_metrics::{build_performance_matrix, daily_returns_from_cumulative, BlockMetric};
use crate::config::OverfitSettings;
use crate::cscv::{compute_cscv_pbo, ConfigStats, PboReport};
use crate::dsr::{compute_dsr, DsrResult};
use crate::grid_islands::{build_grid, detect_islands, GridIslandReport, GridPosition, IslandMembership};
use crate::islands::{compute_island_insights, IslandInsight, SensitivityReport, StabilitySource};
use crate::overfit_score::{compute_overfit_score, OverfitScore, OverfitWeights};
use crate::stats::{interpolated_percentile, mean, median};
use crate::verdict::{compute_overfit_verdict, Verdict};

const TOP_CANDIDATES: usize = 3;

/// One evaluated configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCandidate {
    #[serde(default)]
    pub label: String,
    /// Cumulative strategy return per bar, in percent.
    pub cumulative_returns: Vec<f64>,
    #[serde(default)]
    pub parameter_sensitivity: Option<SensitivityReport>,
    #[serde(default)]
    pub sensitivity_analysis: Option<SensitivityReport>,
    #[serde(default)]
    pub grid_position: Option<GridPosition>,
}

impl StabilitySource for BatchCandidate {
    fn stability_score(&self) -> Option<f64> {
        self.parameter_sensitivity
            .stability_score()
            .filter(|s| s.is_finite())
            .or_else(|| self.sensitivity_analysis.stability_score())
    }
}

/// Analysis of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAnalysis {
    pub index: usize,
    pub label: String,
    /// This configuration's champion PBO, or the batch PBO when it never won.
    pub pbo: Option<f64>,
    pub dsr: DsrResult,
    pub island: IslandInsight,
    /// This configuration's out-of-sample standing across the CSCV splits.
    pub oos_stats: Option<ConfigStats>,
    /// Grid plateau this configuration sits on, if any.
    pub grid_island: Option<IslandMembership>,
    pub overfit: OverfitScore,
    pub verdict: Verdict,
    pub block_metrics: Vec<f64>,
    pub daily_return_count: usize,
}

/// Condensed view of a top-scoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopCandidate {
    pub index: usize,
    pub label: String,
    pub score: f64,
    pub pbo: Option<f64>,
    pub dsr: f64,
    pub island: f64,
}

/// Spread of the per-configuration DSR values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DsrSummary {
    pub median: Option<f64>,
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sample_size: usize,
}

impl DsrSummary {
    fn from_values(values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        Self {
            median: median(&finite),
            average: mean(&finite),
            min: finite.iter().copied().reduce(f64::min),
            max: finite.iter().copied().reduce(f64::max),
            sample_size: finite.len(),
        }
    }
}

/// Batch-level statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub average_score: Option<f64>,
    /// 75th percentile of scores (linear interpolation).
    pub p75_score: Option<f64>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub lambda_median: Option<f64>,
    pub lambda_negative_share: Option<f64>,
    pub dsr: DsrSummary,
    pub top: Vec<TopCandidate>,
}

/// Full result of [`evaluate_batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub block_count: usize,
    pub metric: BlockMetric,
    /// Normalised weights actually applied.
    pub weights: OverfitWeights,
    pub configurations: usize,
    pub pbo: Option<PboReport>,
    pub candidates: Vec<CandidateAnalysis>,
    /// Present when at least one candidate has a grid position and CSCV ran.
    pub grid_islands: Option<GridIslandReport>,
    pub summary: BatchSummary,
    /// Verdict from the batch PBO and the best configuration's score.
    pub verdict: Verdict,
}

/// Run the overfitting pipeline over a batch.
///
/// Returns `None` when the batch is empty or no configuration has enough
/// returns to form even two blocks. A matrix CSCV cannot use (for instance a
/// block count below four) still yields a report; PBO is then absent and
/// scores take the full PBO penalty.
pub fn evaluate_batch(candidates: &[BatchCandidate], settings: &OverfitSettings) -> Option<BatchReport> {
    if candidates.is_empty() {
        return None;
    }
    let n = candidates.len();

    let daily: Vec<Vec<f64>> = candidates
        .iter()
        .map(|c| daily_returns_from_cumulative(&c.cumulative_returns))
        .collect();
    let Some(matrix) = build_performance_matrix(&daily, settings.block_count, settings.metric) else {
        warn!(configurations = n, "no configuration has enough returns for block metrics");
        return None;
    };

    let pbo_report = compute_cscv_pbo(&matrix.rows, &settings.cscv);
    let batch_pbo = pbo_report.as_ref().and_then(|r| r.pbo);
    let rows: Vec<(usize, usize)> = (0..n).map(|i| (i, i)).collect();
    let islands = compute_island_insights(candidates, pbo_report.as_ref(), &rows);
    let weights = settings.weights.normalized();

    let positions: Vec<Option<GridPosition>> = candidates.iter().map(|c| c.grid_position).collect();
    let grid_islands = pbo_report
        .as_ref()
        .filter(|_| positions.iter().any(Option::is_some))
        .map(|report| detect_islands(&build_grid(&positions, report), &settings.grid_islands));

    let analyses: Vec<CandidateAnalysis> = candidates
        .iter()
        .zip(daily.iter().zip(matrix.rows))
        .zip(islands)
        .enumerate()
        .map(|(index, ((candidate, (returns, block_metrics)), island))| {
            let pbo = pbo_report
                .as_ref()
                .and_then(|r| r.champion_pbo.get(index).copied().flatten())
                .or(batch_pbo);
            let dsr = compute_dsr(returns, n);
            let overfit = compute_overfit_score(pbo, Some(dsr.dsr), island.score, &weights);
            let verdict = compute_overfit_verdict(pbo, Some(overfit.score));
            CandidateAnalysis {
                index,
                label: candidate.label.clone(),
                pbo,
                dsr,
                island,
                oos_stats: pbo_report.as_ref().and_then(|r| r.config_stats.get(index).cloned()),
                grid_island: grid_islands.as_ref().and_then(|g| g.membership.get(&index).copied()),
                overfit,
                verdict,
                block_metrics,
                daily_return_count: returns.len(),
            }
        })
        .collect();

    let summary = summarize(&analyses, pbo_report.as_ref());
    let verdict = compute_overfit_verdict(batch_pbo, summary.max_score);

    info!(
        configurations = n,
        block_count = matrix.block_count,
        pbo = batch_pbo,
        best_score = summary.max_score,
        verdict = %verdict.level,
        "batch overfitting analysis complete"
    );

    Some(BatchReport {
        block_count: matrix.block_count,
        metric: matrix.metric,
        weights,
        configurations: n,
        pbo: pbo_report,
        candidates: analyses,
        grid_islands,
        summary,
        verdict,
    })
}

fn summarize(analyses: &[CandidateAnalysis], pbo: Option<&PboReport>) -> BatchSummary {
    let scores: Vec<f64> = analyses.iter().map(|a| a.overfit.score).collect();
    let dsr_values: Vec<f64> = analyses.iter().map(|a| a.dsr.dsr).collect();

    let mut ranked: Vec<&CandidateAnalysis> = analyses.iter().filter(|a| a.overfit.score.is_finite()).collect();
    ranked.sort_by(|a, b| b.overfit.score.partial_cmp(&a.overfit.score).unwrap_or(Ordering::Equal));
    let top = ranked
        .into_iter()
        .take(TOP_CANDIDATES)
        .map(|a| TopCandidate {
            index: a.index,
            label: a.label.clone(),
            score: a.overfit.score,
            pbo: a.pbo,
            dsr: a.dsr.dsr,
            island: a.island.score,
        })
        .collect();

    let lambdas = pbo.map(|r| r.lambda_samples.as_slice()).unwrap_or_default();
    BatchSummary {
        average_score: mean(&scores),
        p75_score: interpolated_percentile(&scores, 0.75),
        min_score: scores.iter().copied().filter(|s| s.is_finite()).reduce(f64::min),
        max_score: scores.iter().copied().filter(|s| s.is_finite()).reduce(f64::max),
        lambda_median: median(lambdas),
        lambda_negative_share: (!lambdas.is_empty())
            .then(|| lambdas.iter().filter(|&&l| l < 0.0).count() as f64 / lambdas.len() as f64),
        dsr: DsrSummary::from_values(&dsr_values),
        top,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::islands::{InsightSource, SensitivitySummary};
    use crate::verdict::VerdictLevel;

    /// Cumulative-percent equity curve from a daily-return generator.
    fn curve(days: usize, daily: impl Fn(usize) -> f64) -> Vec<f64> {
        let mut equity = 1.0;
        let mut out = vec![0.0];
        for d in 0..days {
            equity *= 1.0 + daily(d);
            out.push((equity - 1.0) * 100.0);
        }
        out
    }

    fn candidate(label: &str, returns: Vec<f64>) -> BatchCandidate {
        BatchCandidate {
            label: label.to_string(),
            cumulative_returns: returns,
            ..BatchCandidate::default()
        }
    }

    #[test]
    fn empty_batch_is_none() {
        assert!(evaluate_batch(&[], &OverfitSettings::default()).is_none());
    }

    #[test]
    fn too_short_curves_are_none() {
        let batch = vec![candidate("a", vec![0.0, 1.0]), candidate("b", vec![5.0])];
        assert!(evaluate_batch(&batch, &OverfitSettings::default()).is_none());
    }

    #[test]
    fn consistent_winner_is_rated_above_noise() {
        let steady = curve(200, |d| 0.002 + 0.001 * ((d % 3) as f64 - 1.0));
        let noisy = curve(200, |d| if d % 2 == 0 { 0.02 } else { -0.021 });
        let flat = curve(200, |d| 0.0001 * ((d % 5) as f64 - 2.0));
        let batch = vec![candidate("steady", steady), candidate("noisy", noisy), candidate("flat", flat)];

        let report = evaluate_batch(&batch, &OverfitSettings::default()).unwrap();
        assert_eq!(report.block_count, 10);
        assert_eq!(report.configurations, 3);
        let pbo = report.pbo.as_ref().unwrap();
        assert_eq!(pbo.total_splits, 252);

        let steady = &report.candidates[0];
        assert_eq!(steady.label, "steady");
        assert_eq!(steady.daily_return_count, 200);
        assert_eq!(steady.block_metrics.len(), 10);
        assert_eq!(steady.island.source, InsightSource::Cscv);
        assert_eq!(pbo.champion_counts[0], pbo.evaluated_splits);
        assert_eq!(steady.pbo, Some(0.0));
        assert!(steady.overfit.score > report.candidates[1].overfit.score);
        assert_eq!(report.summary.top[0].label, "steady");
        assert_eq!(report.summary.top.len(), 3);
    }

    #[test]
    fn summary_statistics() {
        let batch: Vec<BatchCandidate> = (0..4)
            .map(|i| candidate(&format!("c{i}"), curve(120, move |d| 0.001 * i as f64 + 0.002 * ((d % 4) as f64 - 1.5))))
            .collect();
        let report = evaluate_batch(&batch, &OverfitSettings::default()).unwrap();
        let s = &report.summary;
        let scores: Vec<f64> = report.candidates.iter().map(|c| c.overfit.score).collect();
        let lo = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(s.min_score, Some(lo));
        assert_eq!(s.max_score, Some(hi));
        let avg = s.average_score.unwrap();
        assert!(lo - 1e-9 <= avg && avg <= hi + 1e-9);
        let p75 = s.p75_score.unwrap();
        assert!(lo - 1e-9 <= p75 && p75 <= hi + 1e-9);
        assert_eq!(s.lambda_negative_share, report.pbo.as_ref().and_then(|p| p.pbo));
        assert!(s.top.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn dsr_summary_spans_candidates() {
        let batch: Vec<BatchCandidate> = (0..5)
            .map(|i| candidate(&format!("c{i}"), curve(150, move |d| 0.0005 * i as f64 + 0.004 * ((d % 3) as f64 - 1.0))))
            .collect();
        let report = evaluate_batch(&batch, &OverfitSettings::default()).unwrap();
        let dsr = &report.summary.dsr;
        assert_eq!(dsr.sample_size, 5);
        let values: Vec<f64> = report.candidates.iter().map(|c| c.dsr.dsr).collect();
        assert_eq!(dsr.min, values.iter().copied().reduce(f64::min));
        assert_eq!(dsr.max, values.iter().copied().reduce(f64::max));
        let (lo, hi) = (dsr.min.unwrap(), dsr.max.unwrap());
        assert!((lo..=hi).contains(&dsr.median.unwrap()));
        assert!((lo - 1e-12..=hi + 1e-12).contains(&dsr.average.unwrap()));
        assert!(report.candidates.iter().all(|c| c.oos_stats.is_some()));
        assert!(report.grid_islands.is_none());
    }

    #[test]
    fn dsr_summary_of_nothing_is_empty() {
        assert_eq!(DsrSummary::from_values(&[]), DsrSummary::default());
        assert_eq!(DsrSummary::from_values(&[f64::NAN]).sample_size, 0);
    }

    #[test]
    fn grid_positions_enable_plateau_detection() {
        // A 3x3 sweep whose top row drifts upward; the 0.75 quantile of nine
        // cells is the weakest of those three.
        let batch: Vec<BatchCandidate> = (0..9)
            .map(|i| {
                let (row, col) = (i / 3, i % 3);
                let drift = if row == 0 { 0.003 } else { -0.001 };
                let phase = i as f64;
                BatchCandidate {
                    label: format!("r{row}c{col}"),
                    cumulative_returns: curve(200, move |d| drift + 0.006 * ((d as f64 * 0.9 + phase).sin())),
                    grid_position: Some(GridPosition { row, col }),
                    ..BatchCandidate::default()
                }
            })
            .collect();
        let report = evaluate_batch(&batch, &OverfitSettings::default()).unwrap();
        let grid = report.grid_islands.as_ref().unwrap();
        assert_eq!(grid.total_cells, 9);
        let top = grid.top_island().unwrap();
        assert!(top.members.iter().all(|&m| m < 3));
        assert_eq!(top.size, 3);
        for member in 0..3 {
            assert_eq!(report.candidates[member].grid_island.map(|g| g.island_id), Some(top.id));
        }
        assert!(report.candidates[4].grid_island.is_none());
    }

    #[test]
    fn two_block_matrix_skips_cscv() {
        // 3 returns each → at most 2 blocks, below the CSCV minimum.
        let batch = vec![
            candidate("a", vec![0.0, 1.0, 2.0, 2.5]),
            candidate("b", vec![0.0, -1.0, 0.5, 1.0]),
        ];
        let report = evaluate_batch(&batch, &OverfitSettings::default()).unwrap();
        assert_eq!(report.block_count, 2);
        assert!(report.pbo.is_none());
        assert!(report.candidates.iter().all(|c| c.pbo.is_none()));
        assert!(report.candidates.iter().all(|c| c.island.source == InsightSource::Neutral));
        assert!(report.summary.lambda_median.is_none());
        assert!(report.candidates.iter().all(|c| c.oos_stats.is_none()));
    }

    #[test]
    fn sensitivity_fallback_prefers_parameter_sensitivity() {
        let with = |p: Option<f64>, s: Option<f64>| BatchCandidate {
            parameter_sensitivity: p.map(|v| SensitivityReport {
                summary: SensitivitySummary { stability_score: Some(v) },
            }),
            sensitivity_analysis: s.map(|v| SensitivityReport {
                summary: SensitivitySummary { stability_score: Some(v) },
            }),
            ..BatchCandidate::default()
        };
        assert_eq!(with(Some(70.0), Some(20.0)).stability_score(), Some(70.0));
        assert_eq!(with(None, Some(20.0)).stability_score(), Some(20.0));
        assert_eq!(with(Some(f64::NAN), Some(20.0)).stability_score(), Some(20.0));
        assert_eq!(with(None, None).stability_score(), None);
    }

    #[test]
    fn batch_candidate_json_shape() {
        let json = r#"[
            {"label": "a", "cumulative_returns": [0, 1, 2],
             "parameter_sensitivity": {"summary": {"stability_score": 55}}},
            {"cumulative_returns": [0, -1]}
        ]"#;
        let batch: Vec<BatchCandidate> = serde_json::from_str(json).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].stability_score(), Some(55.0));
        assert_eq!(batch[1].label, "");
    }

    #[test]
    fn overall_verdict_uses_best_score() {
        let batch = vec![
            candidate("a", curve(80, |d| 0.003 + 0.001 * ((d % 2) as f64))),
            candidate("b", curve(80, |d| -0.001 + 0.001 * ((d % 2) as f64))),
        ];
        let report = evaluate_batch(&batch, &OverfitSettings::default()).unwrap();
        let expected = compute_overfit_verdict(report.pbo.as_ref().and_then(|p| p.pbo), report.summary.max_score);
        assert_eq!(report.verdict, expected);
        assert_ne!(report.verdict.level, VerdictLevel::Unknown);
    }
}
