//! Combinatorially Symmetric Cross-Validation (CSCV) and the Probability of
//! Backtest Overfitting (PBO).
//!
//! Input is an S×B performance matrix: one row per evaluated configuration,
//! one column per contiguous time block. Every way of choosing B/2 blocks as
//! in-sample (IS) leaves the complementary B/2 as out-of-sample (OOS). For
//! each split the IS champion (best IS mean) is located in the OOS ranking;
//! its relative rank `q` becomes a logit `λ = ln(q / (1 − q))`. PBO is the
//! share of splits with `λ < 0`, i.e. where the IS champion landed below the
//! OOS median.
//!
//! Ties in the OOS ranking get their mid-rank, so a matrix in which every
//! configuration performs identically yields `λ = 0` everywhere and `PBO = 0`.
//!
//! Reference: Bailey, Borwein, López de Prado & Zhu (2015),
//! "The Probability of Backtest Overfitting".

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::stats::{mean, median};

/// Smallest usable block count.
pub const MIN_BLOCK_COUNT: usize = 4;

// ─── Configuration ───────────────────────────────────────────────────

/// How splits are chosen when there are more than `max_splits`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitSelection {
    /// The first `max_splits` combinations in lexicographic order.
    #[default]
    Lexicographic,
    /// A uniform sample of `max_splits` combinations (reservoir sampling over
    /// the full sequence), evaluated in lexicographic order.
    Reservoir { seed: u64 },
}

/// Configuration for CSCV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CscvConfig {
    /// Upper bound on the number of IS/OOS splits evaluated.
    pub max_splits: usize,
    pub selection: SplitSelection,
}

impl Default for CscvConfig {
    fn default() -> Self {
        Self {
            max_splits: 1024,
            selection: SplitSelection::Lexicographic,
        }
    }
}

impl CscvConfig {
    /// Evaluate every split, however many there are.
    pub fn unrestricted() -> Self {
        Self {
            max_splits: usize::MAX,
            selection: SplitSelection::Lexicographic,
        }
    }
}

// ─── Report ──────────────────────────────────────────────────────────

/// Out-of-sample behaviour of one configuration across the usable splits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigStats {
    /// Share of splits where its OOS mean fell below the split's OOS median.
    pub failure_probability: Option<f64>,
    pub above_median_fraction: Option<f64>,
    pub mean_test_metric: Option<f64>,
    /// Mean OOS rank, 1 = best; tied configurations share their average rank.
    pub average_rank: Option<f64>,
}

/// Result of a CSCV run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PboReport {
    pub block_count: usize,
    /// Share of splits with `λ < 0`; `None` when no split was usable.
    pub pbo: Option<f64>,
    /// One logit per usable split, in evaluation order.
    pub lambda_samples: Vec<f64>,
    /// Per configuration: its OOS mean in every usable split where it was finite.
    pub oos_distributions: Vec<Vec<f64>>,
    pub oos_median_by_config: Vec<Option<f64>>,
    /// Per configuration: number of splits it won in-sample.
    pub champion_counts: Vec<usize>,
    /// Per configuration: splits it won in-sample but ranked below the OOS median.
    pub champion_failures: Vec<usize>,
    /// `champion_failures / champion_counts`, `None` for configurations that never won.
    pub champion_pbo: Vec<Option<f64>>,
    pub config_stats: Vec<ConfigStats>,
    /// Splits that produced a λ sample.
    pub evaluated_splits: usize,
    /// Splits enumerated (after `max_splits` truncation).
    pub total_splits: usize,
    /// `C(B, B/2)`, saturating at `u64::MAX`.
    pub possible_splits: u64,
}

impl PboReport {
    pub fn config_count(&self) -> usize {
        self.oos_distributions.len()
    }

    pub fn lambda_median(&self) -> Option<f64> {
        median(&self.lambda_samples)
    }

    pub fn lambda_negative_share(&self) -> Option<f64> {
        self.pbo
    }

    /// True when fewer splits were enumerated than exist.
    pub fn is_truncated(&self) -> bool {
        (self.total_splits as u64) < self.possible_splits
    }
}

// ─── Split enumeration ───────────────────────────────────────────────

/// Lazy, restartable sequence of the `C(n, n/2)` in-sample index sets of
/// `n` blocks, in ascending lexicographic order.
#[derive(Debug, Clone)]
pub struct SymmetricSplits {
    n: usize,
    k: usize,
    next: Option<Vec<usize>>,
}

impl SymmetricSplits {
    pub fn new(block_count: usize) -> Self {
        let k = block_count / 2;
        Self {
            n: block_count,
            k,
            next: (k > 0).then(|| (0..k).collect()),
        }
    }
}

impl Iterator for SymmetricSplits {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;

        // Advance the rightmost index that still has room.
        let mut succ = current.clone();
        let mut i = self.k;
        while i > 0 {
            i -= 1;
            if succ[i] < self.n - self.k + i {
                succ[i] += 1;
                for j in i + 1..self.k {
                    succ[j] = succ[j - 1] + 1;
                }
                self.next = Some(succ);
                break;
            }
        }

        Some(current)
    }
}

/// `C(n, k)`, saturating at `u64::MAX`.
pub fn binomial(n: usize, k: usize) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        // Exact at every step: acc * (n - i) is divisible by (i + 1).
        acc = match acc.checked_mul((n - i) as u128) {
            Some(v) => v / (i as u128 + 1),
            None => return u64::MAX,
        };
    }
    u64::try_from(acc).unwrap_or(u64::MAX)
}

/// Choose which splits to evaluate.
pub fn select_splits(block_count: usize, config: &CscvConfig) -> Vec<Vec<usize>> {
    let splits = SymmetricSplits::new(block_count);
    match config.selection {
        SplitSelection::Lexicographic => splits.take(config.max_splits).collect(),
        SplitSelection::Reservoir { seed } => {
            let cap = config.max_splits;
            if cap == 0 {
                return Vec::new();
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let mut reservoir: Vec<Vec<usize>> = Vec::with_capacity(cap.min(4096));
            for (seen, split) in splits.enumerate() {
                if reservoir.len() < cap {
                    reservoir.push(split);
                } else {
                    let j = rng.gen_range(0..=seen);
                    if j < cap {
                        reservoir[j] = split;
                    }
                }
            }
            reservoir.sort();
            reservoir
        }
    }
}

// ─── Core computation ────────────────────────────────────────────────

/// Why a matrix cannot be analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Empty,
    BlockCount(usize),
    Ragged { row: usize, len: usize },
}

fn validate(matrix: &[Vec<f64>]) -> Result<usize, Rejection> {
    let first = matrix.first().ok_or(Rejection::Empty)?;
    let block_count = first.len();
    if block_count < MIN_BLOCK_COUNT || block_count % 2 != 0 {
        return Err(Rejection::BlockCount(block_count));
    }
    if let Some((row, r)) = matrix.iter().enumerate().find(|(_, r)| r.len() != block_count) {
        return Err(Rejection::Ragged { row, len: r.len() });
    }
    Ok(block_count)
}

fn partition_mean(row: &[f64], in_sample: &[bool], want_in_sample: bool) -> Option<f64> {
    let values: Vec<f64> = row
        .iter()
        .zip(in_sample)
        .filter(|(_, &is)| is == want_in_sample)
        .map(|(&v, _)| v)
        .collect();
    mean(&values)
}

/// Mid-rank (1-based, ascending) of `target` among `values`.
fn mid_rank(values: &[f64], target: f64) -> f64 {
    let lower = values.iter().filter(|&&v| v < target).count();
    let equal = values.iter().filter(|&&v| v == target).count();
    lower as f64 + (equal as f64 + 1.0) / 2.0
}

/// Descending ranks (1 = best) of the present values; ties get their average rank.
fn descending_ranks(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut present: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    present.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut ranks = vec![None; values.len()];
    let mut start = 0;
    while start < present.len() {
        let mut end = start + 1;
        while end < present.len() && present[end].1 == present[start].1 {
            end += 1;
        }
        // Positions start+1 ..= end share their mean.
        let shared = (start + 1 + end) as f64 / 2.0;
        for &(i, _) in &present[start..end] {
            ranks[i] = Some(shared);
        }
        start = end;
    }
    ranks
}

#[derive(Debug, Clone, Copy, Default)]
struct StatsAccumulator {
    observations: usize,
    above_median: usize,
    rank_sum: f64,
}

impl StatsAccumulator {
    fn finish(self, oos: &[f64]) -> ConfigStats {
        let n = self.observations;
        let above = (n > 0).then(|| self.above_median as f64 / n as f64);
        ConfigStats {
            failure_probability: above.map(|a| 1.0 - a),
            above_median_fraction: above,
            mean_test_metric: mean(oos),
            average_rank: (n > 0).then(|| self.rank_sum / n as f64),
        }
    }
}

/// Run CSCV over `matrix` and estimate PBO.
///
/// Non-finite cells are treated as missing. Returns `None` when the matrix is
/// empty, ragged, or its block count is odd or below 4.
pub fn compute_cscv_pbo(matrix: &[Vec<f64>], config: &CscvConfig) -> Option<PboReport> {
    let block_count = match validate(matrix) {
        Ok(b) => b,
        Err(reason) => {
            warn!(?reason, "performance matrix rejected for CSCV");
            return None;
        }
    };

    let configs = matrix.len();
    let splits = select_splits(block_count, config);

    let mut lambda_samples = Vec::with_capacity(splits.len());
    let mut oos_distributions = vec![Vec::new(); configs];
    let mut champion_counts = vec![0usize; configs];
    let mut champion_failures = vec![0usize; configs];
    let mut accumulators = vec![StatsAccumulator::default(); configs];

    let mut in_sample = vec![false; block_count];
    for split in &splits {
        in_sample.iter_mut().for_each(|b| *b = false);
        for &idx in split {
            in_sample[idx] = true;
        }

        let is_means: Vec<Option<f64>> = matrix
            .iter()
            .map(|row| partition_mean(row, &in_sample, true))
            .collect();
        let oos_means: Vec<Option<f64>> = matrix
            .iter()
            .map(|row| partition_mean(row, &in_sample, false))
            .collect();

        let mut champion: Option<(usize, f64)> = None;
        for (i, m) in is_means.iter().enumerate() {
            if let Some(m) = *m {
                if champion.map_or(true, |(_, best)| m > best) {
                    champion = Some((i, m));
                }
            }
        }
        let Some((champ, _)) = champion else {
            continue;
        };
        let Some(champ_oos) = oos_means[champ] else {
            continue;
        };

        let valid: Vec<f64> = oos_means.iter().flatten().copied().collect();
        let rank = mid_rank(&valid, champ_oos);
        let q = rank / (valid.len() as f64 + 1.0);
        let lambda = (q / (1.0 - q)).ln();
        lambda_samples.push(lambda);

        let split_median = median(&valid);
        let ranks = descending_ranks(&oos_means);
        for (((dist, acc), m), rank) in oos_distributions
            .iter_mut()
            .zip(accumulators.iter_mut())
            .zip(&oos_means)
            .zip(ranks)
        {
            if let (Some(m), Some(rank)) = (*m, rank) {
                dist.push(m);
                acc.observations += 1;
                acc.rank_sum += rank;
                if split_median.is_some_and(|med| m >= med) {
                    acc.above_median += 1;
                }
            }
        }
        champion_counts[champ] += 1;
        if lambda < 0.0 {
            champion_failures[champ] += 1;
        }
    }

    let evaluated_splits = lambda_samples.len();
    let pbo = (evaluated_splits > 0).then(|| {
        lambda_samples.iter().filter(|&&l| l < 0.0).count() as f64 / evaluated_splits as f64
    });
    let oos_median_by_config = oos_distributions.iter().map(|d| median(d)).collect();
    let champion_pbo = champion_counts
        .iter()
        .zip(&champion_failures)
        .map(|(&wins, &fails)| (wins > 0).then(|| fails as f64 / wins as f64))
        .collect();
    let config_stats = accumulators
        .into_iter()
        .zip(&oos_distributions)
        .map(|(acc, oos)| acc.finish(oos))
        .collect();

    debug!(
        configs,
        block_count,
        total_splits = splits.len(),
        evaluated_splits,
        pbo,
        "cscv complete"
    );

    Some(PboReport {
        block_count,
        pbo,
        lambda_samples,
        oos_distributions,
        oos_median_by_config,
        champion_counts,
        champion_failures,
        champion_pbo,
        config_stats,
        evaluated_splits,
        total_splits: splits.len(),
        possible_splits: binomial(block_count, block_count / 2),
    })
}
