//! Turning equity curves into a CSCV performance matrix.
//!
//! Each candidate supplies a cumulative-return series in percent. The series
//! is converted to simple daily returns, cut into `B` near-equal contiguous
//! blocks, and each block is reduced to one performance number (annualised
//! Sharpe or compounded return). Rows are then stacked into an S×B matrix
//! using the smallest block count every candidate can support.

use serde::{Deserialize, Serialize};

/// Trading days per year used to annualise Sharpe.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
pub const DEFAULT_BLOCK_COUNT: usize = 10;

/// Per-block performance measure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockMetric {
    /// Annualised Sharpe of the block's daily returns.
    #[default]
    Sharpe,
    /// Compounded return over the block.
    Return,
}

/// Simple daily returns from a cumulative-return series expressed in percent.
///
/// Points that are non-finite or imply non-positive equity are skipped; the
/// next valid point is compared against the last valid one.
pub fn daily_returns_from_cumulative(cumulative_pct: &[f64]) -> Vec<f64> {
    let mut returns = Vec::with_capacity(cumulative_pct.len().saturating_sub(1));
    let mut previous: Option<f64> = None;
    for &pct in cumulative_pct {
        if !pct.is_finite() {
            continue;
        }
        let gross = 1.0 + pct / 100.0;
        if gross <= 0.0 {
            continue;
        }
        if let Some(prev) = previous {
            let r = gross / prev - 1.0;
            if r.is_finite() {
                returns.push(r);
            }
        }
        previous = Some(gross);
    }
    returns
}

/// Largest even block count `≤ requested` that a series of `len` returns
/// supports, or `None` when it supports none.
pub fn resolve_block_count(len: usize, requested: usize) -> Option<usize> {
    if len < 2 {
        return None;
    }
    let requested = if requested > 0 { requested } else { DEFAULT_BLOCK_COUNT };
    let mut block = requested.min(len);
    if block % 2 != 0 {
        block -= 1;
    }
    if block < 2 {
        block = len - len % 2;
    }
    while block > 2 && len < block {
        block -= 2;
    }
    (block >= 2 && block <= len && block % 2 == 0).then_some(block)
}

/// Reduce `daily_returns` to `block_count` per-block metrics.
///
/// Blocks are contiguous; the first `len % block_count` blocks hold one
/// extra observation. A series shorter than `block_count` yields all-NaN
/// (missing) cells.
pub fn compute_block_metrics(daily_returns: &[f64], block_count: usize, metric: BlockMetric) -> Vec<f64> {
    if block_count == 0 {
        return Vec::new();
    }
    let len = daily_returns.len();
    if len < block_count {
        return vec![f64::NAN; block_count];
    }

    let base = len / block_count;
    let remainder = len % block_count;
    let mut metrics = Vec::with_capacity(block_count);
    let mut start = 0;
    for block in 0..block_count {
        let size = base + usize::from(block < remainder);
        let slice = &daily_returns[start..start + size];
        start += size;
        metrics.push(match metric {
            BlockMetric::Return => compounded_return(slice),
            BlockMetric::Sharpe => annualized_sharpe(slice),
        });
    }
    metrics
}

fn compounded_return(slice: &[f64]) -> f64 {
    slice.iter().fold(1.0, |gross, r| gross * (1.0 + r)) - 1.0
}

/// `mean / sample_std · √252`, zero when the block has no spread.
fn annualized_sharpe(slice: &[f64]) -> f64 {
    let n = slice.len();
    if n == 0 {
        return f64::NAN;
    }
    let mean = slice.iter().sum::<f64>() / n as f64;
    let denom = if n > 1 { (n - 1) as f64 } else { 1.0 };
    let variance = slice.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / denom;
    let std = variance.max(0.0).sqrt();
    if std > 0.0 {
        mean / std * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

/// Performance matrix assembled from several return series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMatrix {
    pub block_count: usize,
    pub metric: BlockMetric,
    /// One row per input series, in input order.
    pub rows: Vec<Vec<f64>>,
}

/// Build the matrix for `series` using the smallest block count every series
/// can support on its own. `None` when no series supports any block count.
pub fn build_performance_matrix(
    series: &[Vec<f64>],
    requested_blocks: usize,
    metric: BlockMetric,
) -> Option<BlockMatrix> {
    let block_count = series
        .iter()
        .filter_map(|s| resolve_block_count(s.len(), requested_blocks))
        .min()?;
    let rows = series
        .iter()
        .map(|s| compute_block_metrics(s, block_count, metric))
        .collect();
    Some(BlockMatrix {
        block_count,
        metric,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_returns_skip_invalid_points() {
        let r = daily_returns_from_cumulative(&[0.0, 10.0, f64::NAN, -150.0, 21.0]);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.1).abs() < 1e-12);
        assert!((r[1] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn daily_returns_of_short_series_are_empty() {
        assert!(daily_returns_from_cumulative(&[5.0]).is_empty());
        assert!(daily_returns_from_cumulative(&[]).is_empty());
    }

    #[test]
    fn block_count_resolution() {
        assert_eq!(resolve_block_count(100, 10), Some(10));
        assert_eq!(resolve_block_count(100, 9), Some(8));
        assert_eq!(resolve_block_count(7, 10), Some(6));
        assert_eq!(resolve_block_count(3, 1), Some(2));
        assert_eq!(resolve_block_count(50, 0), Some(10));
        assert_eq!(resolve_block_count(1, 10), None);
    }

    #[test]
    fn remainder_goes_to_leading_blocks() {
        // 5 values into 2 blocks: [1, 1, 1] and [1, 1].
        let returns = [0.01, 0.01, 0.01, 0.02, 0.02];
        let m = compute_block_metrics(&returns, 2, BlockMetric::Return);
        assert!((m[0] - (1.01f64.powi(3) - 1.0)).abs() < 1e-12);
        assert!((m[1] - (1.02f64.powi(2) - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn flat_block_has_zero_sharpe() {
        let m = compute_block_metrics(&[0.01; 8], 4, BlockMetric::Sharpe);
        assert_eq!(m, vec![0.0; 4]);
    }

    #[test]
    fn sharpe_is_annualised() {
        let m = compute_block_metrics(&[0.01, 0.03], 1, BlockMetric::Sharpe);
        let std = (2.0f64 * 0.01f64.powi(2)).sqrt();
        assert!((m[0] - 0.02 / std * 252f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn short_series_yields_missing_cells() {
        let m = compute_block_metrics(&[0.01, 0.02], 4, BlockMetric::Sharpe);
        assert_eq!(m.len(), 4);
        assert!(m.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn matrix_uses_smallest_viable_block_count() {
        let long = vec![0.001; 40];
        let short = vec![0.002; 7];
        let matrix = build_performance_matrix(&[long, short], 10, BlockMetric::Return).unwrap();
        assert_eq!(matrix.block_count, 6);
        assert_eq!(matrix.rows.len(), 2);
        assert!(matrix.rows.iter().all(|r| r.len() == 6));
    }

    #[test]
    fn matrix_needs_one_viable_series() {
        assert!(build_performance_matrix(&[vec![0.1]], 10, BlockMetric::Sharpe).is_none());
        assert!(build_performance_matrix(&[], 10, BlockMetric::Sharpe).is_none());
    }
}
