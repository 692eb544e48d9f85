//! Small descriptive-statistics helpers shared by the analysis modules.
//!
//! All helpers ignore non-finite inputs and return `None` when nothing finite
//! remains, rather than inventing a value.

use std::cmp::Ordering;

/// Finite values of `values`, sorted ascending.
pub(crate) fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// Mean of the finite values.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Median of the finite values (average of the middle pair for even counts).
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    let sorted = sorted_finite(values);
    median_of_sorted(&sorted)
}

pub(crate) fn median_of_sorted(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    if n % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Nearest-index percentile of already-sorted values, `p` in `[0, 1]`.
pub(crate) fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let idx = (p * (sorted.len() - 1) as f64).round() as usize;
    Some(sorted[idx])
}

/// Linearly interpolated percentile of the finite values, `p` in `[0, 1]`.
pub(crate) fn interpolated_percentile(values: &[f64], p: f64) -> Option<f64> {
    let sorted = sorted_finite(values);
    if sorted.is_empty() {
        return None;
    }
    let position = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let weight = position - lower as f64;
    Some(sorted[lower] * (1.0 - weight) + sorted[upper] * weight)
}

pub(crate) fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
