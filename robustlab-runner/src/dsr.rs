//! Deflated Sharpe Ratio (DSR).
//!
//! Implements from first principles:
//! - Abramowitz–Stegun approximation of erf, and the normal CDF built on it
//! - Acklam's rational approximation of the inverse normal CDF
//! - Population moments (mean, std, skewness, kurtosis)
//! - DSR: the probability that the observed Sharpe exceeds the expected
//!   maximum Sharpe of `N` unskilled trials, corrected for non-normal returns
//!
//! Reference: Bailey & López de Prado (2014), "The Deflated Sharpe Ratio".

use serde::{Deserialize, Serialize};

use crate::block_metrics::TRADING_DAYS_PER_YEAR;

const MIN_SAMPLES: usize = 3;
const VARIANCE_FLOOR: f64 = 1e-12;

// ─── Math primitives ─────────────────────────────────────────────────

/// Error function, Abramowitz & Stegun 7.1.26 (|error| < 1.5e-7).
pub fn erf(x: f64) -> f64 {
    const P: f64 = 0.3275911;
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;

    let sign = if x >= 0.0 { 1.0 } else { -1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard normal CDF.
pub fn norm_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Inverse standard normal CDF (Acklam, relative error < 1.15e-9).
pub fn norm_inv(p: f64) -> f64 {
    #[allow(clippy::excessive_precision)]
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    #[allow(clippy::excessive_precision)]
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    #[allow(clippy::excessive_precision)]
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    #[allow(clippy::excessive_precision)]
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p.is_nan() {
        return f64::NAN;
    }
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - P_LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

/// Population moments of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    pub mean: f64,
    pub std: f64,
    pub skewness: f64,
    /// Non-excess kurtosis (3 for a normal distribution).
    pub kurtosis: f64,
}

impl Moments {
    pub fn compute(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                mean: 0.0,
                std: 0.0,
                skewness: 0.0,
                kurtosis: 3.0,
            };
        }
        let nf = n as f64;
        let mean = values.iter().sum::<f64>() / nf;
        let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
        for v in values {
            let d = v - mean;
            let d2 = d * d;
            m2 += d2;
            m3 += d2 * d;
            m4 += d2 * d2;
        }
        m2 /= nf;
        m3 /= nf;
        m4 /= nf;
        let std = m2.max(0.0).sqrt();
        Self {
            mean,
            std,
            skewness: if std > 0.0 { m3 / std.powi(3) } else { 0.0 },
            kurtosis: if std > 0.0 { m4 / (m2 * m2) } else { 3.0 },
        }
    }
}

// ─── DSR ─────────────────────────────────────────────────────────────

/// Deflated Sharpe result for one return series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsrResult {
    /// Probability in `[0, 1]`; 0 when the series is too short or flat.
    pub dsr: f64,
    pub sharpe: Option<f64>,
    pub daily_sharpe: Option<f64>,
    pub sample_size: usize,
    pub skewness: Option<f64>,
    pub kurtosis: Option<f64>,
    /// Expected maximum Sharpe under the null across `num_trials`.
    pub sr_star: Option<f64>,
    pub z_value: Option<f64>,
}

impl DsrResult {
    fn degenerate(sample_size: usize, moments: Option<Moments>) -> Self {
        Self {
            dsr: 0.0,
            sharpe: None,
            daily_sharpe: moments.map(|_| 0.0),
            sample_size,
            skewness: moments.map(|m| m.skewness),
            kurtosis: moments.map(|m| m.kurtosis),
            sr_star: None,
            z_value: None,
        }
    }
}

/// Deflated Sharpe Ratio of `daily_returns` given `num_trials` configurations
/// were tried. Non-finite returns are dropped first.
pub fn compute_dsr(daily_returns: &[f64], num_trials: usize) -> DsrResult {
    let returns: Vec<f64> = daily_returns.iter().copied().filter(|r| r.is_finite()).collect();
    let n = returns.len();
    if n < MIN_SAMPLES {
        return DsrResult::degenerate(n, None);
    }

    let moments = Moments::compute(&returns);
    if moments.std == 0.0 {
        return DsrResult::degenerate(n, Some(moments));
    }

    let daily_sharpe = moments.mean / moments.std;
    let trials = num_trials.max(1);
    let sr_star = if trials > 1 {
        norm_inv(1.0 - 1.0 / trials as f64)
    } else {
        0.0
    };
    let variance = 1.0 - moments.skewness * daily_sharpe
        + (moments.kurtosis - 1.0) / 4.0 * daily_sharpe * daily_sharpe;
    let z = (daily_sharpe - sr_star) * ((n - 1) as f64).sqrt() / variance.max(VARIANCE_FLOOR).sqrt();

    DsrResult {
        dsr: norm_cdf(z),
        sharpe: Some(daily_sharpe * TRADING_DAYS_PER_YEAR.sqrt()),
        daily_sharpe: Some(daily_sharpe),
        sample_size: n,
        skewness: Some(moments.skewness),
        kurtosis: Some(moments.kurtosis),
        sr_star: Some(sr_star),
        z_value: Some(z),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erf_known_values() {
        assert!(erf(0.0).abs() < 1e-7);
        assert!((erf(1.0) - 0.8427007929).abs() < 1e-6);
        assert!((erf(-1.0) + 0.8427007929).abs() < 1e-6);
    }

    #[test]
    fn norm_cdf_symmetry() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((norm_cdf(1.3) + norm_cdf(-1.3) - 1.0).abs() < 1e-7);
    }

    #[test]
    fn norm_inv_inverts_cdf() {
        for p in [0.01, 0.1, 0.5, 0.9, 0.975, 0.999] {
            let x = norm_inv(p);
            assert!((norm_cdf(x) - p).abs() < 1e-6, "p={p} x={x}");
        }
        assert!((norm_inv(0.975) - 1.959964).abs() < 1e-5);
    }

    #[test]
    fn norm_inv_tails_have_the_right_sign() {
        assert!((norm_inv(0.01) + 2.326348).abs() < 1e-5);
        assert!((norm_inv(0.995) - 2.575829).abs() < 1e-5);
        assert!((norm_inv(0.001) + norm_inv(0.999)).abs() < 1e-9);
        // Expected max Sharpe under the null grows with the number of trials.
        assert!(norm_inv(1.0 - 1.0 / 200.0) > norm_inv(1.0 - 1.0 / 42.0));
        assert!(norm_inv(1.0 - 1.0 / 42.0) > 0.0);
    }

    #[test]
    fn norm_inv_edges() {
        assert_eq!(norm_inv(0.0), f64::NEG_INFINITY);
        assert_eq!(norm_inv(1.0), f64::INFINITY);
        assert!(norm_inv(f64::NAN).is_nan());
    }

    #[test]
    fn moments_of_symmetric_sample() {
        let m = Moments::compute(&[-1.0, 0.0, 1.0]);
        assert_eq!(m.mean, 0.0);
        assert!((m.std - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(m.skewness, 0.0);
        assert!((m.kurtosis - 1.5).abs() < 1e-12);
    }

    #[test]
    fn flat_series_has_neutral_kurtosis() {
        let m = Moments::compute(&[0.5; 4]);
        assert_eq!(m.std, 0.0);
        assert_eq!(m.kurtosis, 3.0);
    }

    #[test]
    fn short_series_has_zero_dsr() {
        let r = compute_dsr(&[0.01, 0.02], 10);
        assert_eq!(r.dsr, 0.0);
        assert_eq!(r.sample_size, 2);
        assert!(r.sharpe.is_none());
    }

    #[test]
    fn flat_series_has_zero_dsr() {
        let r = compute_dsr(&[0.25; 20], 5);
        assert_eq!(r.dsr, 0.0);
        assert_eq!(r.daily_sharpe, Some(0.0));
    }

    #[test]
    fn more_trials_deflate_the_same_series() {
        let returns: Vec<f64> = (0..120).map(|i| 0.002 + 0.01 * ((i % 7) as f64 - 3.0) / 3.0).collect();
        let single = compute_dsr(&returns, 1);
        let many = compute_dsr(&returns, 200);
        assert_eq!(single.sr_star, Some(0.0));
        assert!(many.sr_star.unwrap() > 2.0);
        assert!(single.dsr > many.dsr);
        assert!((0.0..=1.0).contains(&single.dsr));
    }

    #[test]
    fn positive_drift_beats_negative_drift() {
        let up: Vec<f64> = (0..60).map(|i| 0.003 + 0.01 * ((i % 5) as f64 - 2.0) / 2.0).collect();
        let down: Vec<f64> = up.iter().map(|r| -r).collect();
        assert!(compute_dsr(&up, 1).dsr > 0.5);
        assert!(compute_dsr(&down, 1).dsr < 0.5);
    }
}
