//! Qualitative overfitting verdict.
//!
//! Maps a PBO estimate and a 0–100 overfit score to one of five levels via
//! a fixed decision table. Missing inputs degrade to [`VerdictLevel::Unknown`]
//! (no score) or a score-only decision (no PBO); this never fails.

use serde::{Deserialize, Serialize};

/// Verdict level, most to least favourable (with `Unknown` last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictLevel {
    /// Low PBO and a high score.
    Robust,
    Good,
    /// Borderline; worth a second look before trusting.
    Watch,
    /// Likely overfit.
    High,
    /// Not enough data to judge.
    Unknown,
}

impl VerdictLevel {
    pub fn icon(self) -> &'static str {
        match self {
            VerdictLevel::Robust => "👍",
            VerdictLevel::Good => "✅",
            VerdictLevel::Watch => "⚠️",
            VerdictLevel::High => "🚫",
            VerdictLevel::Unknown => "❔",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VerdictLevel::Robust => "穩健",
            VerdictLevel::Good => "良好",
            VerdictLevel::Watch => "需留意",
            VerdictLevel::High => "高風險",
            VerdictLevel::Unknown => "需更多資料",
        }
    }
}

impl std::fmt::Display for VerdictLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerdictLevel::Robust => "robust",
            VerdictLevel::Good => "good",
            VerdictLevel::Watch => "watch",
            VerdictLevel::High => "high",
            VerdictLevel::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Display-ready verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub level: VerdictLevel,
    pub icon: String,
    pub label: String,
}

impl From<VerdictLevel> for Verdict {
    fn from(level: VerdictLevel) -> Self {
        Self {
            level,
            icon: level.icon().to_string(),
            label: level.label().to_string(),
        }
    }
}

/// Rate `(pbo, overfit_score)`.
///
/// `pbo` is clamped to `[0, 1]` and `overfit_score` to `[0, 100]`; non-finite
/// values count as missing.
pub fn compute_overfit_verdict(pbo: Option<f64>, overfit_score: Option<f64>) -> Verdict {
    let pbo = pbo.filter(|p| p.is_finite()).map(|p| p.clamp(0.0, 1.0));
    let score = overfit_score
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(0.0, 100.0));

    let level = match (pbo, score) {
        (_, None) => VerdictLevel::Unknown,
        (None, Some(s)) => {
            if s >= 80.0 {
                VerdictLevel::Robust
            } else if s >= 60.0 {
                VerdictLevel::Good
            } else if s >= 40.0 {
                VerdictLevel::Watch
            } else {
                VerdictLevel::High
            }
        }
        (Some(p), Some(s)) => {
            if p > 0.5 || s < 30.0 {
                VerdictLevel::High
            } else if p > 0.35 || s < 50.0 {
                VerdictLevel::Watch
            } else if p > 0.15 || s < 75.0 {
                VerdictLevel::Good
            } else {
                VerdictLevel::Robust
            }
        }
    };

    Verdict::from(level)
}
