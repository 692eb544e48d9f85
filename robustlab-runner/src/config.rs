//! Serializable analysis and search configuration.
//!
//! Both top-level configs load from TOML. Every field has a default, so a
//! partial file (or an empty one) is valid:
//!
//! ```toml
//! [overfit]
//! block_count = 8
//! metric = "return"
//!
//! [overfit.weights]
//! pbo = 0.6
//! dsr = 0.2
//! island = 0.2
//!
//! [overfit.cscv]
//! max_splits = 512
//! selection = { kind = "reservoir", seed = 7 }
//!
//! [overfit.grid_islands]
//! quantile = 0.8
//! min_area = 4
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use robustlab_core::{HyperbandConfig, ParamBound, SpsaConfig};

use crate::block_metrics::{BlockMetric, DEFAULT_BLOCK_COUNT};
use crate::cscv::CscvConfig;
use crate::grid_islands::GridIslandOptions;
use crate::overfit_score::OverfitWeights;
use crate::search::BenchmarkObjective;

/// Errors loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ─── Overfitting analysis ────────────────────────────────────────────

/// Settings for the batch overfitting pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverfitSettings {
    /// Requested number of time blocks; shrunk to fit short series.
    pub block_count: usize,
    pub metric: BlockMetric,
    pub weights: OverfitWeights,
    pub cscv: CscvConfig,
    /// Plateau detection, run when candidates carry grid positions.
    pub grid_islands: GridIslandOptions,
}

impl Default for OverfitSettings {
    fn default() -> Self {
        Self {
            block_count: DEFAULT_BLOCK_COUNT,
            metric: BlockMetric::Sharpe,
            weights: OverfitWeights::default(),
            cscv: CscvConfig::default(),
            grid_islands: GridIslandOptions::default(),
        }
    }
}

impl OverfitSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_count < 2 {
            return Err(ConfigError::Invalid(format!(
                "overfit.block_count must be at least 2, got {}",
                self.block_count
            )));
        }
        if self.cscv.max_splits == 0 {
            return Err(ConfigError::Invalid("overfit.cscv.max_splits must be positive".into()));
        }
        let quantile = self.grid_islands.quantile;
        if !(0.0..1.0).contains(&quantile) {
            return Err(ConfigError::Invalid(format!(
                "overfit.grid_islands.quantile must lie in [0, 1), got {quantile}"
            )));
        }
        Ok(())
    }
}

/// Top-level config for `pbo` / `batch` analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub overfit: OverfitSettings,
}

impl AnalysisConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_config(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.overfit.validate()
    }
}

// ─── Search ──────────────────────────────────────────────────────────

/// RBF pre-screening of Hyperband candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurrogateSettings {
    pub enabled: bool,
    /// Fixed kernel width; adaptive when absent.
    pub gamma: Option<f64>,
    /// Live observations required before predictions are trusted.
    pub warmup: usize,
    /// Share of each batch sent to the live evaluator once warmed up.
    pub keep_fraction: f64,
}

impl Default for SurrogateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            gamma: None,
            warmup: 20,
            keep_fraction: 0.5,
        }
    }
}

/// Top-level config for `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub objective: BenchmarkObjective,
    /// Parameter bounds, keyed by name.
    pub bounds: BTreeMap<String, ParamBound>,
    pub hyperband: HyperbandConfig,
    /// Refine the Hyperband winner with SPSA.
    pub refine: bool,
    pub spsa: SpsaConfig,
    pub surrogate: SurrogateSettings,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let mut bounds = BTreeMap::new();
        bounds.insert("x".to_string(), ParamBound::float(-5.0, 5.0));
        bounds.insert("y".to_string(), ParamBound::float(-5.0, 5.0));
        Self {
            objective: BenchmarkObjective::default(),
            bounds,
            hyperband: HyperbandConfig::default(),
            refine: true,
            spsa: SpsaConfig::default(),
            surrogate: SurrogateSettings::default(),
        }
    }
}

impl SearchConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_config(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bounds.is_empty() {
            return Err(ConfigError::Invalid("search.bounds must define at least one parameter".into()));
        }
        for (name, bound) in &self.bounds {
            if !bound.min.is_finite() || !bound.max.is_finite() || bound.min > bound.max {
                return Err(ConfigError::Invalid(format!(
                    "bound '{name}' must satisfy min <= max, got [{}, {}]",
                    bound.min, bound.max
                )));
            }
        }
        self.hyperband
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.spsa
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let keep = self.surrogate.keep_fraction;
        if !(keep > 0.0 && keep <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "surrogate.keep_fraction must be in (0, 1], got {keep}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cscv::SplitSelection;
    use std::io::Write;

    #[test]
    fn empty_analysis_config_uses_defaults() {
        let config = AnalysisConfig::from_toml_str("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.overfit.block_count, 10);
        assert_eq!(config.overfit.cscv.max_splits, 1024);
    }

    #[test]
    fn partial_analysis_config_overrides() {
        let toml = r#"
            [overfit]
            block_count = 8
            metric = "return"

            [overfit.weights]
            pbo = 0.6

            [overfit.cscv]
            max_splits = 512
            selection = { kind = "reservoir", seed = 7 }
        "#;
        let config = AnalysisConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.overfit.block_count, 8);
        assert_eq!(config.overfit.metric, BlockMetric::Return);
        assert_eq!(config.overfit.weights.pbo, 0.6);
        assert_eq!(config.overfit.weights.dsr, 0.25);
        assert_eq!(config.overfit.cscv.selection, SplitSelection::Reservoir { seed: 7 });
    }

    #[test]
    fn invalid_block_count_is_rejected() {
        let err = AnalysisConfig::from_toml_str("[overfit]\nblock_count = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn grid_island_options_load_and_validate() {
        let config = AnalysisConfig::from_toml_str("[overfit.grid_islands]\nquantile = 0.8\nmin_area = 4\n").unwrap();
        assert_eq!(config.overfit.grid_islands.quantile, 0.8);
        assert_eq!(config.overfit.grid_islands.min_area, 4);
        assert_eq!(config.overfit.grid_islands.gamma, 1.0);

        let err = AnalysisConfig::from_toml_str("[overfit.grid_islands]\nquantile = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = AnalysisConfig::from_toml_str("[overfit\nblock_count = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn search_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
objective = "rastrigin"
refine = false

[bounds]
a = {{ min = 0, max = 10, type = "int" }}
b = {{ min = -1.5, max = 1.5 }}

[hyperband]
seed = 9
rounds = 2

[surrogate]
enabled = true
keep_fraction = 0.25
"#
        )
        .unwrap();

        let config = SearchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.objective, BenchmarkObjective::Rastrigin);
        assert!(!config.refine);
        assert_eq!(config.bounds.len(), 2);
        assert_eq!(config.bounds["a"], ParamBound::int(0.0, 10.0));
        assert_eq!(config.hyperband.seed, 9);
        assert_eq!(config.hyperband.eta, 3.0);
        assert!(config.surrogate.enabled);
        assert_eq!(config.surrogate.warmup, 20);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SearchConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn inverted_bound_is_rejected() {
        let err = SearchConfig::from_toml_str("[bounds]\nx = { min = 3, max = 1 }\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_eta_is_rejected() {
        let err = SearchConfig::from_toml_str("[hyperband]\neta = 1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_keep_fraction_is_rejected() {
        let err = SearchConfig::from_toml_str("[surrogate]\nkeep_fraction = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
