//! RobustLab Runner — overfitting analysis and search orchestration.
//!
//! This crate builds on `robustlab-core` to provide:
//! - CSCV / Probability of Backtest Overfitting over a performance matrix
//! - Per-candidate island robustness insights and grid plateau detection
//! - Deflated Sharpe Ratio and the composite overfit score
//! - The verdict decision table
//! - Block metrics and the batch overfitting pipeline
//! - Benchmark search orchestration (Hyperband → surrogate screen → SPSA)
//! - TOML configuration and CSV matrix I/O

pub mod batch;
pub mod block_metrics;
pub mod config;
pub mod cscv;
pub mod dsr;
pub mod grid_islands;
pub mod islands;
pub mod matrix_io;
pub mod overfit_score;
pub mod search;
mod stats;
pub mod verdict;

pub use batch::{
    evaluate_batch, BatchCandidate, BatchReport, BatchSummary, CandidateAnalysis, DsrSummary, TopCandidate,
};
pub use block_metrics::{
    build_performance_matrix, compute_block_metrics, daily_returns_from_cumulative, resolve_block_count,
    BlockMatrix, BlockMetric,
};
pub use config::{AnalysisConfig, ConfigError, OverfitSettings, SearchConfig, SurrogateSettings};
pub use cscv::{
    binomial, compute_cscv_pbo, select_splits, ConfigStats, CscvConfig, PboReport, SplitSelection,
    SymmetricSplits,
};
pub use dsr::{compute_dsr, norm_cdf, norm_inv, DsrResult, Moments};
pub use grid_islands::{
    build_grid, detect_islands, Grid, GridCell, GridIsland, GridIslandOptions, GridIslandReport, GridPosition,
    IslandMembership,
};
pub use islands::{
    compute_island_insights, InsightSource, IslandComponents, IslandInsight, SensitivityReport,
    SensitivitySummary, StabilitySource,
};
pub use matrix_io::{matrix_to_csv, read_matrix, read_matrix_file, LabeledMatrix, MatrixCsvOptions, MatrixError};
pub use overfit_score::{compute_overfit_score, OverfitScore, OverfitWeights};
pub use search::{
    run_search, BenchmarkEvaluator, BenchmarkGenerator, BenchmarkObjective, ScreenedEvaluator, SearchProgress,
    SearchReport,
};
pub use verdict::{compute_overfit_verdict, Verdict, VerdictLevel};
