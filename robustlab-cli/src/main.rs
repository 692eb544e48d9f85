//! RobustLab CLI — overfitting analysis and benchmark search commands.
//!
//! Commands:
//! - `pbo` — CSCV / PBO over a CSV performance matrix, with island insights
//! - `batch` — full overfitting pipeline over a JSON batch of equity curves
//! - `verdict` — rate a `(pbo, score)` pair
//! - `search` — Hyperband then SPSA over a built-in benchmark objective
//!
//! Every command prints one JSON document on stdout. Logs go to stderr and
//! are filtered by `RUST_LOG` (default `info`).

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use robustlab_core::{Candidate, EvaluationResult, HyperbandProgress};
use robustlab_runner::{
    compute_cscv_pbo, compute_island_insights, compute_overfit_score, compute_overfit_verdict, evaluate_batch,
    matrix_to_csv, read_matrix, run_search, AnalysisConfig, BatchCandidate, IslandInsight,
    MatrixCsvOptions, OverfitWeights, PboReport, SearchConfig, SearchProgress, SensitivityReport, Verdict,
};

#[derive(Parser)]
#[command(
    name = "robustlab",
    about = "RobustLab CLI — parameter search and backtest overfitting analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the Probability of Backtest Overfitting for a CSV matrix.
    Pbo {
        /// CSV with one row per configuration and one column per time block.
        #[arg(long)]
        matrix: PathBuf,

        /// First CSV record is a header.
        #[arg(long, default_value_t = false)]
        header: bool,

        /// First CSV column holds a row label.
        #[arg(long, default_value_t = false)]
        labels: bool,

        /// Cap on evaluated splits; overrides the config file.
        #[arg(long)]
        max_splits: Option<usize>,

        /// Analysis TOML config.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the overfitting pipeline over a JSON batch of equity curves.
    Batch {
        /// JSON array of `{label, cumulative_returns, parameter_sensitivity?}`.
        #[arg(long)]
        returns: PathBuf,

        /// Analysis TOML config.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also write the block performance matrix as CSV.
        #[arg(long)]
        matrix_out: Option<PathBuf>,
    },
    /// Rate a PBO / overfit-score pair.
    Verdict {
        /// Probability of backtest overfitting in [0, 1].
        #[arg(long)]
        pbo: Option<f64>,

        /// Composite overfit score in [0, 100].
        #[arg(long)]
        score: Option<f64>,
    },
    /// Search a benchmark objective with Hyperband and SPSA.
    Search {
        /// Search TOML config.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Common wrapper around every command's output.
#[derive(Serialize)]
struct Envelope<T> {
    command: &'static str,
    generated_at: DateTime<Utc>,
    /// BLAKE3 of the primary input file, or of the canonical arguments.
    input_fingerprint: String,
    report: T,
}

impl<T: Serialize> Envelope<T> {
    fn new(command: &'static str, fingerprint: String, report: T) -> Self {
        Self {
            command,
            generated_at: Utc::now(),
            input_fingerprint: fingerprint,
            report,
        }
    }

    fn print(&self) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pbo {
            matrix,
            header,
            labels,
            max_splits,
            config,
        } => run_pbo(&matrix, header, labels, max_splits, config.as_deref()),
        Commands::Batch {
            returns,
            config,
            matrix_out,
        } => run_batch(&returns, config.as_deref(), matrix_out.as_deref()),
        Commands::Verdict { pbo, score } => run_verdict(pbo, score),
        Commands::Search { config } => run_search_cmd(config.as_deref()),
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn load_analysis_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(p) => AnalysisConfig::from_file(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

// ─── pbo ─────────────────────────────────────────────────────────────

/// Per-row view of a CSCV run.
#[derive(Serialize)]
struct RowAnalysis {
    label: String,
    champion_pbo: Option<f64>,
    oos_median: Option<f64>,
    island: IslandInsight,
    /// Score without a DSR signal, which a bare matrix cannot provide.
    overfit_score: f64,
    verdict: Verdict,
}

#[derive(Serialize)]
struct PboOutput {
    pbo: PboReport,
    rows: Vec<RowAnalysis>,
    verdict: Verdict,
}

fn run_pbo(
    path: &Path,
    header: bool,
    labels: bool,
    max_splits: Option<usize>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = load_analysis_config(config_path)?;
    if let Some(max) = max_splits {
        if max == 0 {
            bail!("--max-splits must be positive");
        }
        config.overfit.cscv.max_splits = max;
    }

    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let options = MatrixCsvOptions {
        has_header: header,
        label_column: labels,
    };
    let output = analyze_matrix(&bytes, options, &config).with_context(|| format!("analyzing {}", path.display()))?;
    Envelope::new("pbo", fingerprint(&bytes), output).print()
}

/// Run CSCV and the per-row scoring over a CSV matrix already in memory.
fn analyze_matrix(bytes: &[u8], options: MatrixCsvOptions, config: &AnalysisConfig) -> Result<PboOutput> {
    let matrix = read_matrix(bytes, options)?;
    info!(rows = matrix.rows.len(), "matrix loaded");

    let Some(report) = compute_cscv_pbo(&matrix.rows, &config.overfit.cscv) else {
        bail!("matrix is not usable for CSCV: rows must share one even length of at least 4");
    };

    let no_sensitivity: Vec<Option<SensitivityReport>> = vec![None; matrix.rows.len()];
    let mapping: Vec<(usize, usize)> = (0..matrix.rows.len()).map(|i| (i, i)).collect();
    let insights = compute_island_insights(&no_sensitivity, Some(&report), &mapping);
    let weights: OverfitWeights = config.overfit.weights.normalized();

    let rows: Vec<RowAnalysis> = matrix
        .labels
        .into_iter()
        .zip(insights)
        .enumerate()
        .map(|(i, (label, island))| {
            let champion_pbo = report.champion_pbo.get(i).copied().flatten();
            let pbo = champion_pbo.or(report.pbo);
            let score = compute_overfit_score(pbo, None, island.score, &weights).score;
            RowAnalysis {
                label,
                champion_pbo,
                oos_median: report.oos_median_by_config.get(i).copied().flatten(),
                island,
                overfit_score: score,
                verdict: compute_overfit_verdict(pbo, Some(score)),
            }
        })
        .collect();

    let best_score = rows.iter().map(|r| r.overfit_score).fold(None, |acc: Option<f64>, s| {
        Some(acc.map_or(s, |a| a.max(s)))
    });
    let verdict = compute_overfit_verdict(report.pbo, best_score);
    info!(pbo = report.pbo, splits = report.evaluated_splits, verdict = %verdict.level, "cscv complete");

    Ok(PboOutput {
        pbo: report,
        rows,
        verdict,
    })
}

// ─── batch ───────────────────────────────────────────────────────────

fn run_batch(path: &Path, config_path: Option<&Path>, matrix_out: Option<&Path>) -> Result<()> {
    let config = load_analysis_config(config_path)?;
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let candidates: Vec<BatchCandidate> =
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    if candidates.is_empty() {
        bail!("{} holds no candidates", path.display());
    }

    let Some(report) = evaluate_batch(&candidates, &config.overfit) else {
        bail!("no candidate in {} has enough returns to form two blocks", path.display());
    };

    if let Some(out) = matrix_out {
        let labels: Vec<String> = report.candidates.iter().map(|c| c.label.clone()).collect();
        let rows: Vec<Vec<f64>> = report.candidates.iter().map(|c| c.block_metrics.clone()).collect();
        let csv = matrix_to_csv(&labels, &rows)?;
        std::fs::write(out, csv).with_context(|| format!("writing {}", out.display()))?;
        info!(path = %out.display(), "performance matrix written");
    }

    Envelope::new("batch", fingerprint(&bytes), report).print()
}

// ─── verdict ─────────────────────────────────────────────────────────

fn run_verdict(pbo: Option<f64>, score: Option<f64>) -> Result<()> {
    let verdict = compute_overfit_verdict(pbo, score);
    let args = format!("pbo={pbo:?};score={score:?}");
    Envelope::new("verdict", fingerprint(args.as_bytes()), verdict).print()
}

// ─── search ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SearchOutput {
    best_params: Option<Candidate>,
    best_score: Option<f64>,
    best: Option<EvaluationResult>,
    hyperband_best: Option<EvaluationResult>,
    spsa_steps: usize,
    live_evaluations: usize,
    screened_out: usize,
    surrogate_samples: usize,
}

fn run_search_cmd(config_path: Option<&Path>) -> Result<()> {
    let (config, bytes) = match config_path {
        Some(p) => {
            let bytes = std::fs::read(p).with_context(|| format!("reading {}", p.display()))?;
            (SearchConfig::from_file(p)?, bytes)
        }
        None => (SearchConfig::default(), Vec::new()),
    };

    let progress = |p: &SearchProgress| match p {
        SearchProgress::Hyperband(HyperbandProgress::Hyperband {
            round,
            stage,
            budget,
            candidates_remaining,
            progress,
            ..
        }) => debug!(
            round,
            stage,
            budget,
            remaining = candidates_remaining,
            progress,
            "hyperband stage"
        ),
        SearchProgress::Hyperband(HyperbandProgress::Completed { best, .. }) => {
            debug!(best = best.as_ref().map(|b| b.objective_value), "hyperband finished")
        }
        SearchProgress::Spsa(s) => debug!(step = s.step, best = s.best_score, "spsa step"),
    };
    let report = run_search(&config, Some(&progress), None)?;

    let output = SearchOutput {
        best_params: report.best.as_ref().map(|b| b.candidate.clone()),
        best_score: report.best.as_ref().map(|b| b.objective_value),
        spsa_steps: report.refinement.as_ref().map_or(0, |r| r.steps_completed),
        best: report.best,
        hyperband_best: report.hyperband_best,
        live_evaluations: report.live_evaluations,
        screened_out: report.screened_out,
        surrogate_samples: report.surrogate_samples,
    };

    let fingerprint = if bytes.is_empty() {
        fingerprint(serde_json::to_string(&config)?.as_bytes())
    } else {
        fingerprint(&bytes)
    };
    Envelope::new("search", fingerprint, output).print()
}
