//! Hyperband / successive-halving budget scheduler.
//!
//! Each round draws a fresh candidate pool from the generator, evaluates it at
//! the cheapest budget, keeps the top `max(1, floor(n / eta))`, and repeats at
//! the next budget level until the full budget is reached. The best result
//! seen anywhere in the run is returned.
//!
//! Stages run strictly in sequence: the survivors of stage N are the input of
//! stage N+1. Cancellation is cooperative and only checked at round and stage
//! boundaries; an in-flight evaluation is never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, EvaluationResult};
use crate::error::SearchError;
use crate::evaluator::{EvalOptions, Evaluator, Generator};
use crate::rng::SeededRng;

/// Levels closer than this to `max_budget` count as having reached it.
const BUDGET_EPSILON: f64 = 1e-6;
/// Smallest budget fraction ever scheduled.
const MIN_BUDGET_FLOOR: f64 = 0.01;

// ─── Configuration ───────────────────────────────────────────────────

/// Configuration for a Hyperband run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperbandConfig {
    /// Master seed for per-round re-seeding.
    pub seed: u64,
    /// Budget fraction of the first stage (floored at 0.01).
    pub min_budget: f64,
    /// Budget fraction of the last stage (capped at 1.0).
    pub max_budget: f64,
    /// Budget growth / survivor reduction factor. Must exceed 1.
    pub eta: f64,
    /// Number of independent successive-halving rounds.
    pub rounds: usize,
    /// Fresh candidates generated per round.
    pub init_candidates: usize,
}

impl Default for HyperbandConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            min_budget: 0.1,
            max_budget: 1.0,
            eta: 3.0,
            rounds: 3,
            init_candidates: 27,
        }
    }
}

impl HyperbandConfig {
    pub fn validate(&self) -> Result<(), SearchError> {
        if !self.eta.is_finite() || self.eta <= 1.0 {
            return Err(SearchError::InvalidConfig(format!(
                "eta must be a finite number > 1, got {}",
                self.eta
            )));
        }
        if !self.min_budget.is_finite() || !self.max_budget.is_finite() || self.max_budget <= 0.0 {
            return Err(SearchError::InvalidConfig(format!(
                "budgets must be finite with max_budget > 0, got min={} max={}",
                self.min_budget, self.max_budget
            )));
        }
        if self.rounds == 0 {
            return Err(SearchError::InvalidConfig("rounds must be >= 1".into()));
        }
        if self.init_candidates == 0 {
            return Err(SearchError::InvalidConfig(
                "init_candidates must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

// ─── Progress ────────────────────────────────────────────────────────

/// Progress update emitted during a Hyperband run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HyperbandProgress {
    /// Emitted after every stage.
    Hyperband {
        round: usize,
        total_rounds: usize,
        stage: usize,
        stage_count: usize,
        budget: f64,
        candidates_remaining: usize,
        /// Percentage of all stages (across all rounds) completed, 0–100.
        progress: u32,
    },
    /// Emitted once when the run ends, cancelled or not.
    Completed {
        progress: u32,
        best: Option<EvaluationResult>,
    },
}

// ─── Budget ladder ───────────────────────────────────────────────────

/// Build the geometric ladder of budget fractions.
///
/// Starts at `max(0.01, min(min_budget, max_budget))` and multiplies by `eta`
/// until `max_budget` is reached. The ladder is strictly increasing and its
/// last element is always exactly `min(1, max_budget)`.
pub fn build_budget_levels(min_budget: f64, max_budget: f64, eta: f64) -> Vec<f64> {
    let cap = max_budget.min(1.0);
    let mut current = MIN_BUDGET_FLOOR.max(min_budget.min(max_budget)).min(cap);
    let mut levels = vec![current];
    if eta > 1.0 {
        while current < cap - BUDGET_EPSILON {
            current *= eta;
            levels.push(current.min(cap));
        }
    }
    if let Some(last) = levels.last_mut() {
        *last = cap;
    }
    levels
}

/// Number of candidates kept after a stage that evaluated `n`.
pub fn survivor_count(n: usize, eta: f64) -> usize {
    ((n as f64 / eta).floor() as usize).max(1)
}

fn total_stages(config: &HyperbandConfig, stage_count: usize) -> usize {
    config.rounds * stage_count
}

fn percent(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    let pct = (completed as f64 / total as f64 * 100.0).round();
    pct.min(100.0) as u32
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|c| c.load(Ordering::Relaxed))
}

// ─── Core loop ───────────────────────────────────────────────────────

/// Run Hyperband with the LCG seeded from `config.seed`.
///
/// # Arguments
/// - `generator`: produces `init_candidates` fresh candidates per round.
/// - `evaluator`: scores survivors at each budget level.
/// - `objective`: maps a result to the value being maximized.
/// - `progress_cb`: optional per-stage progress callback.
/// - `cancel`: optional flag polled before each round and each stage.
///
/// Returns the best result across all rounds, or `None` when no evaluation
/// produced a usable objective.
pub fn run_hyperband<G, E, O>(
    config: &HyperbandConfig,
    generator: &mut G,
    evaluator: &mut E,
    objective: O,
    progress_cb: Option<&dyn Fn(&HyperbandProgress)>,
    cancel: Option<&AtomicBool>,
) -> Result<Option<EvaluationResult>, SearchError>
where
    G: Generator + ?Sized,
    E: Evaluator + ?Sized,
    O: Fn(&EvaluationResult) -> f64,
{
    let mut rng = SeededRng::new(config.seed);
    run_hyperband_with_rng(
        config,
        &mut rng,
        generator,
        evaluator,
        objective,
        progress_cb,
        cancel,
    )
}

/// Run Hyperband drawing per-round sub-seeds from the supplied RNG.
pub fn run_hyperband_with_rng<R, G, E, O>(
    config: &HyperbandConfig,
    rng: &mut R,
    generator: &mut G,
    evaluator: &mut E,
    objective: O,
    progress_cb: Option<&dyn Fn(&HyperbandProgress)>,
    cancel: Option<&AtomicBool>,
) -> Result<Option<EvaluationResult>, SearchError>
where
    R: rand::RngCore + ?Sized,
    G: Generator + ?Sized,
    E: Evaluator + ?Sized,
    O: Fn(&EvaluationResult) -> f64,
{
    config.validate()?;

    let levels = build_budget_levels(config.min_budget, config.max_budget, config.eta);
    let stage_count = levels.len();
    let total = total_stages(config, stage_count);
    let mut completed_stages = 0usize;
    let mut global_best: Option<(f64, EvaluationResult)> = None;

    debug!(?levels, rounds = config.rounds, eta = config.eta, "hyperband budget ladder");

    'rounds: for round in 1..=config.rounds {
        if is_cancelled(cancel) {
            warn!(round, "hyperband cancelled before round");
            break;
        }

        let round_seed = u64::from(rng.next_u32());
        let mut candidates: Vec<Candidate> =
            generator.create_initial_candidates(config.init_candidates, round_seed)?;

        for (stage_idx, &budget) in levels.iter().enumerate() {
            if is_cancelled(cancel) {
                warn!(round, stage = stage_idx + 1, "hyperband cancelled before stage");
                break 'rounds;
            }
            if candidates.is_empty() {
                continue 'rounds;
            }

            let mut scored: Vec<(f64, EvaluationResult)> = evaluator
                .evaluate(&candidates, &EvalOptions { budget })?
                .into_iter()
                .map(|r| {
                    let score = objective(&r);
                    (if score.is_nan() { f64::NEG_INFINITY } else { score }, r)
                })
                .collect();

            if scored.is_empty() {
                debug!(round, stage = stage_idx + 1, "evaluator returned nothing; next round");
                continue 'rounds;
            }

            // Stable sort keeps the evaluator's order among equal scores.
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));

            for (score, result) in &scored {
                let beats = match &global_best {
                    Some((best, _)) => *score > *best,
                    None => *score > f64::NEG_INFINITY,
                };
                if beats {
                    global_best = Some((*score, result.clone()));
                }
            }

            let keep = survivor_count(scored.len(), config.eta);
            scored.truncate(keep);
            candidates = scored.into_iter().map(|(_, r)| r.candidate).collect();

            completed_stages += 1;
            debug!(
                round,
                stage = stage_idx + 1,
                budget,
                survivors = candidates.len(),
                best = global_best.as_ref().map(|(s, _)| *s),
                "hyperband stage complete"
            );

            if let Some(cb) = progress_cb {
                cb(&HyperbandProgress::Hyperband {
                    round,
                    total_rounds: config.rounds,
                    stage: stage_idx + 1,
                    stage_count,
                    budget,
                    candidates_remaining: candidates.len(),
                    progress: percent(completed_stages, total),
                });
            }
        }
    }

    let best = global_best.map(|(_, r)| r);
    info!(
        completed_stages,
        total_stages = total,
        best = best.as_ref().map(|r| r.objective_value),
        "hyperband finished"
    );

    if let Some(cb) = progress_cb {
        cb(&HyperbandProgress::Completed {
            progress: 100,
            best: best.clone(),
        });
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::evaluator::{FnEvaluator, FnGenerator};
    use std::cell::RefCell;

    fn grid_generator() -> impl Generator {
        FnGenerator::new(|n: usize, seed: u64| {
            Ok::<_, CollaboratorError>(
                (0..n)
                    .map(|i| Candidate::new().with("x", i as f64).with("seed", seed as f64))
                    .collect::<Vec<_>>(),
            )
        })
    }

    fn peak_at(target: f64) -> impl Evaluator {
        FnEvaluator::new(move |cands: &[Candidate], opts: &EvalOptions| {
            Ok::<_, CollaboratorError>(
                cands
                    .iter()
                    .map(|c| {
                        let x = c.get("x").unwrap_or(0.0);
                        EvaluationResult::new(c.clone(), -(x - target).powi(2) * opts.budget)
                    })
                    .collect::<Vec<_>>(),
            )
        })
    }

    #[test]
    fn ladder_default_geometry() {
        let levels = build_budget_levels(0.1, 1.0, 3.0);
        assert_eq!(levels.len(), 4);
        assert!((levels[0] - 0.1).abs() < 1e-12);
        assert!((levels[1] - 0.3).abs() < 1e-12);
        assert!((levels[2] - 0.9).abs() < 1e-12);
        assert_eq!(levels[3], 1.0);
    }

    #[test]
    fn ladder_caps_at_one() {
        let levels = build_budget_levels(0.2, 5.0, 2.0);
        assert_eq!(*levels.last().unwrap(), 1.0);
        assert!(levels.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ladder_ends_at_sub_unit_max() {
        let levels = build_budget_levels(0.05, 0.5, 4.0);
        assert_eq!(*levels.last().unwrap(), 0.5);
        assert!(levels.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ladder_floors_min_budget() {
        let levels = build_budget_levels(0.0, 1.0, 10.0);
        assert!((levels[0] - 0.01).abs() < 1e-12);
        assert_eq!(*levels.last().unwrap(), 1.0);
    }

    #[test]
    fn ladder_single_level_when_min_equals_max() {
        assert_eq!(build_budget_levels(1.0, 1.0, 3.0), vec![1.0]);
    }

    #[test]
    fn survivors_follow_floor_rule() {
        assert_eq!(survivor_count(27, 3.0), 9);
        assert_eq!(survivor_count(10, 3.0), 3);
        assert_eq!(survivor_count(2, 3.0), 1);
        assert_eq!(survivor_count(1, 3.0), 1);
    }

    #[test]
    fn finds_peak() {
        let config = HyperbandConfig {
            init_candidates: 20,
            rounds: 2,
            ..HyperbandConfig::default()
        };
        let best = run_hyperband(
            &config,
            &mut grid_generator(),
            &mut peak_at(7.0),
            |r: &EvaluationResult| r.objective_value,
            None,
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(best.candidate.get("x"), Some(7.0));
    }

    #[test]
    fn progress_is_monotone_and_completes() {
        let events = RefCell::new(Vec::new());
        let cb = |p: &HyperbandProgress| events.borrow_mut().push(p.clone());
        let config = HyperbandConfig {
            init_candidates: 9,
            rounds: 2,
            ..HyperbandConfig::default()
        };
        run_hyperband(
            &config,
            &mut grid_generator(),
            &mut peak_at(3.0),
            |r: &EvaluationResult| r.objective_value,
            Some(&cb),
            None,
        )
        .unwrap();

        let events = events.into_inner();
        // 2 rounds × 4 levels + final
        assert_eq!(events.len(), 9);
        let mut last = 0;
        for e in &events[..8] {
            match e {
                HyperbandProgress::Hyperband { progress, .. } => {
                    assert!(*progress >= last);
                    last = *progress;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(last, 100);
        assert!(matches!(
            events[8],
            HyperbandProgress::Completed { progress: 100, best: Some(_) }
        ));
    }

    #[test]
    fn survivors_shrink_by_eta() {
        let events = RefCell::new(Vec::new());
        let cb = |p: &HyperbandProgress| events.borrow_mut().push(p.clone());
        let config = HyperbandConfig {
            init_candidates: 27,
            rounds: 1,
            ..HyperbandConfig::default()
        };
        run_hyperband(
            &config,
            &mut grid_generator(),
            &mut peak_at(3.0),
            |r: &EvaluationResult| r.objective_value,
            Some(&cb),
            None,
        )
        .unwrap();
        let remaining: Vec<usize> = events
            .into_inner()
            .iter()
            .filter_map(|e| match e {
                HyperbandProgress::Hyperband {
                    candidates_remaining,
                    ..
                } => Some(*candidates_remaining),
                _ => None,
            })
            .collect();
        assert_eq!(remaining, vec![9, 3, 1, 1]);
    }

    #[test]
    fn cancelled_before_start_returns_none() {
        let cancel = AtomicBool::new(true);
        let best = run_hyperband(
            &HyperbandConfig::default(),
            &mut grid_generator(),
            &mut peak_at(3.0),
            |r: &EvaluationResult| r.objective_value,
            None,
            Some(&cancel),
        )
        .unwrap();
        assert!(best.is_none());
    }

    #[test]
    fn empty_evaluations_yield_none() {
        let mut evaluator = FnEvaluator::new(|_: &[Candidate], _: &EvalOptions| {
            Ok::<_, CollaboratorError>(Vec::<EvaluationResult>::new())
        });
        let best = run_hyperband(
            &HyperbandConfig::default(),
            &mut grid_generator(),
            &mut evaluator,
            |r: &EvaluationResult| r.objective_value,
            None,
            None,
        )
        .unwrap();
        assert!(best.is_none());
    }

    #[test]
    fn unusable_results_never_become_best() {
        let mut evaluator = FnEvaluator::new(|cands: &[Candidate], _: &EvalOptions| {
            Ok::<_, CollaboratorError>(
                cands
                    .iter()
                    .map(|c| EvaluationResult::unusable(c.clone()))
                    .collect::<Vec<_>>(),
            )
        });
        let best = run_hyperband(
            &HyperbandConfig::default(),
            &mut grid_generator(),
            &mut evaluator,
            |r: &EvaluationResult| r.objective_value,
            None,
            None,
        )
        .unwrap();
        assert!(best.is_none());
    }

    #[test]
    fn ties_keep_first_winner() {
        let mut evaluator = FnEvaluator::new(|cands: &[Candidate], _: &EvalOptions| {
            Ok::<_, CollaboratorError>(
                cands
                    .iter()
                    .map(|c| EvaluationResult::new(c.clone(), 1.0))
                    .collect::<Vec<_>>(),
            )
        });
        let config = HyperbandConfig {
            rounds: 1,
            init_candidates: 5,
            ..HyperbandConfig::default()
        };
        let best = run_hyperband(
            &config,
            &mut grid_generator(),
            &mut evaluator,
            |r: &EvaluationResult| r.objective_value,
            None,
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(best.candidate.get("x"), Some(0.0));
    }

    #[test]
    fn nan_scores_are_pruned_first() {
        let stages = RefCell::new(Vec::new());
        let mut evaluator = FnEvaluator::new(|cands: &[Candidate], _: &EvalOptions| {
            let xs: Vec<f64> = cands.iter().map(|c| c.get("x").unwrap()).collect();
            stages.borrow_mut().push(xs);
            Ok::<_, CollaboratorError>(
                cands
                    .iter()
                    .map(|c| {
                        let x = c.get("x").unwrap();
                        EvaluationResult::new(c.clone(), if x == 0.0 { f64::NAN } else { x })
                    })
                    .collect::<Vec<_>>(),
            )
        });
        let config = HyperbandConfig {
            rounds: 1,
            init_candidates: 9,
            ..HyperbandConfig::default()
        };
        let best = run_hyperband(
            &config,
            &mut grid_generator(),
            &mut evaluator,
            |r: &EvaluationResult| r.objective_value,
            None,
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(best.candidate.get("x"), Some(8.0));
        let stages = stages.into_inner();
        assert_eq!(stages[1], vec![8.0, 7.0, 6.0]);
        assert!(stages[1..].iter().all(|xs| !xs.contains(&0.0)));
    }

    #[test]
    fn evaluator_errors_propagate() {
        let mut evaluator = FnEvaluator::new(|_: &[Candidate], _: &EvalOptions| {
            Err::<Vec<EvaluationResult>, _>("engine offline")
        });
        let err = run_hyperband(
            &HyperbandConfig::default(),
            &mut grid_generator(),
            &mut evaluator,
            |r: &EvaluationResult| r.objective_value,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SearchError::Evaluator(_)));
    }

    #[test]
    fn invalid_eta_fails_fast() {
        let config = HyperbandConfig {
            eta: 1.0,
            ..HyperbandConfig::default()
        };
        let calls = RefCell::new(0);
        let mut evaluator = FnEvaluator::new(|_: &[Candidate], _: &EvalOptions| {
            *calls.borrow_mut() += 1;
            Ok::<_, CollaboratorError>(Vec::<EvaluationResult>::new())
        });
        let err = run_hyperband(
            &config,
            &mut grid_generator(),
            &mut evaluator,
            |r: &EvaluationResult| r.objective_value,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SearchError::InvalidConfig(_)));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn rounds_use_distinct_seeds() {
        let seeds = RefCell::new(Vec::new());
        let mut generator = FnGenerator::new(|n: usize, seed: u64| {
            seeds.borrow_mut().push(seed);
            Ok::<_, CollaboratorError>(vec![Candidate::new().with("x", 1.0); n])
        });
        let config = HyperbandConfig {
            rounds: 3,
            init_candidates: 3,
            ..HyperbandConfig::default()
        };
        run_hyperband(
            &config,
            &mut generator,
            &mut peak_at(1.0),
            |r: &EvaluationResult| r.objective_value,
            None,
            None,
        )
        .unwrap();
        let seeds = seeds.into_inner();
        assert_eq!(seeds.len(), 3);
        assert_ne!(seeds[0], seeds[1]);
        assert_ne!(seeds[1], seeds[2]);
    }
}
