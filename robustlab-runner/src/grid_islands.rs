//! Plateau detection on a two-dimensional parameter grid.
//!
//! When a batch sweeps two parameters (or two strategy families) across a
//! grid, a robust region shows up as a connected patch of cells whose
//! out-of-sample median sits in the top quantile. Cells at or above the
//! quantile threshold are flood-filled with 8-neighbour connectivity; patches
//! smaller than `min_area` are discarded. Each surviving island is scored
//!
//! ```text
//! raw = area/total − α·dispersion − β·edge − γ·mean_pbo
//! ```
//!
//! where `dispersion` is the population std of its cell values and `edge` is
//! how far its mean stands above the mean of the cells bordering it. Raw
//! scores are min-max normalised across the islands found (a single island,
//! or all equal, normalises to 1).

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cscv::PboReport;
use crate::stats::{clamp01, mean, nearest_rank, sorted_finite};

static NEIGHBOURS: [(isize, isize); 8] = [(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, -1), (1, 0), (1, 1)];

/// Position of a configuration on the parameter grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPosition {
    pub row: usize,
    pub col: usize,
}

/// One occupied grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub value: f64,
    /// Configuration the cell belongs to.
    pub index: usize,
    pub pbo: Option<f64>,
}

pub type Grid = Vec<Vec<Option<GridCell>>>;

/// Tuning for [`detect_islands`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridIslandOptions {
    /// Quantile of cell values a cell must reach to join an island, in `[0, 0.99]`.
    pub quantile: f64,
    pub min_area: usize,
    /// Dispersion penalty.
    pub alpha: f64,
    /// Edge-sharpness penalty.
    pub beta: f64,
    /// PBO penalty.
    pub gamma: f64,
}

impl Default for GridIslandOptions {
    fn default() -> Self {
        Self {
            quantile: 0.75,
            min_area: 3,
            alpha: 0.5,
            beta: 0.5,
            gamma: 1.0,
        }
    }
}

/// A connected patch of high-value cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridIsland {
    pub id: usize,
    /// Configuration indices, in flood-fill order.
    pub members: Vec<usize>,
    pub cells: Vec<GridPosition>,
    pub size: usize,
    pub norm_area: f64,
    pub dispersion: f64,
    pub edge_sharpness: f64,
    pub avg_value: f64,
    pub avg_pbo: Option<f64>,
    pub raw_score: f64,
    pub normalized_score: f64,
}

/// Which island a configuration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IslandMembership {
    pub island_id: usize,
    pub normalized_score: f64,
    pub raw_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridIslandReport {
    /// Quantile actually applied after clamping.
    pub quantile: f64,
    /// `None` when the grid holds no finite cell.
    pub threshold: Option<f64>,
    /// Number of occupied cells.
    pub total_cells: usize,
    pub islands: Vec<GridIsland>,
    pub membership: BTreeMap<usize, IslandMembership>,
}

impl GridIslandReport {
    /// Highest-scoring island (the first one on ties).
    pub fn top_island(&self) -> Option<&GridIsland> {
        self.islands
            .iter()
            .reduce(|best, i| if i.normalized_score > best.normalized_score { i } else { best })
    }
}

// ─── Grid construction ───────────────────────────────────────────────

/// Lay configurations out on a grid by position, valued by their OOS median
/// from `report`. Configurations without a position or an OOS median are left
/// out; when two share a cell, the higher value wins.
pub fn build_grid(positions: &[Option<GridPosition>], report: &PboReport) -> Grid {
    let rows = positions.iter().flatten().map(|p| p.row + 1).max().unwrap_or(0);
    let cols = positions.iter().flatten().map(|p| p.col + 1).max().unwrap_or(0);
    let mut grid: Grid = vec![vec![None; cols]; rows];

    for (index, position) in positions.iter().enumerate() {
        let Some(pos) = position else {
            continue;
        };
        let Some(value) = report.oos_median_by_config.get(index).copied().flatten() else {
            continue;
        };
        let pbo = report.config_stats.get(index).and_then(|s| s.failure_probability);
        let slot = &mut grid[pos.row][pos.col];
        if slot.map_or(true, |existing| value > existing.value) {
            *slot = Some(GridCell { value, index, pbo });
        }
    }
    grid
}

// ─── Detection ───────────────────────────────────────────────────────

fn finite_cell(grid: &Grid, r: usize, c: usize) -> Option<GridCell> {
    grid.get(r)
        .and_then(|row| row.get(c))
        .copied()
        .flatten()
        .filter(|cell| cell.value.is_finite())
}

fn neighbours(r: usize, c: usize, rows: usize, cols: usize) -> impl Iterator<Item = (usize, usize)> {
    NEIGHBOURS.iter().filter_map(move |&(dr, dc)| {
        let nr = r.checked_add_signed(dr)?;
        let nc = c.checked_add_signed(dc)?;
        (nr < rows && nc < cols).then_some((nr, nc))
    })
}

fn population_std(values: &[f64]) -> f64 {
    let Some(avg) = mean(values) else {
        return 0.0;
    };
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.max(0.0).sqrt()
}

/// Find islands of high-value cells in `grid`. Rows may be ragged.
pub fn detect_islands(grid: &Grid, options: &GridIslandOptions) -> GridIslandReport {
    let quantile = if options.quantile.is_finite() {
        options.quantile.clamp(0.0, 0.99)
    } else {
        0.75
    };
    let rows = grid.len();
    let cols = grid.iter().map(Vec::len).max().unwrap_or(0);

    let values: Vec<f64> = (0..rows)
        .flat_map(|r| (0..cols).filter_map(move |c| finite_cell(grid, r, c)))
        .map(|cell| cell.value)
        .collect();
    let total_cells = values.len();
    let Some(threshold) = nearest_rank(&sorted_finite(&values), quantile) else {
        return GridIslandReport {
            quantile,
            threshold: None,
            total_cells,
            islands: Vec::new(),
            membership: BTreeMap::new(),
        };
    };

    let min_area = options.min_area.max(1);
    let qualifies = |r: usize, c: usize| finite_cell(grid, r, c).filter(|cell| cell.value >= threshold);
    let mut visited = vec![vec![false; cols]; rows];
    let mut islands = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            if visited[r][c] || qualifies(r, c).is_none() {
                continue;
            }
            visited[r][c] = true;
            let mut queue = VecDeque::from([(r, c)]);
            let mut cells = Vec::new();
            let mut members = Vec::new();
            let mut cell_values = Vec::new();
            let mut pbos = Vec::new();

            while let Some((cr, cc)) = queue.pop_front() {
                let Some(cell) = finite_cell(grid, cr, cc) else {
                    continue;
                };
                cells.push(GridPosition { row: cr, col: cc });
                members.push(cell.index);
                cell_values.push(cell.value);
                pbos.extend(cell.pbo.filter(|p| p.is_finite()));

                for (nr, nc) in neighbours(cr, cc, rows, cols) {
                    if !visited[nr][nc] && qualifies(nr, nc).is_some() {
                        visited[nr][nc] = true;
                        queue.push_back((nr, nc));
                    }
                }
            }

            if cells.len() < min_area {
                continue;
            }

            let avg_value = mean(&cell_values).unwrap_or(0.0);
            let dispersion = population_std(&cell_values);
            let boundary: Vec<f64> = cells
                .iter()
                .flat_map(|p| neighbours(p.row, p.col, rows, cols))
                .filter(|&(nr, nc)| !cells.contains(&GridPosition { row: nr, col: nc }))
                .filter_map(|(nr, nc)| finite_cell(grid, nr, nc))
                .map(|cell| cell.value)
                .collect();
            let edge_sharpness = (avg_value - mean(&boundary).unwrap_or(avg_value)).max(0.0);
            let avg_pbo = mean(&pbos);
            let norm_area = cells.len() as f64 / total_cells as f64;
            let raw_score = norm_area
                - options.alpha * dispersion
                - options.beta * edge_sharpness
                - options.gamma * avg_pbo.unwrap_or(0.0);

            islands.push(GridIsland {
                id: islands.len(),
                size: cells.len(),
                members,
                cells,
                norm_area,
                dispersion,
                edge_sharpness,
                avg_value,
                avg_pbo,
                raw_score,
                normalized_score: 0.0,
            });
        }
    }

    let lo = islands.iter().map(|i| i.raw_score).fold(f64::INFINITY, f64::min);
    let hi = islands.iter().map(|i| i.raw_score).fold(f64::NEG_INFINITY, f64::max);
    let mut membership = BTreeMap::new();
    for island in &mut islands {
        island.normalized_score = if hi > lo {
            clamp01((island.raw_score - lo) / (hi - lo))
        } else {
            1.0
        };
        for &member in &island.members {
            membership.insert(
                member,
                IslandMembership {
                    island_id: island.id,
                    normalized_score: island.normalized_score,
                    raw_score: island.raw_score,
                },
            );
        }
    }

    debug!(total_cells, threshold, islands = islands.len(), "grid islands detected");

    GridIslandReport {
        quantile,
        threshold: Some(threshold),
        total_cells,
        islands,
        membership,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Grid from plain values; every cell is its own configuration, numbered row-major.
    fn grid_of(values: &[&[f64]]) -> Grid {
        let width = values.first().map_or(0, |r| r.len());
        values
            .iter()
            .enumerate()
            .map(|(r, row)| {
                row.iter()
                    .enumerate()
                    .map(|(c, &value)| {
                        value.is_finite().then_some(GridCell {
                            value,
                            index: r * width + c,
                            pbo: None,
                        })
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn empty_grid_has_no_threshold() {
        let report = detect_islands(&Vec::new(), &GridIslandOptions::default());
        assert_eq!(report.threshold, None);
        assert_eq!(report.total_cells, 0);
        assert!(report.islands.is_empty());
    }

    #[test]
    fn plateau_is_found_with_diagonal_links() {
        let grid = grid_of(&[
            &[9.0, 1.0, 1.0, 1.0],
            &[1.0, 9.0, 1.0, 1.0],
            &[1.0, 1.0, 9.0, 9.0],
            &[1.0, 1.0, 1.0, 1.0],
        ]);
        let options = GridIslandOptions {
            quantile: 0.8,
            ..GridIslandOptions::default()
        };
        let report = detect_islands(&grid, &options);
        assert_eq!(report.threshold, Some(9.0));
        assert_eq!(report.total_cells, 16);
        assert_eq!(report.islands.len(), 1);

        let island = &report.islands[0];
        assert_eq!(island.size, 4);
        assert_eq!(island.members, vec![0, 5, 10, 11]);
        assert_eq!(island.dispersion, 0.0);
        assert!((island.avg_value - 9.0).abs() < 1e-12);
        assert!(island.edge_sharpness > 7.0);
        assert!((island.norm_area - 0.25).abs() < 1e-12);
        assert_eq!(island.normalized_score, 1.0);
        assert_eq!(report.membership.len(), 4);
        assert_eq!(report.membership[&10].island_id, 0);
        assert!(!report.membership.contains_key(&1));
    }

    #[test]
    fn small_patches_are_dropped() {
        let grid = grid_of(&[&[5.0, 0.0, 0.0], &[0.0, 0.0, 0.0], &[0.0, 0.0, 5.0]]);
        let report = detect_islands(&grid, &GridIslandOptions::default());
        assert_eq!(report.threshold, Some(0.0));
        // Every cell clears a zero threshold, so the whole grid is one island.
        assert_eq!(report.islands.len(), 1);

        let strict = GridIslandOptions {
            quantile: 0.9,
            ..GridIslandOptions::default()
        };
        let report = detect_islands(&grid, &strict);
        assert_eq!(report.threshold, Some(5.0));
        assert!(report.islands.is_empty());
        assert!(report.membership.is_empty());
    }

    #[test]
    fn scores_normalise_across_islands() {
        let grid = grid_of(&[
            &[8.0, 8.0, 8.0, 0.0, 7.0, 9.0],
            &[8.0, 8.0, 8.0, 0.0, 9.0, 7.0],
            &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ]);
        let options = GridIslandOptions {
            quantile: 0.5,
            ..GridIslandOptions::default()
        };
        let report = detect_islands(&grid, &options);
        assert_eq!(report.islands.len(), 2);
        let (wide, bumpy) = (&report.islands[0], &report.islands[1]);
        assert_eq!(wide.size, 6);
        assert_eq!(bumpy.size, 4);
        assert!(bumpy.dispersion > 0.0);
        assert_eq!(wide.normalized_score, 1.0);
        assert_eq!(bumpy.normalized_score, 0.0);
        assert_eq!(report.top_island().map(|i| i.id), Some(0));
    }

    #[test]
    fn pbo_lowers_the_raw_score() {
        let mut grid = grid_of(&[&[5.0, 5.0, 5.0], &[0.0, 0.0, 0.0]]);
        let options = GridIslandOptions {
            quantile: 0.9,
            ..GridIslandOptions::default()
        };
        let clean = detect_islands(&grid, &options).islands[0].raw_score;
        for cell in grid[0].iter_mut().flatten() {
            cell.pbo = Some(0.4);
        }
        let report = detect_islands(&grid, &options);
        let island = &report.islands[0];
        assert!((island.avg_pbo.unwrap() - 0.4).abs() < 1e-12);
        assert!((clean - island.raw_score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn ragged_rows_and_gaps_are_tolerated() {
        let grid = grid_of(&[&[4.0, 4.0, f64::NAN], &[4.0]]);
        let report = detect_islands(&grid, &GridIslandOptions::default());
        assert_eq!(report.total_cells, 3);
        assert_eq!(report.islands.len(), 1);
        assert_eq!(report.islands[0].size, 3);
    }
}
