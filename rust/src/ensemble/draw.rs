//! Resampling draws with parallel accumulation.
//!
//! Each draw subsamples cells, picks k from the configured range and runs the
//! base clusterer. Draws are independent and run on the Rayon pool; every
//! draw owns a generator seeded from the base seed and its index, so the
//! accumulated counts do not depend on scheduling.

use ndarray::Axis;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use super::base::BaseClusterer;
use super::coclustering::{CoClusterCounts, DrawOutcome};
use crate::cancel::CancellationToken;
use crate::config::ClusteringConfig;
use crate::embedding::Embedding;

/// Result of a single draw after retries.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawResult {
    Completed { outcome: DrawOutcome, attempts: usize },
    Skipped { attempts: usize, reason: String },
    Cancelled,
}

/// Aggregated counts and bookkeeping over all draws.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawTally {
    pub counts: CoClusterCounts,
    pub completed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub retries: usize,
}

impl DrawTally {
    pub fn new(n_cells: usize) -> Self {
        Self {
            counts: CoClusterCounts::new(n_cells),
            completed: 0,
            skipped: 0,
            cancelled: 0,
            retries: 0,
        }
    }

    fn record(mut self, result: DrawResult) -> Self {
        match result {
            DrawResult::Completed { outcome, attempts } => {
                self.counts.add_draw(&outcome);
                self.completed += 1;
                self.retries += attempts - 1;
            }
            DrawResult::Skipped { attempts, .. } => {
                self.skipped += 1;
                self.retries += attempts - 1;
            }
            DrawResult::Cancelled => self.cancelled += 1,
        }
        self
    }

    fn merge(self, other: DrawTally) -> Self {
        Self {
            counts: self.counts.merge(other.counts),
            completed: self.completed + other.completed,
            skipped: self.skipped + other.skipped,
            cancelled: self.cancelled + other.cancelled,
            retries: self.retries + other.retries,
        }
    }
}

/// Seed for attempt `attempt` of draw `draw`.
///
/// Attempt 0 uses `seed + draw`; retries step by `num_draws` so no two
/// (draw, attempt) pairs share a generator.
pub fn draw_seed(seed: u64, draw: usize, attempt: usize, num_draws: usize) -> u64 {
    seed.wrapping_add(draw as u64)
        .wrapping_add((attempt as u64).wrapping_mul(num_draws as u64))
}

/// Sample row indices for one draw.
///
/// Without replacement the rows are distinct and sorted. With replacement
/// the rows may repeat (bootstrap) and keep their sampling order.
pub fn sample_cells(
    n_cells: usize,
    size: usize,
    with_replacement: bool,
    rng: &mut StdRng,
) -> Vec<usize> {
    if with_replacement {
        (0..size).map(|_| rng.gen_range(0..n_cells)).collect()
    } else {
        let mut rows = sample(rng, n_cells, size.min(n_cells)).into_vec();
        rows.sort_unstable();
        rows
    }
}

/// Collapse sampled rows and their labels to unique cells.
///
/// Repeated rows are identical points and receive identical labels from
/// any deterministic assignment, so the first occurrence is kept.
fn unique_outcome(rows: &[usize], labels: &[usize]) -> DrawOutcome {
    let mut pairs: Vec<(usize, usize)> = rows.iter().copied().zip(labels.iter().copied()).collect();
    pairs.sort_by_key(|&(row, _)| row);
    pairs.dedup_by_key(|&mut (row, _)| row);
    let (members, labels) = pairs.into_iter().unzip();
    DrawOutcome { members, labels }
}

/// Run one draw, retrying degenerate clusterings with fresh subsamples.
pub fn run_draw<C: BaseClusterer + ?Sized>(
    embedding: &Embedding,
    config: &ClusteringConfig,
    clusterer: &C,
    draw: usize,
) -> DrawResult {
    let n = embedding.n_cells();
    let size = config.subsample_size(n);
    let max_attempts = config.max_retries + 1;
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
        let mut rng = StdRng::seed_from_u64(draw_seed(config.seed, draw, attempt, config.num_draws));
        let rows = sample_cells(n, size, config.with_replacement, &mut rng);
        let k = config.k_range[rng.gen_range(0..config.k_range.len())];
        let points = embedding.values().select(Axis(0), &rows);

        match clusterer.cluster(points.view(), k, &mut rng) {
            Ok(labels) => {
                return DrawResult::Completed {
                    outcome: unique_outcome(&rows, &labels),
                    attempts: attempt + 1,
                };
            }
            Err(e) => {
                debug!(draw, attempt, k, error = %e, "degenerate draw, retrying");
                last_error = e.to_string();
            }
        }
    }

    warn!(
        draw,
        attempts = max_attempts,
        reason = %last_error,
        "skipping draw after exhausting retries"
    );
    DrawResult::Skipped {
        attempts: max_attempts,
        reason: last_error,
    }
}

/// Run all draws in parallel and accumulate co-clustering counts.
///
/// # Arguments
/// * `embedding` - Validated cell embedding
/// * `config` - Ensemble configuration (already validated against the cell count)
/// * `clusterer` - Base clustering primitive
/// * `cancel` - Checked before each draw starts
///
/// # Returns
/// * Summed counters plus completed / skipped / cancelled draw counts
pub fn run_draws_parallel<C: BaseClusterer + ?Sized>(
    embedding: &Embedding,
    config: &ClusteringConfig,
    clusterer: &C,
    cancel: &CancellationToken,
) -> DrawTally {
    let n = embedding.n_cells();

    (0..config.num_draws)
        .into_par_iter()
        .map(|draw| {
            if cancel.is_cancelled() {
                DrawResult::Cancelled
            } else {
                run_draw(embedding, config, clusterer, draw)
            }
        })
        .fold(|| DrawTally::new(n), DrawTally::record)
        .reduce(|| DrawTally::new(n), DrawTally::merge)
}
