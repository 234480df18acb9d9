//! Simultaneous principal curve fitting with branch reweighting.
//!
//! One curve per lineage, seeded through the lineage's ordered centroids.
//! Each iteration refits every curve (in parallel) by kernel smoothing the
//! cells weighted towards it, reprojects every cell, and recomputes branch
//! weights. The loop stops once the summed squared pseudotime change drops
//! below epsilon, after `max_iterations`, or on cancellation.

use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::principal::PrincipalCurve;
use super::smoother::kernel_smooth;
use crate::cancel::CancellationToken;
use crate::config::CurveConfig;
use crate::embedding::Embedding;
use crate::ensemble::{Cluster, ClusterAssignment};
use crate::error::{ConvergenceWarning, Error, Result};
use crate::lineage::LineageGraph;

/// Added to squared residuals before inverting them.
const RESIDUAL_FLOOR: f64 = 1e-12;

/// How the fitting loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    Converged,
    MaxIterations,
    Cancelled,
}

/// Per (cell, lineage) pseudotime and membership weight.
///
/// Cells that are not candidates for a lineage have no pseudotime and weight
/// 0 there. Each assigned cell's weights sum to 1.
#[derive(Clone, Debug, PartialEq)]
pub struct PseudotimeRecord {
    pseudotime: Vec<Option<f64>>,
    weights: Array2<f64>,
}

impl PseudotimeRecord {
    fn empty(n_cells: usize, n_lineages: usize) -> Self {
        Self {
            pseudotime: vec![None; n_cells * n_lineages],
            weights: Array2::zeros((n_cells, n_lineages)),
        }
    }

    pub fn n_cells(&self) -> usize {
        self.weights.nrows()
    }

    pub fn n_lineages(&self) -> usize {
        self.weights.ncols()
    }

    pub fn pseudotime(&self, cell: usize, lineage: usize) -> Option<f64> {
        self.pseudotime[cell * self.n_lineages() + lineage]
    }

    pub fn weight(&self, cell: usize, lineage: usize) -> f64 {
        self.weights[[cell, lineage]]
    }

    /// Membership weights (cells × lineages).
    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    /// Weight-averaged pseudotime over the lineages a cell belongs to.
    pub fn mean_pseudotime(&self, cell: usize) -> Option<f64> {
        let mut total = 0.0;
        let mut mass = 0.0;
        for lineage in 0..self.n_lineages() {
            if let Some(t) = self.pseudotime(cell, lineage) {
                let w = self.weight(cell, lineage);
                total += w * t;
                mass += w;
            }
        }
        (mass > 0.0).then(|| total / mass)
    }

    /// Sum of squared pseudotime changes over entries defined in both records.
    fn displacement(&self, other: &PseudotimeRecord) -> f64 {
        self.pseudotime
            .iter()
            .zip(other.pseudotime.iter())
            .filter_map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => Some((a - b) * (a - b)),
                _ => None,
            })
            .sum()
    }
}

/// Fitted curves, pseudotimes and loop diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct CurveFit {
    pub curves: Vec<PrincipalCurve>,
    pub record: PseudotimeRecord,
    pub status: FitStatus,
    /// Refit iterations performed.
    pub iterations: usize,
    /// Displacement of the last iteration (0 when none ran).
    pub displacement: f64,
    pub warning: Option<ConvergenceWarning>,
}

/// Which lineages each cell may belong to. Fixed for the whole fit.
#[derive(Clone, Debug)]
struct Candidates {
    lineages: Vec<Vec<usize>>,
    /// Per candidate: the lineage runs through the cell's own cluster and
    /// that cluster is shared by more than one lineage.
    shared: Vec<Vec<bool>>,
}

/// Projection state after one pass over all cells.
struct Assessment {
    record: PseudotimeRecord,
    /// Raw arc length per (cell, lineage) on the current curves.
    arc_lengths: Array2<f64>,
    /// Weight each cell contributes to each lineage's refit.
    refit_weights: Array2<f64>,
}

struct CellAssessment {
    lineages: Vec<usize>,
    pseudotime: Vec<f64>,
    weights: Vec<f64>,
    arc_lengths: Vec<f64>,
    refit: Vec<f64>,
}

/// Fits principal curves under a fixed configuration.
#[derive(Clone, Debug)]
pub struct CurveEngine {
    config: CurveConfig,
}

impl CurveEngine {
    pub fn new(config: CurveConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CurveConfig {
        &self.config
    }

    /// Fit one principal curve per lineage and derive pseudotimes.
    ///
    /// # Arguments
    /// * `embedding` - Cell embedding
    /// * `assignment` - Cluster label per cell; unassigned cells get no pseudotime
    /// * `clusters` - Cluster records indexed by id
    /// * `graph` - Rooted lineage graph over `clusters`
    /// * `cancel` - Checked before every iteration
    ///
    /// # Returns
    /// * Curves, pseudotime record and loop status. Hitting the iteration
    ///   cap attaches a [`ConvergenceWarning`] instead of failing.
    pub fn fit(
        &self,
        embedding: &Embedding,
        assignment: &ClusterAssignment,
        clusters: &[Cluster],
        graph: &LineageGraph,
        cancel: &CancellationToken,
    ) -> Result<CurveFit> {
        if assignment.n_cells() != embedding.n_cells() {
            return Err(Error::input(format!(
                "assignment covers {} cells but the embedding has {}",
                assignment.n_cells(),
                embedding.n_cells()
            )));
        }
        if graph.n_clusters() != clusters.len() || assignment.n_clusters() > clusters.len() {
            return Err(Error::input(format!(
                "lineage graph has {} clusters, cluster set has {}, assignment uses {}",
                graph.n_clusters(),
                clusters.len(),
                assignment.n_clusters()
            )));
        }

        let candidates = candidate_lineages(embedding, assignment, clusters, graph);
        let mut curves = initial_curves(embedding, clusters, graph)?;
        let mut state = self.assess(embedding, clusters, graph, &curves, &candidates);

        let mut status = FitStatus::MaxIterations;
        let mut iterations = 0;
        let mut displacement = 0.0;

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                status = FitStatus::Cancelled;
                break;
            }

            curves = self.refit(embedding, &curves, &state)?;
            let next = self.assess(embedding, clusters, graph, &curves, &candidates);
            displacement = next.record.displacement(&state.record);
            state = next;
            iterations = iteration;

            debug!(iteration, displacement, "curve iteration");

            if displacement < self.config.convergence_epsilon {
                status = FitStatus::Converged;
                break;
            }
        }

        let warning = match status {
            FitStatus::Converged => {
                info!(iterations, displacement, "principal curves converged");
                None
            }
            FitStatus::MaxIterations => {
                let warning = ConvergenceWarning {
                    iterations,
                    displacement,
                    epsilon: self.config.convergence_epsilon,
                };
                warn!(
                    iterations,
                    displacement,
                    epsilon = self.config.convergence_epsilon,
                    "principal curves did not converge"
                );
                Some(warning)
            }
            FitStatus::Cancelled => {
                warn!(iterations, "curve fitting cancelled; returning current estimate");
                None
            }
        };

        Ok(CurveFit {
            curves,
            record: state.record,
            status,
            iterations,
            displacement,
            warning,
        })
    }

    /// Refit every lineage's curve in parallel.
    fn refit(
        &self,
        embedding: &Embedding,
        curves: &[PrincipalCurve],
        state: &Assessment,
    ) -> Result<Vec<PrincipalCurve>> {
        curves
            .par_iter()
            .enumerate()
            .map(|(lineage, curve)| {
                let arcs = state.arc_lengths.column(lineage).to_vec();
                let weights = state.refit_weights.column(lineage).to_vec();
                kernel_smooth(
                    curve,
                    embedding.values(),
                    &arcs,
                    &weights,
                    self.config.smoothing_bandwidth,
                    self.config.curve_points,
                )
            })
            .collect()
    }

    /// Project every cell onto its candidate curves and derive weights.
    fn assess(
        &self,
        embedding: &Embedding,
        clusters: &[Cluster],
        graph: &LineageGraph,
        curves: &[PrincipalCurve],
        candidates: &Candidates,
    ) -> Assessment {
        let n = embedding.n_cells();
        let m = curves.len();

        // Pseudotime origin: the root centroid's projection on each curve
        let root_centroid = clusters[graph.root].centroid.view();
        let origins: Vec<f64> = graph
            .lineages
            .iter()
            .zip(curves.iter())
            .map(|(lineage, curve)| {
                if lineage.clusters.len() == 1 {
                    0.0
                } else {
                    curve.project(root_centroid).arc_length
                }
            })
            .collect();

        let cells: Vec<CellAssessment> = (0..n)
            .into_par_iter()
            .map(|cell| {
                self.assess_cell(
                    embedding,
                    curves,
                    &origins,
                    &candidates.lineages[cell],
                    &candidates.shared[cell],
                    cell,
                )
            })
            .collect();

        let mut record = PseudotimeRecord::empty(n, m);
        let mut arc_lengths = Array2::<f64>::zeros((n, m));
        let mut refit_weights = Array2::<f64>::zeros((n, m));
        for (cell, assessed) in cells.into_iter().enumerate() {
            for (k, &lineage) in assessed.lineages.iter().enumerate() {
                record.pseudotime[cell * m + lineage] = Some(assessed.pseudotime[k]);
                record.weights[[cell, lineage]] = assessed.weights[k];
                arc_lengths[[cell, lineage]] = assessed.arc_lengths[k];
                refit_weights[[cell, lineage]] = assessed.refit[k];
            }
        }

        Assessment {
            record,
            arc_lengths,
            refit_weights,
        }
    }

    fn assess_cell(
        &self,
        embedding: &Embedding,
        curves: &[PrincipalCurve],
        origins: &[f64],
        lineages: &[usize],
        shared: &[bool],
        cell: usize,
    ) -> CellAssessment {
        let point = embedding.row(cell);
        let mut pseudotime = Vec::with_capacity(lineages.len());
        let mut arc_lengths = Vec::with_capacity(lineages.len());
        let mut residuals = Vec::with_capacity(lineages.len());

        for &lineage in lineages {
            let projection = curves[lineage].project(point);
            pseudotime.push((projection.arc_length - origins[lineage]).max(0.0));
            arc_lengths.push(projection.arc_length);
            residuals.push(projection.residual);
        }

        let weights = branch_weights(&residuals, self.config.soft_assignment);

        // Cells before the branch agree on one pseudotime across the lineages
        // sharing their cluster, and count fully towards each of those curves
        let n_shared = shared.iter().filter(|&&s| s).count();
        if n_shared > 0 {
            let mean = pseudotime
                .iter()
                .zip(shared)
                .filter(|(_, s)| **s)
                .map(|(t, _)| t)
                .sum::<f64>()
                / n_shared as f64;
            for (t, _) in pseudotime.iter_mut().zip(shared).filter(|(_, s)| **s) {
                *t = mean;
            }
        }
        let refit = weights
            .iter()
            .zip(shared)
            .map(|(&w, &s)| if s { 1.0 } else { w })
            .collect();

        CellAssessment {
            lineages: lineages.to_vec(),
            pseudotime,
            weights,
            arc_lengths,
            refit,
        }
    }
}

/// Membership weights from projection residuals.
///
/// Soft mode weights each lineage by 1 / (r² + floor), normalized in log
/// space. Hard mode gives weight 1 to the smallest residual (first on ties).
pub fn branch_weights(residuals: &[f64], soft: bool) -> Vec<f64> {
    match residuals.len() {
        0 => return Vec::new(),
        1 => return vec![1.0],
        _ => {}
    }

    if !soft {
        let mut best = 0;
        for (k, &r) in residuals.iter().enumerate() {
            if r < residuals[best] {
                best = k;
            }
        }
        let mut weights = vec![0.0; residuals.len()];
        weights[best] = 1.0;
        return weights;
    }

    // Log-sum-exp normalization of log(1 / (r² + floor))
    let log_weights: Vec<f64> = residuals
        .iter()
        .map(|&r| -(r * r + RESIDUAL_FLOOR).ln())
        .collect();
    let max_log_w = log_weights.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let sum_exp: f64 = log_weights.iter().map(|&lw| (lw - max_log_w).exp()).sum();
    let log_sum = max_log_w + sum_exp.ln();

    log_weights.iter().map(|&lw| (lw - log_sum).exp()).collect()
}

/// Candidate lineages for every cell.
///
/// A cell's own cluster decides its lineages. A cell of a cluster whose parent
/// is a branch point, lying within `branch_sensitivity` of the parent along
/// the parent-to-cluster segment, is also a candidate for every lineage
/// through the parent. Only lineages through the cell's own cluster are
/// marked shared; the extra ones are weighted like any post-branch lineage.
fn candidate_lineages(
    embedding: &Embedding,
    assignment: &ClusterAssignment,
    clusters: &[Cluster],
    graph: &LineageGraph,
) -> Candidates {
    let n = embedding.n_cells();
    let through: Vec<Vec<usize>> = (0..clusters.len())
        .map(|c| graph.lineages_through(c))
        .collect();

    let mut lineages = Vec::with_capacity(n);
    let mut shared = Vec::with_capacity(n);

    for cell in 0..n {
        let Some(cluster) = assignment.cluster_of(cell) else {
            lineages.push(Vec::new());
            shared.push(Vec::new());
            continue;
        };

        let own = &through[cluster];
        let mut candidates = own.clone();

        if let Some(parent) = graph.parent(cluster) {
            if graph.is_branch_point(parent) && graph.branch_sensitivity > 0.0 {
                let from = clusters[parent].centroid.view();
                let to = clusters[cluster].centroid.view();
                let direction = &to - &from;
                let len_sq = direction.dot(&direction);
                if len_sq > 0.0 {
                    let offset = &embedding.row(cell) - &from;
                    let fraction = offset.dot(&direction) / len_sq;
                    if fraction < graph.branch_sensitivity {
                        candidates = through[parent].clone();
                    }
                }
            }
        }

        let is_shared = own.len() > 1;
        shared.push(
            candidates
                .iter()
                .map(|lineage| is_shared && own.contains(lineage))
                .collect(),
        );
        lineages.push(candidates);
    }

    Candidates { lineages, shared }
}

/// Seed curves: a polyline through each lineage's centroids, or the leading
/// axis of the cluster's cells for a single-cluster lineage.
fn initial_curves(
    embedding: &Embedding,
    clusters: &[Cluster],
    graph: &LineageGraph,
) -> Result<Vec<PrincipalCurve>> {
    let d = embedding.n_dims();
    graph
        .lineages
        .iter()
        .map(|lineage| {
            if let [only] = lineage.clusters.as_slice() {
                let members = &clusters[*only].members;
                let points = embedding.values().select(Axis(0), members);
                PrincipalCurve::along_first_axis(points.view())
            } else {
                let knots = Array2::from_shape_fn((lineage.clusters.len(), d), |(i, j)| {
                    clusters[lineage.clusters[i]].centroid[j]
                });
                PrincipalCurve::new(knots)
            }
        })
        .collect()
}
