//! Output assembly.
//!
//! Merges the cluster assignment, lineage graph and pseudotime record into a
//! single table keyed by cell id, plus graph metadata and a run summary. The
//! merge does no new computation: identical inputs give an identical table.

use serde::{Deserialize, Serialize};

use crate::cancel::RunStatus;
use crate::curve::{CurveFit, FitStatus};
use crate::embedding::{CellMetadata, Embedding};
use crate::ensemble::{Cluster, ClusterAssignment, EnsembleResult};
use crate::error::{ConvergenceWarning, Error, Result};
use crate::lineage::{Lineage, LineageEdge, LineageGraph};

/// Pseudotime and membership weight of one cell on one lineage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub lineage: usize,
    /// Absent when the cell is not a candidate for this lineage.
    pub pseudotime: Option<f64>,
    pub weight: f64,
}

/// One row of the output table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub cell_id: String,
    /// Cluster id, or -1 when unassigned.
    pub cluster: i32,
    pub stability: f64,
    pub metadata: CellMetadata,
    /// One entry per lineage, ordered by lineage id.
    pub lineages: Vec<LineageEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub cluster: usize,
    pub size: usize,
    pub stability: f64,
    pub centroid: Vec<f64>,
}

/// Lineage graph metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<LineageEdge>,
    /// Absent when the run stopped before the lineage graph was built.
    pub root: Option<usize>,
    pub branch_points: Vec<usize>,
    pub lineages: Vec<Lineage>,
}

/// Draw bookkeeping from the resampling ensemble.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleSummary {
    pub status: RunStatus,
    pub draws_completed: usize,
    pub draws_skipped: usize,
}

impl From<&EnsembleResult> for EnsembleSummary {
    fn from(result: &EnsembleResult) -> Self {
        Self {
            status: result.status,
            draws_completed: result.draws_completed,
            draws_skipped: result.draws_skipped,
        }
    }
}

/// How the run went.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    /// Absent when cluster labels were supplied by the caller.
    pub ensemble: Option<EnsembleSummary>,
    /// Absent when the run stopped before curve fitting.
    pub fit_status: Option<FitStatus>,
    pub curve_iterations: usize,
    pub displacement: f64,
    pub n_cells: usize,
    pub n_clusters: usize,
    pub n_unassigned: usize,
    pub warnings: Vec<ConvergenceWarning>,
}

/// Full pipeline result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryOutput {
    pub cells: Vec<CellRecord>,
    pub graph: GraphSummary,
    pub summary: RunSummary,
}

impl TrajectoryOutput {
    pub fn cell(&self, cell_id: &str) -> Option<&CellRecord> {
        self.cells.iter().find(|c| c.cell_id == cell_id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Merge upstream results into the output table.
///
/// # Arguments
/// * `embedding` - Cell ids and metadata
/// * `assignment` - Labels and stability per cell
/// * `clusters` - Cluster records indexed by id
/// * `graph` - Lineage graph over `clusters`
/// * `fit` - Curve fit over `graph`'s lineages
/// * `ensemble` - Draw bookkeeping, if the ensemble produced the labels
pub fn assemble(
    embedding: &Embedding,
    assignment: &ClusterAssignment,
    clusters: &[Cluster],
    graph: &LineageGraph,
    fit: &CurveFit,
    ensemble: Option<EnsembleSummary>,
) -> Result<TrajectoryOutput> {
    let n = embedding.n_cells();
    if assignment.n_cells() != n || fit.record.n_cells() != n {
        return Err(Error::input(format!(
            "cannot merge results for {} cells: assignment has {}, pseudotime record has {}",
            n,
            assignment.n_cells(),
            fit.record.n_cells()
        )));
    }
    if fit.record.n_lineages() != graph.lineages.len() {
        return Err(Error::input(format!(
            "pseudotime record has {} lineages, graph has {}",
            fit.record.n_lineages(),
            graph.lineages.len()
        )));
    }

    let cells = (0..n)
        .map(|cell| CellRecord {
            cell_id: embedding.cell_ids()[cell].clone(),
            cluster: assignment.label(cell),
            stability: assignment.stability(cell),
            metadata: embedding.metadata(cell).cloned().unwrap_or_default(),
            lineages: (0..graph.lineages.len())
                .map(|lineage| LineageEntry {
                    lineage,
                    pseudotime: fit.record.pseudotime(cell, lineage),
                    weight: fit.record.weight(cell, lineage),
                })
                .collect(),
        })
        .collect();

    let graph_summary = GraphSummary {
        nodes: graph_nodes(clusters),
        edges: graph.edges.clone(),
        root: Some(graph.root),
        branch_points: graph.branch_points.clone(),
        lineages: graph.lineages.clone(),
    };

    let cancelled = fit.status == FitStatus::Cancelled
        || ensemble.map_or(false, |e| e.status.is_cancelled());

    let summary = RunSummary {
        status: if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Complete
        },
        ensemble,
        fit_status: Some(fit.status),
        curve_iterations: fit.iterations,
        displacement: fit.displacement,
        n_cells: n,
        n_clusters: clusters.len(),
        n_unassigned: assignment.n_unassigned(),
        warnings: fit.warning.iter().cloned().collect(),
    };

    Ok(TrajectoryOutput {
        cells,
        graph: graph_summary,
        summary,
    })
}

/// Output carrying the clustering alone, without any lineage work.
///
/// Used when a run is cancelled after clustering (`Cancelled`) or when no
/// cluster survived the consensus (`Complete`). Cells carry their labels and
/// no lineage entries; the graph has nodes but no edges, root or lineages.
pub fn assemble_clusters_only(
    embedding: &Embedding,
    assignment: &ClusterAssignment,
    clusters: &[Cluster],
    ensemble: Option<EnsembleSummary>,
    status: RunStatus,
) -> Result<TrajectoryOutput> {
    let n = embedding.n_cells();
    if assignment.n_cells() != n {
        return Err(Error::input(format!(
            "cannot merge results for {} cells: assignment has {}",
            n,
            assignment.n_cells()
        )));
    }

    let cells = (0..n)
        .map(|cell| CellRecord {
            cell_id: embedding.cell_ids()[cell].clone(),
            cluster: assignment.label(cell),
            stability: assignment.stability(cell),
            metadata: embedding.metadata(cell).cloned().unwrap_or_default(),
            lineages: Vec::new(),
        })
        .collect();

    Ok(TrajectoryOutput {
        cells,
        graph: GraphSummary {
            nodes: graph_nodes(clusters),
            edges: Vec::new(),
            root: None,
            branch_points: Vec::new(),
            lineages: Vec::new(),
        },
        summary: RunSummary {
            status,
            ensemble,
            fit_status: None,
            curve_iterations: 0,
            displacement: 0.0,
            n_cells: n,
            n_clusters: clusters.len(),
            n_unassigned: assignment.n_unassigned(),
            warnings: Vec::new(),
        },
    })
}

fn graph_nodes(clusters: &[Cluster]) -> Vec<GraphNode> {
    clusters
        .iter()
        .map(|c| GraphNode {
            cluster: c.id,
            size: c.size(),
            stability: c.stability,
            centroid: c.centroid.to_vec(),
        })
        .collect()
}
