//! End-to-end trajectory inference.
//!
//! Embedding -> resampling ensemble -> lineage graph -> principal curves ->
//! output table. Each stage reads the previous stage's records by reference
//! and never mutates them.

use tracing::{info, warn};

use crate::cancel::{CancellationToken, RunStatus};
use crate::config::PipelineConfig;
use crate::curve::CurveEngine;
use crate::embedding::Embedding;
use crate::ensemble::{Cluster, ClusterAssignment, ResamplingEnsemble};
use crate::error::Result;
use crate::lineage::GraphBuilder;
use crate::output::{assemble, assemble_clusters_only, EnsembleSummary, TrajectoryOutput};

/// Configured trajectory inference pipeline.
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Cluster the embedding, then infer lineages and pseudotime.
    ///
    /// Cancellation during clustering stops before lineage inference and
    /// returns the clustering alone; cancellation during curve fitting
    /// returns the current curves. Both are marked cancelled.
    pub fn run(&self, embedding: &Embedding, cancel: &CancellationToken) -> Result<TrajectoryOutput> {
        let ensemble = ResamplingEnsemble::new(self.config.clustering.clone())?;
        let result = ensemble.run(embedding, cancel)?;
        let summary = EnsembleSummary::from(&result);

        if result.status.is_cancelled() || cancel.is_cancelled() {
            warn!("cancelled after clustering; skipping lineage inference");
            let summary = EnsembleSummary {
                status: RunStatus::Cancelled,
                ..summary
            };
            return assemble_clusters_only(
                embedding,
                &result.assignment,
                &result.clusters,
                Some(summary),
                RunStatus::Cancelled,
            );
        }

        self.infer(embedding, &result.assignment, &result.clusters, Some(summary), cancel)
    }

    /// Infer lineages and pseudotime from caller-supplied cluster labels.
    ///
    /// Labels are -1 (unassigned) or contiguous ids 0..m.
    pub fn run_with_labels(
        &self,
        embedding: &Embedding,
        labels: Vec<i32>,
        cancel: &CancellationToken,
    ) -> Result<TrajectoryOutput> {
        let (assignment, clusters) = ClusterAssignment::from_labels(embedding, labels)?;
        self.infer(embedding, &assignment, &clusters, None, cancel)
    }

    fn infer(
        &self,
        embedding: &Embedding,
        assignment: &ClusterAssignment,
        clusters: &[Cluster],
        ensemble: Option<EnsembleSummary>,
        cancel: &CancellationToken,
    ) -> Result<TrajectoryOutput> {
        if clusters.is_empty() {
            warn!(
                cells = embedding.n_cells(),
                "no cluster survived the consensus; skipping lineage inference"
            );
            return assemble_clusters_only(
                embedding,
                assignment,
                clusters,
                ensemble,
                RunStatus::Complete,
            );
        }

        let graph = GraphBuilder::new(self.config.lineage.clone())?.build(clusters)?;
        let fit = CurveEngine::new(self.config.curve.clone())?.fit(
            embedding,
            assignment,
            clusters,
            &graph,
            cancel,
        )?;

        let output = assemble(embedding, assignment, clusters, &graph, &fit, ensemble)?;
        info!(
            cells = output.summary.n_cells,
            clusters = output.summary.n_clusters,
            lineages = output.graph.lineages.len(),
            status = ?output.summary.status,
            "trajectory inference finished"
        );
        Ok(output)
    }
}

/// Run the full pipeline with `config`.
pub fn run(
    embedding: &Embedding,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<TrajectoryOutput> {
    Pipeline::new(config.clone())?.run(embedding, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusteringConfig, CurveConfig, LineageConfig};
    use crate::curve::FitStatus;
    use crate::error::Error;
    use ndarray::Array2;

    /// 60 cells in three blobs centred at (0,0), (1,0), (2,0).
    ///
    /// Row i belongs to blob i % 3, so cluster ids follow x order.
    fn linear_embedding() -> Embedding {
        let n = 60;
        let mut values = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let blob = (i % 3) as f64;
            let k = i / 3;
            values[[i, 0]] = blob + ((k * 7) % 10) as f64 * 0.01 - 0.045;
            values[[i, 1]] = ((k * 3) % 10) as f64 * 0.01 - 0.045;
        }
        Embedding::from_matrix(values).unwrap()
    }

    fn linear_config() -> PipelineConfig {
        PipelineConfig {
            clustering: ClusteringConfig {
                num_draws: 20,
                subsample_fraction: 0.8,
                k_range: vec![3],
                min_cluster_size: 5,
                seed: 7,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Root arm along -x, two arms at ±45 degrees from the origin.
    ///
    /// Returns the embedding, labels, and each cell's distance from the origin.
    fn bifurcation() -> (Embedding, Vec<i32>, Vec<f64>) {
        let per_arm = 15;
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        let mut radius = Vec::new();
        let diag = std::f64::consts::FRAC_1_SQRT_2;

        for k in 0..per_arm {
            let r = 0.1 + 0.05 * k as f64;
            let wobble = if k % 2 == 0 { 0.01 } else { -0.01 };
            // Root cells between x = -0.8 and -0.1
            rows.push([-r, wobble]);
            labels.push(0);
            radius.push(r);
            // Upper arm
            let s = 0.3 + 0.1 * k as f64;
            rows.push([s * diag - wobble * diag, s * diag + wobble * diag]);
            labels.push(1);
            radius.push(s);
            // Lower arm
            rows.push([s * diag + wobble * diag, -s * diag + wobble * diag]);
            labels.push(2);
            radius.push(s);
        }

        let n = rows.len();
        let values = Array2::from_shape_fn((n, 2), |(i, j)| rows[i][j]);
        (Embedding::from_matrix(values).unwrap(), labels, radius)
    }

    fn bifurcation_config(soft: bool) -> PipelineConfig {
        PipelineConfig {
            lineage: LineageConfig {
                root_cluster: Some(0),
                branch_sensitivity: 0.6,
                ..Default::default()
            },
            curve: CurveConfig {
                soft_assignment: soft,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_linear_dataset_single_lineage() {
        let embedding = linear_embedding();
        let output = run(&embedding, &linear_config(), &CancellationToken::new()).unwrap();

        assert_eq!(output.summary.n_clusters, 3);
        assert_eq!(output.summary.status, RunStatus::Complete);
        assert!(output.graph.branch_points.is_empty());
        assert_eq!(output.graph.edges.len(), 2);
        assert_eq!(output.graph.lineages.len(), 1);
        assert_eq!(output.graph.lineages[0].clusters, vec![0, 1, 2]);

        // Cluster-mean pseudotime follows the lineage order
        let mean_time = |cluster: i32| {
            let times: Vec<f64> = output
                .cells
                .iter()
                .filter(|c| c.cluster == cluster)
                .map(|c| c.lineages[0].pseudotime.unwrap())
                .collect();
            times.iter().sum::<f64>() / times.len() as f64
        };
        assert!(mean_time(0) < mean_time(1));
        assert!(mean_time(1) < mean_time(2));
    }

    #[test]
    fn test_same_seed_gives_identical_output() {
        let embedding = linear_embedding();
        let config = linear_config();
        let a = run(&embedding, &config, &CancellationToken::new()).unwrap();
        let b = run(&embedding, &config, &CancellationToken::new()).unwrap();
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_bifurcation_pseudotime_and_weights() {
        let (embedding, labels, radius) = bifurcation();
        let pipeline = Pipeline::new(bifurcation_config(true)).unwrap();
        let output = pipeline
            .run_with_labels(&embedding, labels.clone(), &CancellationToken::new())
            .unwrap();

        assert_eq!(output.graph.root, Some(0));
        assert_eq!(output.graph.branch_points, vec![0]);
        assert_eq!(output.graph.lineages.len(), 2);

        for cell in &output.cells {
            let total: f64 = cell.lineages.iter().map(|e| e.weight).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }

        // Root cells sit before the branch: both lineages, same pseudotime
        for cell in output.cells.iter().filter(|c| c.cluster == 0) {
            assert!(cell.lineages[0].weight > 0.0);
            assert!(cell.lineages[1].weight > 0.0);
            assert_eq!(cell.lineages[0].pseudotime, cell.lineages[1].pseudotime);
        }

        // The arm cell closest to the branch is a candidate for both lineages
        let near = (0..labels.len())
            .filter(|&i| labels[i] == 1)
            .min_by(|&a, &b| radius[a].total_cmp(&radius[b]))
            .unwrap();
        let entries = &output.cells[near].lineages;
        assert!(entries[0].weight > 0.0);
        assert!(entries[1].weight > 0.0);
        assert!(entries[0].weight > entries[1].weight);

        // Pseudotime grows from the root outward on each arm
        for (lineage, arm) in [(0usize, 1i32), (1, 2)] {
            let mut arm_cells: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == arm).collect();
            arm_cells.sort_by(|&a, &b| radius[a].total_cmp(&radius[b]));
            let times: Vec<f64> = arm_cells
                .iter()
                .map(|&i| output.cells[i].lineages[lineage].pseudotime.unwrap())
                .collect();
            assert!(times.windows(2).all(|w| w[0] <= w[1] + 1e-6));

            let root_mean = output
                .cells
                .iter()
                .filter(|c| c.cluster == 0)
                .map(|c| c.lineages[lineage].pseudotime.unwrap())
                .sum::<f64>()
                / 15.0;
            assert!(root_mean < times[times.len() - 1]);
        }
    }

    #[test]
    fn test_bifurcation_hard_assignment() {
        let (embedding, labels, _) = bifurcation();
        let pipeline = Pipeline::new(bifurcation_config(false)).unwrap();
        let output = pipeline
            .run_with_labels(&embedding, labels, &CancellationToken::new())
            .unwrap();

        for cell in &output.cells {
            let ones = cell.lineages.iter().filter(|e| e.weight == 1.0).count();
            let zeros = cell.lineages.iter().filter(|e| e.weight == 0.0).count();
            assert_eq!(ones, 1);
            assert_eq!(zeros, cell.lineages.len() - 1);
        }
    }

    #[test]
    fn test_identical_cells_terminate() {
        let embedding = Embedding::from_matrix(Array2::from_elem((12, 2), 0.5)).unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let output = pipeline
            .run_with_labels(&embedding, vec![0; 12], &CancellationToken::new())
            .unwrap();

        assert_eq!(output.summary.fit_status, Some(FitStatus::Converged));
        assert!(output.summary.curve_iterations <= CurveConfig::default().max_iterations);
        for cell in &output.cells {
            assert_eq!(cell.lineages[0].pseudotime, Some(0.0));
        }
    }

    #[test]
    fn test_identical_cells_cannot_be_clustered() {
        let embedding = Embedding::from_matrix(Array2::from_elem((40, 2), 0.5)).unwrap();
        let config = PipelineConfig {
            clustering: ClusteringConfig {
                num_draws: 5,
                k_range: vec![2],
                ..Default::default()
            },
            ..Default::default()
        };
        let result = run(&embedding, &config, &CancellationToken::new());
        assert!(matches!(result, Err(Error::NumericalInstability(_))));
    }

    #[test]
    fn test_iteration_cap_surfaces_warning() {
        let (embedding, labels, _) = bifurcation();
        let mut config = bifurcation_config(true);
        config.curve.max_iterations = 1;
        config.curve.convergence_epsilon = 1e-300;

        let output = Pipeline::new(config)
            .unwrap()
            .run_with_labels(&embedding, labels, &CancellationToken::new())
            .unwrap();

        assert_eq!(output.summary.fit_status, Some(FitStatus::MaxIterations));
        assert_eq!(output.summary.curve_iterations, 1);
        assert_eq!(output.summary.warnings.len(), 1);
        // Still a usable result
        assert_eq!(output.summary.status, RunStatus::Complete);
        assert!(output.cells.iter().all(|c| c.lineages.iter().any(|e| e.pseudotime.is_some())));
    }

    #[test]
    fn test_cancelled_before_clustering() {
        let embedding = linear_embedding();
        let token = CancellationToken::new();
        token.cancel();

        let output = run(&embedding, &linear_config(), &token).unwrap();
        assert_eq!(output.summary.status, RunStatus::Cancelled);
        assert_eq!(output.summary.fit_status, None);
        assert_eq!(output.summary.ensemble.unwrap().draws_completed, 0);
        assert!(output.graph.lineages.is_empty());
    }

    #[test]
    fn test_cancelled_curve_fit() {
        let (embedding, labels, _) = bifurcation();
        let token = CancellationToken::new();
        token.cancel();

        let output = Pipeline::new(bifurcation_config(true))
            .unwrap()
            .run_with_labels(&embedding, labels, &token)
            .unwrap();
        assert_eq!(output.summary.status, RunStatus::Cancelled);
        assert_eq!(output.summary.fit_status, Some(FitStatus::Cancelled));
        assert_eq!(output.graph.lineages.len(), 2);
    }

    #[test]
    fn test_all_unassigned_labels_give_empty_graph() {
        let embedding = linear_embedding();
        let output = Pipeline::new(PipelineConfig::default())
            .unwrap()
            .run_with_labels(&embedding, vec![-1; 60], &CancellationToken::new())
            .unwrap();

        assert_eq!(output.summary.status, RunStatus::Complete);
        assert_eq!(output.summary.fit_status, None);
        assert_eq!(output.summary.n_clusters, 0);
        assert_eq!(output.summary.n_unassigned, 60);
        assert_eq!(output.graph.root, None);
        assert!(output.graph.lineages.is_empty());
        assert!(output.cells.iter().all(|c| c.cluster == -1 && c.lineages.is_empty()));
    }

    #[test]
    fn test_strict_stability_threshold_completes() {
        // Evenly spaced cells never co-cluster perfectly across draws
        let values = Array2::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 } else { 0.0 });
        let embedding = Embedding::from_matrix(values).unwrap();
        let config = PipelineConfig {
            clustering: ClusteringConfig {
                k_range: vec![2, 3, 4, 5, 6, 7],
                stability_threshold: 1.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let output = run(&embedding, &config, &CancellationToken::new()).unwrap();
        assert_eq!(output.summary.status, RunStatus::Complete);
        assert_eq!(output.cells.len(), 40);
        if output.summary.n_clusters == 0 {
            assert_eq!(output.graph.root, None);
            assert_eq!(output.summary.n_unassigned, 40);
        }
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let mut config = PipelineConfig::default();
        config.curve.convergence_epsilon = -1.0;
        assert!(matches!(Pipeline::new(config), Err(Error::Config(_))));
    }
}
