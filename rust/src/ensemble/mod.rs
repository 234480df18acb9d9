//! Resampling cluster ensemble.
//!
//! This module provides:
//! - BaseClusterer / KMeans: the clustering primitive run on each draw
//! - DrawTally: parallel, order-independent accumulation of pair counts
//! - CoClusterMatrix: co-clustering proportions across draws
//! - Consensus extraction: average-linkage cut with stability filtering
//! - ResamplingEnsemble: the stage entry point

pub mod base;
pub mod coclustering;
pub mod consensus;
pub mod draw;

use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use base::{BaseClusterer, KMeans};
pub use coclustering::{CoClusterCounts, CoClusterMatrix, DrawOutcome};
pub use consensus::{average_linkage, extract_consensus, ConsensusParams};
pub use draw::{run_draws_parallel, DrawResult, DrawTally};

use crate::cancel::{CancellationToken, RunStatus};
use crate::config::ClusteringConfig;
use crate::embedding::Embedding;
use crate::error::{Error, Result};

/// Label of a cell that belongs to no stable cluster.
pub const UNASSIGNED: i32 = -1;

/// Per-cell cluster labels and stability scores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    labels: Vec<i32>,
    stability: Vec<f64>,
}

impl ClusterAssignment {
    pub fn new(labels: Vec<i32>, stability: Vec<f64>) -> Self {
        debug_assert_eq!(labels.len(), stability.len());
        Self { labels, stability }
    }

    /// Use precomputed labels instead of running the ensemble.
    ///
    /// Labels must be -1 or form the contiguous range 0..m with every id
    /// used. Assigned cells get stability 1, unassigned cells 0.
    pub fn from_labels(embedding: &Embedding, labels: Vec<i32>) -> Result<(Self, Vec<Cluster>)> {
        if labels.len() != embedding.n_cells() {
            return Err(Error::input(format!(
                "{} labels for {} cells",
                labels.len(),
                embedding.n_cells()
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l < UNASSIGNED) {
            return Err(Error::input(format!("invalid cluster label {}", bad)));
        }

        let n_clusters = labels.iter().copied().max().map_or(0, |m| (m + 1).max(0) as usize);
        let mut used = vec![false; n_clusters];
        for &l in labels.iter().filter(|&&l| l >= 0) {
            used[l as usize] = true;
        }
        if let Some(missing) = used.iter().position(|&u| !u) {
            return Err(Error::input(format!(
                "cluster labels must be contiguous; label {} has no cells",
                missing
            )));
        }

        let stability = labels
            .iter()
            .map(|&l| if l == UNASSIGNED { 0.0 } else { 1.0 })
            .collect();
        let assignment = Self::new(labels, stability);
        let clusters = consensus::clusters_from_assignment(embedding, &assignment);
        Ok((assignment, clusters))
    }

    pub fn n_cells(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    pub fn label(&self, cell: usize) -> i32 {
        self.labels[cell]
    }

    /// Cluster id of an assigned cell.
    pub fn cluster_of(&self, cell: usize) -> Option<usize> {
        let label = self.labels[cell];
        (label >= 0).then_some(label as usize)
    }

    pub fn stability(&self, cell: usize) -> f64 {
        self.stability[cell]
    }

    pub fn stabilities(&self) -> &[f64] {
        &self.stability
    }

    pub fn n_clusters(&self) -> usize {
        self.labels
            .iter()
            .copied()
            .max()
            .map_or(0, |m| (m + 1).max(0) as usize)
    }

    pub fn n_unassigned(&self) -> usize {
        self.labels.iter().filter(|&&l| l == UNASSIGNED).count()
    }

    /// Cells carrying `cluster`, ascending.
    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == cluster as i32)
            .map(|(i, _)| i)
            .collect()
    }
}

/// A consensus cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub id: usize,
    /// Mean embedding of the members.
    pub centroid: Array1<f64>,
    /// Per-dimension population variance of the members.
    pub variance: Array1<f64>,
    pub members: Vec<usize>,
    /// Mean stability of the members.
    pub stability: f64,
}

impl Cluster {
    pub fn from_members(
        embedding: &Embedding,
        id: usize,
        members: Vec<usize>,
        assignment: &ClusterAssignment,
    ) -> Self {
        let points = embedding.values().select(Axis(0), &members);
        let d = embedding.n_dims();
        let centroid = points.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let variance = points.var_axis(Axis(0), 0.0);
        let stability = if members.is_empty() {
            0.0
        } else {
            members.iter().map(|&c| assignment.stability(c)).sum::<f64>() / members.len() as f64
        };
        Self {
            id,
            centroid,
            variance,
            members,
            stability,
        }
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Output of the resampling ensemble.
#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleResult {
    pub assignment: ClusterAssignment,
    pub clusters: Vec<Cluster>,
    pub draws_completed: usize,
    pub draws_skipped: usize,
    pub status: RunStatus,
}

impl EnsembleResult {
    pub fn unassigned_fraction(&self) -> f64 {
        let n = self.assignment.n_cells();
        if n == 0 {
            0.0
        } else {
            self.assignment.n_unassigned() as f64 / n as f64
        }
    }
}

/// Resampling consensus clustering over a pluggable base clusterer.
#[derive(Clone, Debug)]
pub struct ResamplingEnsemble<C = KMeans> {
    config: ClusteringConfig,
    clusterer: C,
}

impl ResamplingEnsemble<KMeans> {
    /// Ensemble with the default k-means base clusterer.
    pub fn new(config: ClusteringConfig) -> Result<Self> {
        let clusterer = KMeans::new(config.kmeans_max_iterations, config.distance_metric);
        Self::with_clusterer(config, clusterer)
    }
}

impl<C: BaseClusterer> ResamplingEnsemble<C> {
    pub fn with_clusterer(config: ClusteringConfig, clusterer: C) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, clusterer })
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Run all draws and return the co-clustering proportions.
    ///
    /// The matrix is an intermediate of [`ResamplingEnsemble::run`]; it is
    /// exposed for diagnostics.
    pub fn coclustering(
        &self,
        embedding: &Embedding,
        cancel: &CancellationToken,
    ) -> Result<(CoClusterMatrix, DrawTally)> {
        self.config.validate_for(embedding.n_cells())?;
        let tally = run_draws_parallel(embedding, &self.config, &self.clusterer, cancel);

        if tally.completed == 0 && tally.cancelled == 0 {
            return Err(Error::numerical(format!(
                "all {} draws failed after {} retries each",
                self.config.num_draws, self.config.max_retries
            )));
        }

        Ok((CoClusterMatrix::from_counts(&tally.counts), tally))
    }

    /// Cluster the embedding.
    ///
    /// # Arguments
    /// * `embedding` - Validated cell embedding
    /// * `cancel` - Checked between draws; a cancelled run still extracts a
    ///   consensus from the draws that finished
    ///
    /// # Returns
    /// * Consensus labels, stability scores and cluster records
    pub fn run(&self, embedding: &Embedding, cancel: &CancellationToken) -> Result<EnsembleResult> {
        let (matrix, tally) = self.coclustering(embedding, cancel)?;

        let params = ConsensusParams {
            cut_height: self.config.cut_height(),
            stability_threshold: self.config.stability_threshold,
            min_cluster_size: self.config.min_cluster_size,
        };
        let assignment = extract_consensus(&matrix, &params);
        let clusters = consensus::clusters_from_assignment(embedding, &assignment);

        let status = if tally.cancelled > 0 {
            RunStatus::Cancelled
        } else {
            RunStatus::Complete
        };

        info!(
            cells = embedding.n_cells(),
            draws_completed = tally.completed,
            draws_skipped = tally.skipped,
            draws_cancelled = tally.cancelled,
            retries = tally.retries,
            clusters = clusters.len(),
            unassigned = assignment.n_unassigned(),
            "resampling ensemble finished"
        );

        Ok(EnsembleResult {
            assignment,
            clusters,
            draws_completed: tally.completed,
            draws_skipped: tally.skipped,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, ArrayView2};
    use rand::rngs::StdRng;
    use rand::Rng;

    /// Three tight blobs of 15 cells along the x axis, interleaved in row order.
    fn three_blobs() -> Embedding {
        let mut values = Array2::<f64>::zeros((45, 2));
        for i in 0..45 {
            let blob = (i % 3) as f64;
            let jitter = (i / 3) as f64 * 0.01;
            values[[i, 0]] = blob * 10.0 + jitter;
            values[[i, 1]] = jitter;
        }
        Embedding::from_matrix(values).unwrap()
    }

    fn test_config() -> ClusteringConfig {
        ClusteringConfig {
            num_draws: 30,
            subsample_fraction: 0.8,
            k_range: vec![3],
            stability_threshold: 0.8,
            min_cluster_size: 5,
            seed: 7,
            ..Default::default()
        }
    }

    /// Splits rows at x = 5; half of all attempts fail.
    struct Flaky;

    impl BaseClusterer for Flaky {
        fn cluster(&self, points: ArrayView2<f64>, _k: usize, rng: &mut StdRng) -> Result<Vec<usize>> {
            if rng.gen::<f64>() < 0.5 {
                return Err(Error::numerical("coin flip"));
            }
            Ok(points.rows().into_iter().map(|r| usize::from(r[0] > 5.0)).collect())
        }
    }

    #[test]
    fn test_recovers_three_blobs() {
        let embedding = three_blobs();
        let ensemble = ResamplingEnsemble::new(test_config()).unwrap();
        let result = ensemble.run(&embedding, &CancellationToken::new()).unwrap();

        assert_eq!(result.status, RunStatus::Complete);
        assert_eq!(result.clusters.len(), 3);
        assert_eq!(result.assignment.n_unassigned(), 0);

        // Blob membership follows row index mod 3; ids follow the lowest member
        for cell in 0..45 {
            assert_eq!(result.assignment.label(cell), (cell % 3) as i32);
        }
        for cluster in &result.clusters {
            assert_eq!(cluster.size(), 15);
            assert!(cluster.stability > 0.99);
        }
        assert!((result.clusters[1].centroid[0] - 10.07).abs() < 0.01);
    }

    #[test]
    fn test_same_seed_same_assignment() {
        let embedding = three_blobs();
        let config = ClusteringConfig {
            k_range: vec![2, 3, 4],
            stability_threshold: 0.6,
            ..test_config()
        };
        let ensemble = ResamplingEnsemble::new(config).unwrap();
        let a = ensemble.run(&embedding, &CancellationToken::new()).unwrap();
        let b = ensemble.run(&embedding, &CancellationToken::new()).unwrap();
        assert_eq!(a.assignment, b.assignment);
        assert_eq!(
            serde_json::to_string(&a.assignment).unwrap(),
            serde_json::to_string(&b.assignment).unwrap()
        );
    }

    #[test]
    fn test_assignment_independent_of_thread_count() {
        let embedding = three_blobs();
        let config = ClusteringConfig {
            k_range: vec![2, 3, 4],
            stability_threshold: 0.6,
            ..test_config()
        };
        let ensemble = ResamplingEnsemble::new(config).unwrap();
        let run_on = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| ensemble.run(&embedding, &CancellationToken::new()).unwrap())
        };

        let serial = run_on(1);
        let parallel = run_on(4);
        assert_eq!(serial.assignment, parallel.assignment);
        assert_eq!(serial.clusters.len(), parallel.clusters.len());
        assert_eq!(
            serde_json::to_string(&serial.assignment).unwrap(),
            serde_json::to_string(&parallel.assignment).unwrap()
        );
    }

    #[test]
    fn test_coclustering_matrix_is_symmetric_and_bounded() {
        let embedding = three_blobs();
        let config = ClusteringConfig {
            k_range: vec![2, 3, 4, 5],
            ..test_config()
        };
        let ensemble = ResamplingEnsemble::new(config).unwrap();
        let (matrix, tally) = ensemble.coclustering(&embedding, &CancellationToken::new()).unwrap();

        assert_eq!(tally.completed + tally.skipped, 30);
        let p = matrix.proportions();
        for i in 0..45 {
            for j in 0..45 {
                assert!(p[[i, j]] >= 0.0 && p[[i, j]] <= 1.0);
                assert_eq!(p[[i, j]], p[[j, i]]);
            }
        }
    }

    #[test]
    fn test_flaky_clusterer_still_finishes() {
        let embedding = three_blobs();
        let config = ClusteringConfig {
            max_retries: 5,
            k_range: vec![2],
            stability_threshold: 0.9,
            ..test_config()
        };
        let ensemble = ResamplingEnsemble::with_clusterer(config, Flaky).unwrap();
        let result = ensemble.run(&embedding, &CancellationToken::new()).unwrap();
        assert!(result.draws_completed > 0);
        // Blob at x=0 versus blobs at x=10 and x=20
        assert_eq!(result.clusters.len(), 2);
    }

    #[test]
    fn test_all_draws_failing_is_numerical_error() {
        struct Broken;
        impl BaseClusterer for Broken {
            fn cluster(&self, _: ArrayView2<f64>, _: usize, _: &mut StdRng) -> Result<Vec<usize>> {
                Err(Error::numerical("broken"))
            }
        }
        let ensemble = ResamplingEnsemble::with_clusterer(test_config(), Broken).unwrap();
        let result = ensemble.run(&three_blobs(), &CancellationToken::new());
        assert!(matches!(result, Err(Error::NumericalInstability(_))));
    }

    #[test]
    fn test_cancelled_run_returns_partial_result() {
        let token = CancellationToken::new();
        token.cancel();
        let ensemble = ResamplingEnsemble::new(test_config()).unwrap();
        let result = ensemble.run(&three_blobs(), &token).unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.draws_completed, 0);
        assert_eq!(result.assignment.n_unassigned(), 45);
        assert!((result.unassigned_fraction() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_subsample_smaller_than_viable() {
        let config = ClusteringConfig {
            subsample_fraction: 0.05,
            ..test_config()
        };
        let ensemble = ResamplingEnsemble::new(config).unwrap();
        let result = ensemble.run(&three_blobs(), &CancellationToken::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_labels() {
        let embedding = three_blobs();
        let labels: Vec<i32> = (0..45).map(|i| if i == 0 { -1 } else { (i % 3) as i32 }).collect();
        let (assignment, clusters) = ClusterAssignment::from_labels(&embedding, labels).unwrap();
        assert_eq!(assignment.n_clusters(), 3);
        assert_eq!(assignment.cluster_of(0), None);
        assert_eq!(assignment.stability(0), 0.0);
        assert_eq!(clusters[0].size(), 14);
        assert_eq!(clusters[1].size(), 15);
    }

    #[test]
    fn test_from_labels_rejects_gaps() {
        let embedding = three_blobs();
        let labels: Vec<i32> = (0..45).map(|i| if i % 2 == 0 { 0 } else { 2 }).collect();
        let result = ClusterAssignment::from_labels(&embedding, labels);
        assert!(matches!(result, Err(Error::Input(_))));
    }
}
