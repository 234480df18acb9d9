//! Configuration surface for clustering, lineage construction and curve fitting.
//!
//! Every struct deserializes with per-field defaults, so a partial JSON
//! document is enough. `validate()` runs before any heavy work and reports
//! the first offending parameter as [`Error::Config`].

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};

/// Resampling ensemble parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Number of resampling draws. Default: 100
    pub num_draws: usize,
    /// Fraction of cells in each subsample, in (0, 1]. Default: 0.7
    pub subsample_fraction: f64,
    /// Draw subsamples with replacement (bootstrap). Default: false
    pub with_replacement: bool,
    /// Candidate cluster counts; each draw picks one uniformly. Default: 4..=8
    pub k_range: Vec<usize>,
    /// Minimum co-clustering proportion for two groups to merge, and minimum
    /// internal stability for a consensus cluster to keep its label. Default: 0.7
    pub stability_threshold: f64,
    /// Explicit dendrogram cut height on the dissimilarity scale.
    /// When unset the cut is `1 - stability_threshold`.
    pub merge_height: Option<f64>,
    /// Consensus clusters with fewer cells are unassigned. Default: 5
    pub min_cluster_size: usize,
    /// Fresh draws attempted after a numerically degenerate draw. Default: 3
    pub max_retries: usize,
    /// Metric used by the base clusterer's assignment step. Default: Euclidean
    pub distance_metric: DistanceMetric,
    /// Lloyd iterations per base clustering run. Default: 100
    pub kmeans_max_iterations: usize,
    /// Base seed; draw `i` uses `seed + i`. Default: 42
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            num_draws: 100,
            subsample_fraction: 0.7,
            with_replacement: false,
            k_range: vec![4, 5, 6, 7, 8],
            stability_threshold: 0.7,
            merge_height: None,
            min_cluster_size: 5,
            max_retries: 3,
            distance_metric: DistanceMetric::Euclidean,
            kmeans_max_iterations: 100,
            seed: 42,
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_draws == 0 {
            return Err(Error::config("num_draws must be >= 1"));
        }
        if !(self.subsample_fraction > 0.0 && self.subsample_fraction <= 1.0) {
            return Err(Error::config(format!(
                "subsample_fraction must be in (0, 1], got {}",
                self.subsample_fraction
            )));
        }
        if self.k_range.is_empty() {
            return Err(Error::config("k_range must contain at least one cluster count"));
        }
        if let Some(&k) = self.k_range.iter().find(|&&k| k < 2) {
            return Err(Error::config(format!("k_range entries must be >= 2, got {}", k)));
        }
        if !(self.stability_threshold > 0.0 && self.stability_threshold <= 1.0) {
            return Err(Error::config(format!(
                "stability_threshold must be in (0, 1], got {}",
                self.stability_threshold
            )));
        }
        if let Some(height) = self.merge_height {
            if !(0.0..=1.0).contains(&height) {
                return Err(Error::config(format!(
                    "merge_height must be in [0, 1], got {}",
                    height
                )));
            }
        }
        if self.min_cluster_size == 0 {
            return Err(Error::config("min_cluster_size must be >= 1"));
        }
        if self.kmeans_max_iterations == 0 {
            return Err(Error::config("kmeans_max_iterations must be >= 1"));
        }
        if !self.distance_metric.is_pointwise() {
            return Err(Error::config(format!(
                "{:?} needs cluster spreads and cannot drive the base clusterer",
                self.distance_metric
            )));
        }
        Ok(())
    }

    /// Check the configuration against the number of cells to cluster.
    pub fn validate_for(&self, n_cells: usize) -> Result<()> {
        self.validate()?;
        let size = self.subsample_size(n_cells);
        let max_k = self.k_range.iter().copied().max().unwrap_or(2);
        let minimum = max_k.max(self.min_cluster_size);
        if size < minimum {
            return Err(Error::config(format!(
                "subsample of {} cells is smaller than the minimum viable size {} (max k {}, min_cluster_size {})",
                size, minimum, max_k, self.min_cluster_size
            )));
        }
        Ok(())
    }

    /// Number of cells drawn per resample.
    pub fn subsample_size(&self, n_cells: usize) -> usize {
        // Absorb float noise such as 10 * 0.7 = 7.000000000000001
        let size = ((n_cells as f64) * self.subsample_fraction - 1e-9).ceil();
        size.max(1.0).min(n_cells as f64) as usize
    }

    /// Cut height on the dissimilarity scale.
    pub fn cut_height(&self) -> f64 {
        self.merge_height.unwrap_or(1.0 - self.stability_threshold)
    }
}

/// How the lineage tree is rooted.
#[derive(Clone, Debug, PartialEq)]
pub enum RootSpec {
    /// Pick among the spanning-tree leaves.
    Auto,
    /// Root at this cluster id.
    Cluster(usize),
    /// Root at the candidate with minimum total path length to all leaves.
    Candidates(Vec<usize>),
}

/// Lineage graph parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    pub root_cluster: Option<usize>,
    pub root_candidates: Option<Vec<usize>>,
    /// Known terminal clusters, forced to be leaves of the tree.
    pub end_clusters: Vec<usize>,
    /// Metric between cluster centroids. Default: Euclidean
    pub distance_metric: DistanceMetric,
    /// Fraction of a post-branch edge, measured from the branch node, within
    /// which downstream cells stay candidates for every lineage through the
    /// branch. Default: 0.25
    pub branch_sensitivity: f64,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            root_cluster: None,
            root_candidates: None,
            end_clusters: Vec::new(),
            distance_metric: DistanceMetric::Euclidean,
            branch_sensitivity: 0.25,
        }
    }
}

impl LineageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.root_cluster.is_some() && self.root_candidates.is_some() {
            return Err(Error::config(
                "root_cluster and root_candidates are mutually exclusive",
            ));
        }
        if let Some(candidates) = &self.root_candidates {
            if candidates.is_empty() {
                return Err(Error::config("root_candidates must not be empty"));
            }
        }
        if !(0.0..=1.0).contains(&self.branch_sensitivity) {
            return Err(Error::config(format!(
                "branch_sensitivity must be in [0, 1], got {}",
                self.branch_sensitivity
            )));
        }
        Ok(())
    }

    pub fn root_spec(&self) -> RootSpec {
        match (&self.root_cluster, &self.root_candidates) {
            (Some(root), _) => RootSpec::Cluster(*root),
            (None, Some(candidates)) => RootSpec::Candidates(candidates.clone()),
            (None, None) => RootSpec::Auto,
        }
    }
}

/// Principal curve fitting parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    /// Kernel bandwidth as a fraction of the curve length. Default: 0.1
    pub smoothing_bandwidth: f64,
    /// Stop when the summed squared pseudotime change drops below this. Default: 1e-4
    pub convergence_epsilon: f64,
    /// Hard cap on refit iterations. Default: 15
    pub max_iterations: usize,
    /// Soft branch weights (true) or winner-takes-all (false). Default: true
    pub soft_assignment: bool,
    /// Knots per refitted curve. Default: 64
    pub curve_points: usize,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            smoothing_bandwidth: 0.1,
            convergence_epsilon: 1e-4,
            max_iterations: 15,
            soft_assignment: true,
            curve_points: 64,
        }
    }
}

impl CurveConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_bandwidth.is_finite() && self.smoothing_bandwidth > 0.0) {
            return Err(Error::config(format!(
                "smoothing_bandwidth must be positive, got {}",
                self.smoothing_bandwidth
            )));
        }
        if !(self.convergence_epsilon.is_finite() && self.convergence_epsilon > 0.0) {
            return Err(Error::config(format!(
                "convergence_epsilon must be positive, got {}",
                self.convergence_epsilon
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::config("max_iterations must be >= 1"));
        }
        if self.curve_points < 2 {
            return Err(Error::config("curve_points must be >= 2"));
        }
        Ok(())
    }
}

/// Full pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub clustering: ClusteringConfig,
    pub lineage: LineageConfig,
    pub curve: CurveConfig,
}

impl PipelineConfig {
    /// Parse a (possibly partial) JSON document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.clustering.validate()?;
        self.lineage.validate()?;
        self.curve.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_fraction() {
        let config = ClusteringConfig {
            subsample_fraction: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ClusteringConfig {
            subsample_fraction: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_empty_k_range() {
        let config = ClusteringConfig {
            k_range: vec![],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_stability_threshold_out_of_range() {
        let config = ClusteringConfig {
            stability_threshold: 1.2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_subsample_below_viable_size() {
        let config = ClusteringConfig {
            subsample_fraction: 0.1,
            k_range: vec![3],
            min_cluster_size: 5,
            ..Default::default()
        };
        // 20 cells * 0.1 = 2 cells per draw
        assert!(matches!(config.validate_for(20), Err(Error::Config(_))));
        assert!(config.validate_for(100).is_ok());
    }

    #[test]
    fn test_rejects_mahalanobis_for_base_clusterer() {
        let config = ClusteringConfig {
            distance_metric: DistanceMetric::DiagonalMahalanobis,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_non_positive_epsilon() {
        let config = CurveConfig {
            convergence_epsilon: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_root_spec() {
        let mut config = LineageConfig::default();
        assert_eq!(config.root_spec(), RootSpec::Auto);

        config.root_candidates = Some(vec![1, 2]);
        assert_eq!(config.root_spec(), RootSpec::Candidates(vec![1, 2]));

        config.root_cluster = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cut_height_defaults_to_threshold() {
        let config = ClusteringConfig {
            stability_threshold: 0.6,
            ..Default::default()
        };
        assert!((config.cut_height() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{ "clustering": { "num_draws": 10, "k_range": [2, 3] }, "curve": { "soft_assignment": false } }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        assert_eq!(config.clustering.num_draws, 10);
        assert_eq!(config.clustering.k_range, vec![2, 3]);
        assert_eq!(config.clustering.seed, 42);
        assert!(!config.curve.soft_assignment);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let json = r#"{ "curve": { "max_iterations": 0 } }"#;
        assert!(matches!(
            PipelineConfig::from_json_str(json),
            Err(Error::Config(_))
        ));
    }
}
