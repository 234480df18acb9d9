//! Distance kernels for embedding rows and cluster centroids.
//!
//! Implements parallel computation of pairwise distance matrices over the
//! upper triangle, mirrored into a symmetric result.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Metric used between cells or between cluster centroids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Manhattan,
    /// 1 - cosine similarity.
    Cosine,
    /// Centroid difference scaled by the pooled per-dimension variance of
    /// the two clusters. Only defined between clusters.
    DiagonalMahalanobis,
}

impl DistanceMetric {
    /// Whether the metric is defined between two bare points.
    pub fn is_pointwise(&self) -> bool {
        !matches!(self, DistanceMetric::DiagonalMahalanobis)
    }

    /// Distance between two points.
    ///
    /// `DiagonalMahalanobis` has no spread information here and is evaluated
    /// with unit variance in both clusters.
    pub fn between(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self {
            DistanceMetric::Euclidean => squared_euclidean(a, b).sqrt(),
            DistanceMetric::Manhattan => manhattan_distance_pair(a, b),
            DistanceMetric::Cosine => cosine_distance_pair(a, b),
            DistanceMetric::DiagonalMahalanobis => (squared_euclidean(a, b) / 2.0).sqrt(),
        }
    }
}

/// Squared Euclidean distance between two vectors.
#[inline]
pub fn squared_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&ai, &bi)| (ai - bi) * (ai - bi))
        .sum()
}

#[inline]
fn manhattan_distance_pair(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(&ai, &bi)| (ai - bi).abs()).sum()
}

/// Cosine distance = 1 - (a·b) / (|a| |b|)
///
/// Two zero vectors are at distance 0; a zero vector and a non-zero vector
/// are at distance 1.
#[inline]
fn cosine_distance_pair(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let dot = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 && norm_b == 0.0 {
        0.0
    } else if norm_a == 0.0 || norm_b == 0.0 {
        1.0
    } else {
        (1.0 - dot / (norm_a * norm_b)).max(0.0)
    }
}

/// Diagonal Mahalanobis distance between two cluster centroids.
///
/// d² = Σ_i (μa_i - μb_i)² / (va_i + vb_i)
///
/// Dimensions where the centroids agree contribute nothing, whatever their
/// variance. A dimension with zero pooled variance and a non-zero difference
/// makes the distance infinite, which is left for the caller to reject.
#[inline]
fn diagonal_mahalanobis_pair(
    a: ArrayView1<f64>,
    b: ArrayView1<f64>,
    var_a: ArrayView1<f64>,
    var_b: ArrayView1<f64>,
) -> f64 {
    let mut total = 0.0;
    for i in 0..a.len() {
        let diff = a[i] - b[i];
        if diff == 0.0 {
            continue;
        }
        total += diff * diff / (var_a[i] + var_b[i]);
    }
    total.sqrt()
}

/// Compute pairwise distances between all rows of a matrix.
///
/// # Arguments
/// * `points` - Row-major points (n × d)
/// * `metric` - Distance metric
///
/// # Returns
/// Symmetric distance matrix (n × n) with a zero diagonal
pub fn pairwise_distance_matrix(points: ArrayView2<f64>, metric: DistanceMetric) -> Array2<f64> {
    let n = points.nrows();
    let mut distances = Array2::<f64>::zeros((n, n));

    // Compute upper triangle in parallel
    let indices: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .collect();

    let dists: Vec<((usize, usize), f64)> = indices
        .par_iter()
        .map(|&(i, j)| ((i, j), metric.between(points.row(i), points.row(j))))
        .collect();

    // Fill matrix (symmetric)
    for ((i, j), dist) in dists {
        distances[[i, j]] = dist;
        distances[[j, i]] = dist;
    }

    distances
}

/// Compute pairwise distances between cluster centroids.
///
/// # Arguments
/// * `centroids` - One centroid per row (m × d)
/// * `variances` - Per-dimension variance of each cluster (m × d); only read
///   by `DiagonalMahalanobis`
/// * `metric` - Distance metric
///
/// # Returns
/// Symmetric distance matrix (m × m). Entries may be non-finite when the
/// variances are degenerate.
pub fn centroid_distance_matrix(
    centroids: ArrayView2<f64>,
    variances: ArrayView2<f64>,
    metric: DistanceMetric,
) -> Array2<f64> {
    if metric.is_pointwise() {
        return pairwise_distance_matrix(centroids, metric);
    }

    let m = centroids.nrows();
    let mut distances = Array2::<f64>::zeros((m, m));

    let indices: Vec<(usize, usize)> = (0..m)
        .flat_map(|i| (i + 1..m).map(move |j| (i, j)))
        .collect();

    let dists: Vec<((usize, usize), f64)> = indices
        .par_iter()
        .map(|&(i, j)| {
            let dist = diagonal_mahalanobis_pair(
                centroids.row(i),
                centroids.row(j),
                variances.row(i),
                variances.row(j),
            );
            ((i, j), dist)
        })
        .collect();

    for ((i, j), dist) in dists {
        distances[[i, j]] = dist;
        distances[[j, i]] = dist;
    }

    distances
}
