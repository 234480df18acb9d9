//! Base clustering primitive run on every resampling draw.
//!
//! The ensemble is generic over [`BaseClusterer`]; [`KMeans`] is the default.
//! A clusterer reports numerically degenerate runs as
//! `Error::NumericalInstability` so the ensemble can retry with a fresh draw.

use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use crate::distance::{squared_euclidean, DistanceMetric};
use crate::error::{Error, Result};

/// A clustering algorithm that partitions the rows of a matrix into `k` groups.
pub trait BaseClusterer: Sync {
    /// Return one label in `0..k` per row of `points`.
    fn cluster(&self, points: ArrayView2<f64>, k: usize, rng: &mut StdRng) -> Result<Vec<usize>>;
}

/// Seeded k-means with k-means++ initialisation.
#[derive(Clone, Debug)]
pub struct KMeans {
    /// Maximum Lloyd iterations.
    pub max_iterations: usize,
    /// Metric for the assignment step. Centroids are always arithmetic means.
    pub metric: DistanceMetric,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            metric: DistanceMetric::Euclidean,
        }
    }
}

impl KMeans {
    pub fn new(max_iterations: usize, metric: DistanceMetric) -> Self {
        Self {
            max_iterations,
            metric,
        }
    }

    /// k-means++ seeding: each new centre is drawn with probability
    /// proportional to its squared distance from the nearest chosen centre.
    fn seed_centroids(
        &self,
        points: ArrayView2<f64>,
        k: usize,
        rng: &mut StdRng,
    ) -> Result<Array2<f64>> {
        let n = points.nrows();
        let mut centroids = Array2::<f64>::zeros((k, points.ncols()));

        let first = rng.gen_range(0..n);
        centroids.row_mut(0).assign(&points.row(first));

        let mut nearest_sq: Vec<f64> = (0..n)
            .map(|i| squared_euclidean(points.row(i), centroids.row(0)))
            .collect();

        for c in 1..k {
            let total: f64 = nearest_sq.iter().sum();
            if total <= 0.0 {
                return Err(Error::numerical(format!(
                    "only {} distinct points available for k = {}",
                    c, k
                )));
            }

            // Sample next centre (weighted by squared distance)
            let u: f64 = rng.gen::<f64>() * total;
            let mut cumsum = 0.0;
            let mut chosen = n - 1;
            for (i, &w) in nearest_sq.iter().enumerate() {
                cumsum += w;
                if w > 0.0 && u <= cumsum {
                    chosen = i;
                    break;
                }
            }
            // Rounding can leave `chosen` on a zero-weight tail point
            while nearest_sq[chosen] <= 0.0 && chosen > 0 {
                chosen -= 1;
            }

            centroids.row_mut(c).assign(&points.row(chosen));
            for (i, slot) in nearest_sq.iter_mut().enumerate() {
                let d = squared_euclidean(points.row(i), centroids.row(c));
                if d < *slot {
                    *slot = d;
                }
            }
        }

        Ok(centroids)
    }

    /// Index of the nearest centroid; ties go to the lowest index.
    fn nearest(&self, point: ndarray::ArrayView1<f64>, centroids: &Array2<f64>) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
            let d = self.metric.between(point, centroid);
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        best
    }
}

impl BaseClusterer for KMeans {
    fn cluster(&self, points: ArrayView2<f64>, k: usize, rng: &mut StdRng) -> Result<Vec<usize>> {
        let n = points.nrows();
        if k == 0 || n < k {
            return Err(Error::numerical(format!(
                "cannot form {} clusters from {} points",
                k, n
            )));
        }

        let mut centroids = self.seed_centroids(points, k, rng)?;
        let mut labels = vec![usize::MAX; n];

        for _ in 0..self.max_iterations {
            let mut changed = false;
            for i in 0..n {
                let label = self.nearest(points.row(i), &centroids);
                if labels[i] != label {
                    labels[i] = label;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
            let mut counts = vec![0usize; k];
            for (i, &label) in labels.iter().enumerate() {
                let mut row = sums.row_mut(label);
                row += &points.row(i);
                counts[label] += 1;
            }

            if let Some(empty) = counts.iter().position(|&c| c == 0) {
                return Err(Error::numerical(format!(
                    "centroid {} lost all members (k = {}, n = {})",
                    empty, k, n
                )));
            }

            for (c, &count) in counts.iter().enumerate() {
                let mut row = sums.row_mut(c);
                row /= count as f64;
            }
            centroids = sums;
        }

        Ok(labels)
    }
}
