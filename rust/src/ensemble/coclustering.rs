//! Co-occurrence / co-clustering accumulation across resampling draws.
//!
//! Counts are integers stored in the upper triangle (i < j). Summing two
//! accumulators is associative and commutative, so the parallel reduction
//! over draws yields the same matrix whatever the split order.

use ndarray::Array2;

/// Cells and labels of one successful draw.
///
/// `members` is sorted ascending with no duplicates; `labels[i]` is the
/// base-clusterer label of `members[i]`.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawOutcome {
    pub members: Vec<usize>,
    pub labels: Vec<usize>,
}

/// Raw pair counters over all draws.
#[derive(Clone, Debug, PartialEq)]
pub struct CoClusterCounts {
    /// Number of draws containing both cells.
    co_occurrence: Array2<u32>,
    /// Number of draws placing both cells in the same cluster.
    co_clustered: Array2<u32>,
}

impl CoClusterCounts {
    pub fn new(n_cells: usize) -> Self {
        Self {
            co_occurrence: Array2::zeros((n_cells, n_cells)),
            co_clustered: Array2::zeros((n_cells, n_cells)),
        }
    }

    pub fn n_cells(&self) -> usize {
        self.co_occurrence.nrows()
    }

    /// Add every pair jointly present in a draw.
    pub fn add_draw(&mut self, outcome: &DrawOutcome) {
        let m = outcome.members.len();
        for a in 0..m {
            let i = outcome.members[a];
            for b in (a + 1)..m {
                let j = outcome.members[b];
                self.co_occurrence[[i, j]] += 1;
                if outcome.labels[a] == outcome.labels[b] {
                    self.co_clustered[[i, j]] += 1;
                }
            }
        }
    }

    /// Sum another accumulator into this one.
    pub fn merge(mut self, other: CoClusterCounts) -> Self {
        self.co_occurrence += &other.co_occurrence;
        self.co_clustered += &other.co_clustered;
        self
    }

    /// Counts for an unordered pair `(co_occurrence, co_clustered)`.
    pub fn pair(&self, i: usize, j: usize) -> (u32, u32) {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        (self.co_occurrence[[lo, hi]], self.co_clustered[[lo, hi]])
    }
}

/// Symmetric matrix of co-clustering proportions in [0, 1].
///
/// Entry (i, j) is co_clustered / co_occurrence. Pairs that never appeared
/// in the same draw have proportion 0 (dissimilarity 1). The diagonal is 1.
#[derive(Clone, Debug, PartialEq)]
pub struct CoClusterMatrix {
    proportions: Array2<f64>,
}

impl CoClusterMatrix {
    pub fn from_counts(counts: &CoClusterCounts) -> Self {
        let n = counts.n_cells();
        let mut proportions = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            proportions[[i, i]] = 1.0;
            for j in (i + 1)..n {
                let (occurred, clustered) = counts.pair(i, j);
                let p = if occurred == 0 {
                    0.0
                } else {
                    clustered as f64 / occurred as f64
                };
                proportions[[i, j]] = p;
                proportions[[j, i]] = p;
            }
        }
        Self { proportions }
    }

    pub fn n_cells(&self) -> usize {
        self.proportions.nrows()
    }

    pub fn proportion(&self, i: usize, j: usize) -> f64 {
        self.proportions[[i, j]]
    }

    pub fn dissimilarity(&self, i: usize, j: usize) -> f64 {
        1.0 - self.proportions[[i, j]]
    }

    pub fn proportions(&self) -> &Array2<f64> {
        &self.proportions
    }

    /// 1 - proportion, with a zero diagonal.
    pub fn dissimilarity_matrix(&self) -> Array2<f64> {
        self.proportions.mapv(|p| 1.0 - p)
    }
}
