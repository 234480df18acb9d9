//! Consensus extraction from the co-clustering matrix.
//!
//! Average-linkage agglomeration on the dissimilarity 1 - p(i, j), cut at a
//! fixed height. Runs single-threaded: each merge depends on the previous one.
//!
//! Tie-breaking: among equal dissimilarities the pair with the lowest first
//! index wins, then the lowest second index. A merged group keeps the lower
//! index, so group indices are always their smallest member.

use ndarray::Array2;

use super::coclustering::CoClusterMatrix;
use crate::embedding::Embedding;
use crate::ensemble::{Cluster, ClusterAssignment, UNASSIGNED};

/// Parameters of the consensus cut.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConsensusParams {
    /// Merge only while the closest groups are at most this dissimilar.
    pub cut_height: f64,
    /// Groups with mean member stability below this are unassigned.
    pub stability_threshold: f64,
    /// Groups with fewer members are unassigned.
    pub min_cluster_size: usize,
}

const NO_NEIGHBOR: usize = usize::MAX;

/// Nearest active partner `j > i` of row `i`, lowest `j` on ties.
fn row_nearest(dist: &Array2<f64>, active: &[bool], i: usize) -> (f64, usize) {
    let mut best = (f64::INFINITY, NO_NEIGHBOR);
    for j in (i + 1)..active.len() {
        if active[j] && dist[[i, j]] < best.0 {
            best = (dist[[i, j]], j);
        }
    }
    best
}

/// Average-linkage agglomeration.
///
/// # Arguments
/// * `dissimilarity` - Symmetric matrix with entries in [0, 1]
/// * `cut_height` - Stop once the closest pair of groups exceeds this
///
/// # Returns
/// * Groups of cell indices, each sorted, ordered by smallest member
pub fn average_linkage(dissimilarity: &Array2<f64>, cut_height: f64) -> Vec<Vec<usize>> {
    let n = dissimilarity.nrows();
    let mut dist = dissimilarity.clone();
    let mut active = vec![true; n];
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut nearest: Vec<(f64, usize)> = (0..n).map(|i| row_nearest(&dist, &active, i)).collect();

    loop {
        // Closest pair overall (rows scanned in order, strict comparison)
        let mut best: Option<(f64, usize, usize)> = None;
        for i in 0..n {
            let (d, j) = nearest[i];
            if !active[i] || j == NO_NEIGHBOR {
                continue;
            }
            if best.map_or(true, |(bd, _, _)| d < bd) {
                best = Some((d, i, j));
            }
        }

        let Some((d, a, b)) = best else {
            break;
        };
        if d > cut_height {
            break;
        }

        // Lance-Williams update for average linkage, merging b into a (a < b)
        let size_a = members[a].len() as f64;
        let size_b = members[b].len() as f64;
        for c in 0..n {
            if !active[c] || c == a || c == b {
                continue;
            }
            let merged = (size_a * dist[[a, c]] + size_b * dist[[b, c]]) / (size_a + size_b);
            dist[[a, c]] = merged;
            dist[[c, a]] = merged;
        }
        active[b] = false;
        let moved = std::mem::take(&mut members[b]);
        members[a].extend(moved);

        // Refresh cached nearest neighbours touched by the merge
        nearest[a] = row_nearest(&dist, &active, a);
        for c in 0..n {
            if !active[c] || c == a {
                continue;
            }
            let (cached, partner) = nearest[c];
            if partner == a || partner == b {
                nearest[c] = row_nearest(&dist, &active, c);
            } else if c < a {
                let candidate = dist[[c, a]];
                if candidate < cached || (candidate == cached && a < partner) {
                    nearest[c] = (candidate, a);
                }
            }
        }
    }

    (0..n)
        .filter(|&i| active[i])
        .map(|i| {
            let mut group = std::mem::take(&mut members[i]);
            group.sort_unstable();
            group
        })
        .collect()
}

/// Mean co-clustering proportion between `cell` and the other members of its group.
fn cell_stability(matrix: &CoClusterMatrix, cell: usize, group: &[usize]) -> f64 {
    if group.len() < 2 {
        return 0.0;
    }
    let total: f64 = group
        .iter()
        .filter(|&&other| other != cell)
        .map(|&other| matrix.proportion(cell, other))
        .sum();
    total / (group.len() - 1) as f64
}

/// Derive consensus labels and stability scores.
///
/// Every cell gets a stability score (its mean co-clustering with the rest
/// of its group). Groups that are too small or too unstable are labelled
/// [`UNASSIGNED`]; surviving groups are numbered 0.. in order of their
/// smallest member.
pub fn extract_consensus(matrix: &CoClusterMatrix, params: &ConsensusParams) -> ClusterAssignment {
    let n = matrix.n_cells();
    let groups = average_linkage(&matrix.dissimilarity_matrix(), params.cut_height);

    let mut labels = vec![UNASSIGNED; n];
    let mut stability = vec![0.0; n];
    let mut next_label: i32 = 0;

    for group in &groups {
        let scores: Vec<f64> = group
            .iter()
            .map(|&cell| cell_stability(matrix, cell, group))
            .collect();
        let group_stability = scores.iter().sum::<f64>() / scores.len() as f64;

        for (&cell, &score) in group.iter().zip(scores.iter()) {
            stability[cell] = score;
        }

        if group.len() >= params.min_cluster_size && group_stability >= params.stability_threshold {
            for &cell in group {
                labels[cell] = next_label;
            }
            next_label += 1;
        }
    }

    ClusterAssignment::new(labels, stability)
}

/// Build the cluster records for a finished assignment.
pub fn clusters_from_assignment(embedding: &Embedding, assignment: &ClusterAssignment) -> Vec<Cluster> {
    (0..assignment.n_clusters())
        .map(|id| Cluster::from_members(embedding, id, assignment.members(id), assignment))
        .collect()
}
