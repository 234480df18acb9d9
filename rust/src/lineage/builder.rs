//! Lineage graph construction from consensus clusters.
//!
//! Builds the complete centroid distance graph, spans it with an MST,
//! roots the tree and enumerates one lineage per root-to-leaf path.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::mst::{check_finite, minimum_spanning_tree, MstEdge};
use super::tree::ClusterTree;
use crate::config::{LineageConfig, RootSpec};
use crate::distance::centroid_distance_matrix;
use crate::ensemble::Cluster;
use crate::error::{Error, Result};

/// Tree edge oriented away from the root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineageEdge {
    pub parent: usize,
    pub child: usize,
    pub weight: f64,
}

/// Ordered cluster sequence from the root to one leaf.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    pub id: usize,
    pub clusters: Vec<usize>,
}

impl Lineage {
    pub fn contains(&self, cluster: usize) -> bool {
        self.clusters.contains(&cluster)
    }

    pub fn leaf(&self) -> usize {
        // Lineages are never empty
        self.clusters[self.clusters.len() - 1]
    }
}

/// Rooted spanning tree over clusters with its lineages.
#[derive(Clone, Debug, PartialEq)]
pub struct LineageGraph {
    pub nodes: Vec<usize>,
    pub edges: Vec<LineageEdge>,
    pub root: usize,
    pub branch_points: Vec<usize>,
    pub lineages: Vec<Lineage>,
    pub branch_sensitivity: f64,
    tree: ClusterTree,
}

impl LineageGraph {
    pub fn n_clusters(&self) -> usize {
        self.nodes.len()
    }

    pub fn tree(&self) -> &ClusterTree {
        &self.tree
    }

    pub fn parent(&self, cluster: usize) -> Option<usize> {
        self.tree.parent(cluster)
    }

    pub fn is_branch_point(&self, cluster: usize) -> bool {
        self.branch_points.binary_search(&cluster).is_ok()
    }

    /// Ids of the lineages passing through `cluster`, ascending.
    pub fn lineages_through(&self, cluster: usize) -> Vec<usize> {
        self.lineages
            .iter()
            .filter(|l| l.contains(cluster))
            .map(|l| l.id)
            .collect()
    }

    /// True when more than one lineage passes through `cluster`.
    pub fn is_shared(&self, cluster: usize) -> bool {
        self.lineages.iter().filter(|l| l.contains(cluster)).count() > 1
    }
}

/// Builds [`LineageGraph`]s under a fixed configuration.
#[derive(Clone, Debug)]
pub struct GraphBuilder {
    config: LineageConfig,
}

impl GraphBuilder {
    pub fn new(config: LineageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LineageConfig {
        &self.config
    }

    /// Build the lineage graph over `clusters`.
    ///
    /// # Arguments
    /// * `clusters` - Consensus clusters, `clusters[i].id == i`
    ///
    /// # Returns
    /// * Rooted tree with oriented edges, branch points and lineages
    pub fn build(&self, clusters: &[Cluster]) -> Result<LineageGraph> {
        let m = clusters.len();
        if m == 0 {
            return Err(Error::input("no assigned clusters to build a lineage graph from"));
        }
        if let Some((i, c)) = clusters.iter().enumerate().find(|(i, c)| c.id != *i) {
            return Err(Error::input(format!(
                "cluster at position {} has id {}; ids must be 0..{}",
                i, c.id, m
            )));
        }

        let end_clusters = self.end_clusters(m)?;
        let distances = self.centroid_distances(clusters);
        let all_nodes: Vec<usize> = (0..m).collect();
        check_finite(&distances, &all_nodes)?;

        let edges = spanning_edges(&distances, m, &end_clusters)?;
        let edge_tuples: Vec<(usize, usize, f64)> =
            edges.iter().map(|e| (e.a, e.b, e.weight)).collect();

        let root = self.select_root(m, &edge_tuples, &end_clusters)?;
        debug!(root, "selected lineage root");

        let tree = ClusterTree::from_edges(m, &edge_tuples, root)?;

        let mut oriented: Vec<LineageEdge> = (0..m)
            .filter_map(|node| {
                tree.parent(node).map(|parent| LineageEdge {
                    parent,
                    child: node,
                    weight: tree.branch_lengths[node],
                })
            })
            .collect();
        oriented.sort_by_key(|e| (e.parent, e.child));

        let lineages: Vec<Lineage> = tree
            .root_to_leaf_paths()
            .into_iter()
            .enumerate()
            .map(|(id, clusters)| Lineage { id, clusters })
            .collect();
        for lineage in &lineages {
            debug!(lineage = lineage.id, clusters = ?lineage.clusters, "lineage");
        }

        let branch_points = tree.branch_points();
        info!(
            clusters = m,
            root,
            lineages = lineages.len(),
            branch_points = branch_points.len(),
            "built lineage graph"
        );

        Ok(LineageGraph {
            nodes: all_nodes,
            edges: oriented,
            root,
            branch_points,
            lineages,
            branch_sensitivity: self.config.branch_sensitivity,
            tree,
        })
    }

    fn end_clusters(&self, m: usize) -> Result<Vec<usize>> {
        let mut ends = self.config.end_clusters.clone();
        ends.sort_unstable();
        ends.dedup();
        if let Some(&bad) = ends.iter().find(|&&e| e >= m) {
            return Err(Error::config(format!(
                "end cluster {} does not exist ({} clusters)",
                bad, m
            )));
        }
        if !ends.is_empty() && ends.len() == m {
            return Err(Error::config("every cluster is marked as an end cluster"));
        }
        Ok(ends)
    }

    fn centroid_distances(&self, clusters: &[Cluster]) -> Array2<f64> {
        let m = clusters.len();
        let d = clusters[0].centroid.len();
        let centroids = Array2::from_shape_fn((m, d), |(i, j)| clusters[i].centroid[j]);
        let variances = Array2::from_shape_fn((m, d), |(i, j)| clusters[i].variance[j]);
        centroid_distance_matrix(centroids.view(), variances.view(), self.config.distance_metric)
    }

    fn select_root(
        &self,
        m: usize,
        edges: &[(usize, usize, f64)],
        end_clusters: &[usize],
    ) -> Result<usize> {
        let check = |cluster: usize| -> Result<()> {
            if cluster >= m {
                return Err(Error::config(format!(
                    "root cluster {} does not exist ({} clusters)",
                    cluster, m
                )));
            }
            if end_clusters.binary_search(&cluster).is_ok() {
                return Err(Error::config(format!(
                    "cluster {} cannot be both root and end cluster",
                    cluster
                )));
            }
            Ok(())
        };

        match self.config.root_spec() {
            RootSpec::Cluster(root) => {
                check(root)?;
                Ok(root)
            }
            RootSpec::Candidates(candidates) => {
                for &c in &candidates {
                    check(c)?;
                }
                best_root(m, edges, candidates)
            }
            RootSpec::Auto => {
                let mut degree = vec![0usize; m];
                for &(a, b, _) in edges {
                    degree[a] += 1;
                    degree[b] += 1;
                }
                let is_end = |c: &usize| end_clusters.binary_search(c).is_ok();
                let mut candidates: Vec<usize> =
                    (0..m).filter(|c| degree[*c] <= 1 && !is_end(c)).collect();
                if candidates.is_empty() {
                    candidates = (0..m).filter(|c| !is_end(c)).collect();
                }
                best_root(m, edges, candidates)
            }
        }
    }
}

/// MST over the non-end clusters, with each end cluster hung off its
/// nearest non-end cluster.
fn spanning_edges(distances: &Array2<f64>, m: usize, end_clusters: &[usize]) -> Result<Vec<MstEdge>> {
    let inner: Vec<usize> = (0..m)
        .filter(|c| end_clusters.binary_search(c).is_err())
        .collect();
    let mut edges = minimum_spanning_tree(distances, &inner)?;

    for &end in end_clusters {
        let mut nearest: Option<(f64, usize)> = None;
        for &c in &inner {
            let d = distances[[end, c]];
            if nearest.map_or(true, |(best, _)| d < best) {
                nearest = Some((d, c));
            }
        }
        if let Some((weight, c)) = nearest {
            edges.push(MstEdge {
                a: end.min(c),
                b: end.max(c),
                weight,
            });
        }
    }

    Ok(edges)
}

/// Candidate with the smallest summed root-to-leaf path length; lowest id on ties.
fn best_root(m: usize, edges: &[(usize, usize, f64)], mut candidates: Vec<usize>) -> Result<usize> {
    candidates.sort_unstable();
    candidates.dedup();

    let mut best: Option<(f64, usize)> = None;
    for candidate in candidates {
        let tree = ClusterTree::from_edges(m, edges, candidate)?;
        let distances = tree.root_distances();
        let total: f64 = tree.leaves().iter().map(|&leaf| distances[leaf]).sum();
        debug!(candidate, total, "root candidate");
        if best.map_or(true, |(best_total, _)| total < best_total) {
            best = Some((total, candidate));
        }
    }

    best.map(|(_, root)| root)
        .ok_or_else(|| Error::config("no root candidates available"))
}
