//! Minimum spanning tree over a complete distance matrix.
//!
//! Kruskal's algorithm with a union-find forest. Edges are ordered by weight,
//! then by the (lower, higher) node id pair, so equal weights resolve to the
//! lowest id pair.

use ndarray::Array2;

use crate::error::{Error, Result};

/// Undirected weighted edge, `a < b`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MstEdge {
    pub a: usize,
    pub b: usize,
    pub weight: f64,
}

/// Disjoint-set forest with path halving and union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Returns false when `a` and `b` were already joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }
}

/// Check that every pairwise distance among `nodes` is finite.
pub fn check_finite(distances: &Array2<f64>, nodes: &[usize]) -> Result<()> {
    for (idx, &i) in nodes.iter().enumerate() {
        for &j in &nodes[idx + 1..] {
            let d = distances[[i, j]];
            if !d.is_finite() {
                return Err(Error::input(format!(
                    "non-finite distance {} between clusters {} and {}",
                    d, i, j
                )));
            }
        }
    }
    Ok(())
}

/// Minimum spanning tree over the subgraph induced by `nodes`.
///
/// # Arguments
/// * `distances` - Symmetric distance matrix over all clusters
/// * `nodes` - Cluster ids to span (any order, no duplicates)
///
/// # Returns
/// * `nodes.len() - 1` edges in the order Kruskal accepted them
pub fn minimum_spanning_tree(distances: &Array2<f64>, nodes: &[usize]) -> Result<Vec<MstEdge>> {
    check_finite(distances, nodes)?;

    let mut sorted_nodes = nodes.to_vec();
    sorted_nodes.sort_unstable();

    let mut candidates: Vec<MstEdge> = Vec::new();
    for (idx, &a) in sorted_nodes.iter().enumerate() {
        for &b in &sorted_nodes[idx + 1..] {
            candidates.push(MstEdge {
                a,
                b,
                weight: distances[[a, b]],
            });
        }
    }
    candidates.sort_by(|x, y| {
        x.weight
            .total_cmp(&y.weight)
            .then(x.a.cmp(&y.a))
            .then(x.b.cmp(&y.b))
    });

    let n = distances.nrows();
    let mut forest = UnionFind::new(n);
    let mut edges = Vec::with_capacity(sorted_nodes.len().saturating_sub(1));
    for edge in candidates {
        if forest.union(edge.a, edge.b) {
            edges.push(edge);
            if edges.len() + 1 == sorted_nodes.len() {
                break;
            }
        }
    }

    if edges.len() + 1 < sorted_nodes.len() {
        return Err(Error::DisconnectedGraph {
            connected: edges.len() + 1,
            total: sorted_nodes.len(),
        });
    }

    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn is_spanning_tree(edges: &[MstEdge], nodes: &[usize], n: usize) -> bool {
        let mut forest = UnionFind::new(n);
        for e in edges {
            if !forest.union(e.a, e.b) {
                return false;
            }
        }
        let root = forest.find(nodes[0]);
        edges.len() + 1 == nodes.len() && nodes.iter().all(|&v| forest.find(v) == root)
    }

    #[test]
    fn test_linear_chain() {
        let d = array![[0.0, 1.0, 2.0], [1.0, 0.0, 1.0], [2.0, 1.0, 0.0]];
        let edges = minimum_spanning_tree(&d, &[0, 1, 2]).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!((edges[0].a, edges[0].b), (0, 1));
        assert_eq!((edges[1].a, edges[1].b), (1, 2));
    }

    #[test]
    fn test_equal_weights_pick_lowest_pair() {
        let d = array![
            [0.0, 1.0, 1.0, 1.0],
            [1.0, 0.0, 1.0, 1.0],
            [1.0, 1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0, 0.0]
        ];
        let edges = minimum_spanning_tree(&d, &[0, 1, 2, 3]).unwrap();
        let pairs: Vec<(usize, usize)> = edges.iter().map(|e| (e.a, e.b)).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (0, 3)]);
    }

    #[test]
    fn test_spanning_tree_properties() {
        // Points on a small grid; any MST must have n - 1 edges and no cycle
        let coords = [(0.0, 0.0), (1.0, 0.2), (2.1, 0.0), (1.0, 1.5), (3.0, 1.0)];
        let n = coords.len();
        let mut d = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                let dx: f64 = coords[i].0 - coords[j].0;
                let dy: f64 = coords[i].1 - coords[j].1;
                d[[i, j]] = (dx * dx + dy * dy).sqrt();
            }
        }
        let nodes: Vec<usize> = (0..n).collect();
        let edges = minimum_spanning_tree(&d, &nodes).unwrap();
        assert!(is_spanning_tree(&edges, &nodes, n));
    }

    #[test]
    fn test_subset_of_nodes() {
        let d = array![[0.0, 1.0, 5.0], [1.0, 0.0, 2.0], [5.0, 2.0, 0.0]];
        let edges = minimum_spanning_tree(&d, &[2, 0]).unwrap();
        assert_eq!(edges, vec![MstEdge { a: 0, b: 2, weight: 5.0 }]);
    }

    #[test]
    fn test_non_finite_distance_is_input_error() {
        let d = array![[0.0, f64::NAN], [f64::NAN, 0.0]];
        assert!(matches!(
            minimum_spanning_tree(&d, &[0, 1]),
            Err(Error::Input(_))
        ));

        let d = array![[0.0, f64::INFINITY], [f64::INFINITY, 0.0]];
        assert!(matches!(
            minimum_spanning_tree(&d, &[0, 1]),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn test_single_node_has_no_edges() {
        let d = array![[0.0]];
        assert!(minimum_spanning_tree(&d, &[0]).unwrap().is_empty());
    }
}
