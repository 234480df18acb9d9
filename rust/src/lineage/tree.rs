//! Rooted tree over clusters.
//!
//! Nodes are cluster ids 0..n_nodes. Each node stores its parent (-1 for the
//! root) and the length of the edge to its parent.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterTree {
    pub n_nodes: usize,
    pub parent_indices: Vec<i32>,
    pub branch_lengths: Vec<f64>,
    pub children: Vec<Vec<usize>>,
    pub root_index: usize,
}

impl ClusterTree {
    /// Build tree from structure arrays.
    ///
    /// # Arguments
    /// * `parent_indices` - Parent index for each node (-1 for root)
    /// * `branch_lengths` - Length of the edge to the parent for each node
    pub fn from_structure(parent_indices: Vec<i32>, branch_lengths: Vec<f64>) -> Result<Self> {
        let n_nodes = parent_indices.len();

        if branch_lengths.len() != n_nodes {
            return Err(Error::input(
                "parent_indices and branch_lengths must have same length",
            ));
        }

        // Build children lists (ascending, since nodes are visited in order)
        let mut children = vec![Vec::new(); n_nodes];
        for (child_idx, &parent_idx) in parent_indices.iter().enumerate() {
            if parent_idx >= 0 {
                let parent = parent_idx as usize;
                if parent >= n_nodes {
                    return Err(Error::input(format!(
                        "node {} has out-of-range parent {}",
                        child_idx, parent
                    )));
                }
                children[parent].push(child_idx);
            }
        }

        // Find root (node with no parent)
        let roots: Vec<usize> = parent_indices
            .iter()
            .enumerate()
            .filter(|(_, &p)| p == -1)
            .map(|(i, _)| i)
            .collect();
        let root_index = match roots.as_slice() {
            [root] => *root,
            [] => return Err(Error::input("no root node found (no node with parent -1)")),
            _ => return Err(Error::input(format!("{} root nodes found", roots.len()))),
        };

        let tree = ClusterTree {
            n_nodes,
            parent_indices,
            branch_lengths,
            children,
            root_index,
        };

        // A cycle leaves some nodes unreachable from the root
        let reachable = tree.post_order().len();
        if reachable != n_nodes {
            return Err(Error::DisconnectedGraph {
                connected: reachable,
                total: n_nodes,
            });
        }

        Ok(tree)
    }

    /// Orient undirected weighted edges away from `root`.
    pub fn from_edges(n_nodes: usize, edges: &[(usize, usize, f64)], root: usize) -> Result<Self> {
        if root >= n_nodes {
            return Err(Error::input(format!("root {} out of range", root)));
        }

        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_nodes];
        for &(a, b, w) in edges {
            adjacency[a].push((b, w));
            adjacency[b].push((a, w));
        }
        for neighbors in adjacency.iter_mut() {
            neighbors.sort_by_key(|&(node, _)| node);
        }

        let mut parent_indices = vec![-2i32; n_nodes];
        let mut branch_lengths = vec![0.0; n_nodes];
        parent_indices[root] = -1;
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for &(next, w) in &adjacency[node] {
                if parent_indices[next] == -2 {
                    parent_indices[next] = node as i32;
                    branch_lengths[next] = w;
                    stack.push(next);
                }
            }
        }

        let connected = parent_indices.iter().filter(|&&p| p != -2).count();
        if connected != n_nodes {
            return Err(Error::DisconnectedGraph {
                connected,
                total: n_nodes,
            });
        }

        Self::from_structure(parent_indices, branch_lengths)
    }

    /// Get post-order traversal of nodes (leaves to root).
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut visited = vec![false; self.n_nodes];

        fn visit(node: usize, tree: &ClusterTree, visited: &mut Vec<bool>, order: &mut Vec<usize>) {
            if visited[node] {
                return;
            }
            visited[node] = true;

            // Visit children first
            for &child in &tree.children[node] {
                visit(child, tree, visited, order);
            }

            order.push(node);
        }

        visit(self.root_index, self, &mut visited, &mut order);
        order
    }

    pub fn parent(&self, node: usize) -> Option<usize> {
        let p = self.parent_indices[node];
        (p >= 0).then_some(p as usize)
    }

    /// Nodes without children. A single-node tree's root is its only leaf.
    pub fn leaves(&self) -> Vec<usize> {
        (0..self.n_nodes)
            .filter(|&node| self.children[node].is_empty())
            .collect()
    }

    /// Nodes where lineages diverge: two or more children.
    pub fn branch_points(&self) -> Vec<usize> {
        (0..self.n_nodes)
            .filter(|&node| self.children[node].len() >= 2)
            .collect()
    }

    /// Path length from the root to every node.
    pub fn root_distances(&self) -> Vec<f64> {
        let mut distances = vec![0.0; self.n_nodes];
        // Reverse post-order visits parents before children
        for &node in self.post_order().iter().rev() {
            if let Some(parent) = self.parent(node) {
                distances[node] = distances[parent] + self.branch_lengths[node];
            }
        }
        distances
    }

    /// Nodes from the root down to `node`, inclusive.
    pub fn path_from_root(&self, node: usize) -> Vec<usize> {
        let mut path = vec![node];
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Root-to-leaf paths, leaves in depth-first order with children ascending.
    pub fn root_to_leaf_paths(&self) -> Vec<Vec<usize>> {
        let mut paths = Vec::new();
        let mut stack = vec![self.root_index];
        while let Some(node) = stack.pop() {
            if self.children[node].is_empty() {
                paths.push(self.path_from_root(node));
            }
            // Push in reverse so the lowest child is explored first
            for &child in self.children[node].iter().rev() {
                stack.push(child);
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> ClusterTree {
        // 0 - 1, 0 - 2, 1 - 3, 1 - 4
        let edges = vec![(0, 1, 1.0), (0, 2, 2.0), (1, 3, 1.5), (1, 4, 0.5)];
        ClusterTree::from_edges(5, &edges, 0).unwrap()
    }

    #[test]
    fn test_tree_creation() {
        let tree = ClusterTree::from_structure(vec![-1, 0, 0], vec![0.0, 1.0, 1.0]).unwrap();
        assert_eq!(tree.n_nodes, 3);
        assert_eq!(tree.root_index, 0);
        assert_eq!(tree.children[0], vec![1, 2]);
    }

    #[test]
    fn test_post_order() {
        let tree = star();
        let order = tree.post_order();
        // Root should be last
        assert_eq!(order.last(), Some(&tree.root_index));
        assert_eq!(order, vec![3, 4, 1, 2, 0]);
    }

    #[test]
    fn test_rejects_cycle() {
        // 1 and 2 point at each other; neither reachable from root 0
        let result = ClusterTree::from_structure(vec![-1, 2, 1], vec![0.0, 1.0, 1.0]);
        assert!(matches!(result, Err(Error::DisconnectedGraph { connected: 1, total: 3 })));
    }

    #[test]
    fn test_rejects_missing_root() {
        let result = ClusterTree::from_structure(vec![1, 0], vec![1.0, 1.0]);
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn test_from_edges_rejects_disconnected() {
        let result = ClusterTree::from_edges(3, &[(0, 1, 1.0)], 0);
        assert!(matches!(result, Err(Error::DisconnectedGraph { .. })));
    }

    #[test]
    fn test_orientation_and_distances() {
        let tree = star();
        assert_eq!(tree.parent(3), Some(1));
        assert_eq!(tree.parent(0), None);
        assert_eq!(tree.leaves(), vec![2, 3, 4]);
        assert_eq!(tree.branch_points(), vec![0, 1]);

        let d = tree.root_distances();
        assert!((d[3] - 2.5).abs() < 1e-12);
        assert!((d[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_root_to_leaf_paths() {
        let tree = star();
        assert_eq!(
            tree.root_to_leaf_paths(),
            vec![vec![0, 1, 3], vec![0, 1, 4], vec![0, 2]]
        );

        // Re-rooting at a leaf turns the old root into an interior node
        let edges = vec![(0, 1, 1.0), (0, 2, 2.0), (1, 3, 1.5), (1, 4, 0.5)];
        let rerooted = ClusterTree::from_edges(5, &edges, 3).unwrap();
        assert_eq!(rerooted.path_from_root(2), vec![3, 1, 0, 2]);
        assert_eq!(rerooted.branch_points(), vec![1]);
    }

    #[test]
    fn test_single_node_tree() {
        let tree = ClusterTree::from_edges(1, &[], 0).unwrap();
        assert_eq!(tree.leaves(), vec![0]);
        assert_eq!(tree.root_to_leaf_paths(), vec![vec![0]]);
        assert!(tree.branch_points().is_empty());
    }
}
