//! Lineage topology over consensus clusters.
//!
//! Contains:
//! - A rooted cluster tree with traversal helpers
//! - Kruskal minimum spanning tree with deterministic tie-breaking
//! - The graph builder: root selection, end clusters, branch points, lineages

pub mod builder;
pub mod mst;
pub mod tree;

pub use builder::{GraphBuilder, Lineage, LineageEdge, LineageGraph};
pub use mst::{minimum_spanning_tree, MstEdge};
pub use tree::ClusterTree;
