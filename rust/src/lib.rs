//! Robust clustering and lineage/pseudotime inference for single-cell embeddings.
//!
//! Stages, in data-flow order:
//! - `ensemble`: resampling consensus clustering with per-cell stability
//! - `lineage`: minimum spanning tree over cluster centroids, rooted, with lineages
//! - `curve`: simultaneous principal curves giving per-lineage pseudotime
//! - `output`: one table keyed by cell id plus graph metadata
//!
//! `pipeline::Pipeline` runs all of them. Build with the `python` feature for
//! the extension module.

pub mod cancel;
pub mod config;
pub mod curve;
pub mod distance;
pub mod embedding;
pub mod ensemble;
pub mod error;
pub mod lineage;
pub mod output;
pub mod pipeline;

#[cfg(feature = "python")]
mod python;

pub use cancel::{CancellationToken, RunStatus};
pub use config::{ClusteringConfig, CurveConfig, LineageConfig, PipelineConfig, RootSpec};
pub use curve::{CurveEngine, CurveFit, FitStatus, PrincipalCurve, PseudotimeRecord};
pub use distance::DistanceMetric;
pub use embedding::{CellMetadata, Embedding, EmbeddingProvider};
pub use ensemble::{
    BaseClusterer, Cluster, ClusterAssignment, EnsembleResult, KMeans, ResamplingEnsemble,
    UNASSIGNED,
};
pub use error::{ConvergenceWarning, Error, Result};
pub use lineage::{GraphBuilder, Lineage, LineageEdge, LineageGraph};
pub use output::{CellRecord, LineageEntry, TrajectoryOutput};
pub use pipeline::{run, Pipeline};
