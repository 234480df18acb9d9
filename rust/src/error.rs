//! Error taxonomy for the clustering and lineage pipeline.
//!
//! Configuration and input problems fail fast. Numerical trouble inside a
//! single resampling draw is recovered by the ensemble and only surfaces here
//! when every draw failed. Non-convergence of the curve fit is a warning, not
//! an error, and lives in [`ConvergenceWarning`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the pipeline components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A parameter is out of range or inconsistent with the input size.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The embedding, metadata or cluster inputs are malformed.
    #[error("invalid input: {0}")]
    Input(String),

    /// A clustering draw or cluster is numerically degenerate.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// The spanning tree could not connect every cluster.
    #[error("disconnected cluster graph: {connected} of {total} clusters reachable")]
    DisconnectedGraph { connected: usize, total: usize },

    /// Output could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Error::Input(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Error::NumericalInstability(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Curve fitting stopped at the iteration cap before reaching epsilon.
///
/// Attached to the fit result; the returned curves and pseudotimes are the
/// best estimate available when the loop stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceWarning {
    pub iterations: usize,
    pub displacement: f64,
    pub epsilon: f64,
}

impl std::fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "curve fit did not converge after {} iterations (displacement {:.3e} >= epsilon {:.3e})",
            self.iterations, self.displacement, self.epsilon
        )
    }
}
