//! Principal curve / pseudotime engine.
//!
//! This module provides:
//! - PrincipalCurve: arc-length parameterized polylines with projection
//! - Kernel smoothing used to refit curves each iteration
//! - CurveEngine: the simultaneous fitting loop with branch reweighting

pub mod engine;
pub mod principal;
pub mod smoother;

pub use engine::{branch_weights, CurveEngine, CurveFit, FitStatus, PseudotimeRecord};
pub use principal::{PrincipalCurve, Projection};
pub use smoother::kernel_smooth;
