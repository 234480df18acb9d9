//! Kernel smoothing of cells against their arc-length positions.
//!
//! Each knot of the refitted curve is the Nadaraya-Watson estimate
//! Σ w_i K((λ_i - s) / h) x_i / Σ w_i K((λ_i - s) / h) with a Gaussian
//! kernel K, evaluated at `n_knots` evenly spaced arc lengths s.

use ndarray::{Array1, Array2, ArrayView2};

use super::principal::PrincipalCurve;
use crate::error::Result;

/// Kernel mass below which a knot keeps its previous position.
const MIN_KERNEL_MASS: f64 = 1e-12;

/// Refit a curve through weighted cells.
///
/// # Arguments
/// * `previous` - Current curve; `arc_lengths` were measured on it
/// * `points` - Embedding rows (n × d)
/// * `arc_lengths` - Arc length of each cell's projection onto `previous`
/// * `weights` - Per-cell weight; cells with weight 0 are ignored
/// * `bandwidth` - Kernel width as a fraction of the covered arc length
/// * `n_knots` - Knots in the refitted curve
///
/// # Returns
/// * The refitted curve, or `previous` unchanged when no cell carries weight
pub fn kernel_smooth(
    previous: &PrincipalCurve,
    points: ArrayView2<f64>,
    arc_lengths: &[f64],
    weights: &[f64],
    bandwidth: f64,
    n_knots: usize,
) -> Result<PrincipalCurve> {
    let d = points.ncols();
    let active: Vec<usize> = (0..points.nrows()).filter(|&i| weights[i] > 0.0).collect();
    if active.is_empty() {
        return Ok(previous.clone());
    }

    let lo = active.iter().map(|&i| arc_lengths[i]).fold(f64::INFINITY, f64::min);
    let hi = active.iter().map(|&i| arc_lengths[i]).fold(f64::NEG_INFINITY, f64::max);
    let span = hi - lo;

    // Every cell sits at one arc length: collapse to the weighted mean
    if span <= f64::EPSILON {
        let mut mean = Array1::<f64>::zeros(d);
        let mut mass = 0.0;
        for &i in &active {
            mean.scaled_add(weights[i], &points.row(i));
            mass += weights[i];
        }
        mean /= mass;
        return PrincipalCurve::new(mean.insert_axis(ndarray::Axis(0)));
    }

    let h = bandwidth * span;
    let mut knots = Array2::<f64>::zeros((n_knots, d));
    for k in 0..n_knots {
        let s = lo + span * k as f64 / (n_knots - 1) as f64;

        let mut estimate = Array1::<f64>::zeros(d);
        let mut mass = 0.0;
        for &i in &active {
            let u = (arc_lengths[i] - s) / h;
            let w = weights[i] * (-0.5 * u * u).exp();
            if w > 0.0 {
                estimate.scaled_add(w, &points.row(i));
                mass += w;
            }
        }

        if mass > MIN_KERNEL_MASS {
            knots.row_mut(k).assign(&(estimate / mass));
        } else {
            knots.row_mut(k).assign(&previous.point_at(s));
        }
    }

    PrincipalCurve::new(knots)
}
