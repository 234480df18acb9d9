//! Piecewise-linear principal curves parameterized by arc length.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::distance::squared_euclidean;
use crate::error::{Error, Result};

/// Power iterations used to find the leading axis of a point cloud.
const POWER_ITERATIONS: usize = 100;

/// Orthogonal projection of a point onto a curve.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// Arc length from the first knot to the projected point.
    pub arc_length: f64,
    /// Euclidean distance from the point to the curve.
    pub residual: f64,
    /// Closest point on the curve.
    pub point: Array1<f64>,
}

/// Polyline through embedding space.
///
/// A curve with a single knot is a point; every projection onto it has arc
/// length 0.
#[derive(Clone, Debug, PartialEq)]
pub struct PrincipalCurve {
    knots: Array2<f64>,
    cumulative: Vec<f64>,
}

impl PrincipalCurve {
    /// Build a curve from its knots (one per row, in order).
    pub fn new(knots: Array2<f64>) -> Result<Self> {
        if knots.nrows() == 0 {
            return Err(Error::input("a curve needs at least one knot"));
        }
        if knots.iter().any(|v| !v.is_finite()) {
            return Err(Error::numerical("curve knots must be finite"));
        }

        let mut cumulative = Vec::with_capacity(knots.nrows());
        cumulative.push(0.0);
        for i in 1..knots.nrows() {
            let step = squared_euclidean(knots.row(i - 1), knots.row(i)).sqrt();
            cumulative.push(cumulative[i - 1] + step);
        }

        Ok(Self { knots, cumulative })
    }

    /// Curve along the leading principal axis of `points`, spanning their
    /// extent along it.
    ///
    /// Identical points give a single-knot curve at their mean.
    pub fn along_first_axis(points: ArrayView2<f64>) -> Result<Self> {
        let d = points.ncols();
        let mean = points
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::input("cannot fit a curve to zero points"))?;
        let centered = &points - &mean;

        // Start from the row farthest from the mean (first on ties)
        let mut start = Array1::<f64>::zeros(d);
        let mut start_norm = 0.0;
        for row in centered.rows() {
            let norm = row.dot(&row);
            if norm > start_norm {
                start_norm = norm;
                start = row.to_owned();
            }
        }
        if start_norm <= f64::EPSILON {
            return Self::new(mean.insert_axis(Axis(0)));
        }

        let mut axis = &start / start_norm.sqrt();
        for _ in 0..POWER_ITERATIONS {
            // Covariance times axis without forming the covariance
            let scores = centered.dot(&axis);
            let next = centered.t().dot(&scores);
            let norm = next.dot(&next).sqrt();
            if norm <= f64::EPSILON {
                break;
            }
            axis = next / norm;
        }

        let scores = centered.dot(&axis);
        let lo = scores.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if hi - lo <= f64::EPSILON {
            return Self::new(mean.insert_axis(Axis(0)));
        }

        let mut knots = Array2::<f64>::zeros((2, d));
        knots.row_mut(0).assign(&(&mean + &(&axis * lo)));
        knots.row_mut(1).assign(&(&mean + &(&axis * hi)));
        Self::new(knots)
    }

    pub fn knots(&self) -> ArrayView2<f64> {
        self.knots.view()
    }

    pub fn n_knots(&self) -> usize {
        self.knots.nrows()
    }

    /// Total arc length.
    pub fn length(&self) -> f64 {
        self.cumulative[self.cumulative.len() - 1]
    }

    /// Arc length at each knot.
    pub fn knot_arc_lengths(&self) -> &[f64] {
        &self.cumulative
    }

    /// Point at arc length `s`, clamped to the curve ends.
    pub fn point_at(&self, s: f64) -> Array1<f64> {
        let last = self.n_knots() - 1;
        if last == 0 || s <= 0.0 {
            return self.knots.row(0).to_owned();
        }
        if s >= self.length() {
            return self.knots.row(last).to_owned();
        }

        // First segment whose end lies at or beyond s
        let seg = self.cumulative.partition_point(|&c| c < s).clamp(1, last) - 1;
        let span = self.cumulative[seg + 1] - self.cumulative[seg];
        if span <= 0.0 {
            return self.knots.row(seg).to_owned();
        }
        let t = (s - self.cumulative[seg]) / span;
        let a = self.knots.row(seg);
        let b = self.knots.row(seg + 1);
        &a + &((&b - &a) * t)
    }

    /// Project a point orthogonally onto the curve.
    ///
    /// Each segment is searched; the nearest wins, the earliest segment on
    /// ties. Zero-length segments behave like their start knot.
    pub fn project(&self, point: ArrayView1<f64>) -> Projection {
        let mut best_sq = f64::INFINITY;
        let mut best_arc = 0.0;
        let mut best_point = self.knots.row(0).to_owned();

        if self.n_knots() == 1 {
            let residual = squared_euclidean(point, self.knots.row(0)).sqrt();
            return Projection {
                arc_length: 0.0,
                residual,
                point: best_point,
            };
        }

        for seg in 0..self.n_knots() - 1 {
            let a = self.knots.row(seg);
            let b = self.knots.row(seg + 1);
            let direction = &b - &a;
            let len_sq = direction.dot(&direction);

            let t = if len_sq > 0.0 {
                let offset = &point - &a;
                (offset.dot(&direction) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };

            let projected = &a + &(&direction * t);
            let dist_sq = squared_euclidean(point, projected.view());
            if dist_sq < best_sq {
                best_sq = dist_sq;
                best_arc = self.cumulative[seg] + t * len_sq.sqrt();
                best_point = projected;
            }
        }

        Projection {
            arc_length: best_arc,
            residual: best_sq.sqrt(),
            point: best_point,
        }
    }
}
