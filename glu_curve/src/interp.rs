//! Order-1 interpolating spline and dense resampling.

use ndarray::Array1;

use crate::GluError;

/// Piecewise-linear interpolant through strictly increasing knots.
///
/// Queries outside the knot span extend the first/last piece linearly.
#[derive(Clone, Debug)]
pub struct LinearSpline {
    xs: Array1<f64>,
    ys: Array1<f64>,
}

impl LinearSpline {
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self, GluError> {
        if xs.len() != ys.len() {
            return Err(GluError::InvalidParameter(format!(
                "spline knots mismatch: {} x vs {} y",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(GluError::InsufficientData(
                "spline needs at least two knots".into(),
            ));
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(GluError::InvalidParameter(
                "spline knots must be finite".into(),
            ));
        }
        if xs.windows(2).any(|w| w[1] <= w[0]) {
            return Err(GluError::InvalidParameter(
                "spline abscissas must be strictly increasing".into(),
            ));
        }
        Ok(Self {
            xs: Array1::from_vec(xs),
            ys: Array1::from_vec(ys),
        })
    }

    pub fn x_min(&self) -> f64 {
        self.xs[0]
    }

    pub fn x_max(&self) -> f64 {
        self.xs[self.xs.len() - 1]
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        // Left knot of the piece containing x.
        let i = match self.xs.iter().position(|&k| k > x).unwrap_or(n) {
            0 => 0,
            p if p >= n => n - 2,
            p => p - 1,
        };
        let (x0, x1) = (self.xs[i], self.xs[i + 1]);
        let (y0, y1) = (self.ys[i], self.ys[i + 1]);
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }

    /// Evaluate at `count` evenly spaced positions spanning the knot range.
    pub fn sample(&self, count: usize) -> (Vec<f64>, Vec<f64>) {
        let grid = linspace(self.x_min(), self.x_max(), count);
        let values = grid.iter().map(|&x| self.eval(x)).collect();
        (grid, values)
    }
}

/// `count` evenly spaced values from `start` to `end` inclusive; the last value is exactly `end`.
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let mut grid = Array1::linspace(start, end, count).to_vec();
            if let Some(last) = grid.last_mut() {
                *last = end;
            }
            grid
        }
    }
}
