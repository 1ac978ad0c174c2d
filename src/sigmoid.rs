//! Saturating sigmoid basis for impact curves.
//!
//! Each basis function is `x / (c + |x|)` for a stretch constant `c`: odd,
//! bounded in (-1, 1), and linear near zero with slope `1/c`. A grid of
//! stretches spanning the trade-size distribution lets the NNLS fit
//! compose impact curves with size-dependent saturation.

use crate::errors::Result;
use crate::numeric;

/// A single sigmoid evaluation. `c = 0` degenerates to `sign(x)`.
pub fn sigmoid(x: f64, c: f64) -> f64 {
    let denom = c + x.abs();
    if denom == 0.0 {
        0.0
    } else {
        x / denom
    }
}

/// An ordered grid of integer stretch constants and the design matrices
/// built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct SigmoidBasis {
    stretches: Vec<f64>,
}

impl SigmoidBasis {
    /// Build the stretch grid from absolute trade sizes: log-spaced points
    /// (step 0.2) from 1 up to the 95th percentile, truncated to integers
    /// and deduplicated, always containing 0 and 1.
    pub fn from_trade_sizes(abs_sizes: &[f64]) -> Result<Self> {
        let max_val = numeric::percentile(abs_sizes, 95.0)?;
        let mut grid: Vec<u64> = vec![0, 1];
        if max_val > 1.0 {
            let ln_max = max_val.ln();
            let mut step = 0.0;
            while step < ln_max {
                grid.push(step.exp() as u64);
                step += 0.2;
            }
        }
        grid.sort_unstable();
        grid.dedup();
        Ok(Self {
            stretches: grid.into_iter().map(|c| c as f64).collect(),
        })
    }

    /// Grid from explicit stretch constants (deserialized parameters).
    pub fn from_stretches(stretches: Vec<f64>) -> Self {
        Self { stretches }
    }

    pub fn stretches(&self) -> &[f64] {
        &self.stretches
    }

    pub fn len(&self) -> usize {
        self.stretches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stretches.is_empty()
    }

    /// One design row: `x` through every stretch.
    pub fn design_row(&self, x: f64) -> Vec<f64> {
        self.stretches.iter().map(|&c| sigmoid(x, c)).collect()
    }

    /// Row-major design matrix (`xs.len()` x `len()`).
    pub fn design(&self, xs: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(xs.len() * self.stretches.len());
        for &x in xs {
            for &c in &self.stretches {
                out.push(sigmoid(x, c));
            }
        }
        out
    }

    /// Evaluate a fitted curve at `x`.
    pub fn apply(&self, x: f64, coeffs: &[f64]) -> f64 {
        debug_assert_eq!(coeffs.len(), self.stretches.len());
        self.stretches
            .iter()
            .zip(coeffs)
            .map(|(&c, &b)| sigmoid(x, c) * b)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_odd_and_saturating() {
        assert_eq!(sigmoid(0.0, 0.0), 0.0);
        assert_eq!(sigmoid(5.0, 0.0), 1.0);
        assert_eq!(sigmoid(-5.0, 0.0), -1.0);
        assert!((sigmoid(10.0, 10.0) - 0.5).abs() < 1e-12);
        assert!((sigmoid(-3.0, 2.0) + sigmoid(3.0, 2.0)).abs() < 1e-12);
        assert!(sigmoid(1e9, 4.0) < 1.0);
    }

    #[test]
    fn grid_always_contains_zero_and_one() {
        let basis = SigmoidBasis::from_trade_sizes(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(basis.stretches(), &[0.0, 1.0]);
    }

    #[test]
    fn grid_spans_to_p95() {
        let sizes: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let basis = SigmoidBasis::from_trade_sizes(&sizes).unwrap();
        let stretches = basis.stretches();
        assert_eq!(stretches[0], 0.0);
        assert_eq!(stretches[1], 1.0);
        // p95 of 1..=100 is 95.05; largest grid point must stay below it
        assert!(*stretches.last().unwrap() <= 95.05);
        assert!(*stretches.last().unwrap() > 50.0);
        // strictly increasing after dedup
        assert!(stretches.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn design_row_matches_apply() {
        let basis = SigmoidBasis::from_stretches(vec![0.0, 1.0, 8.0]);
        let coeffs = [0.5, 0.25, 0.125];
        let row = basis.design_row(3.0);
        let dot: f64 = row.iter().zip(&coeffs).map(|(r, c)| r * c).sum();
        assert!((dot - basis.apply(3.0, &coeffs)).abs() < 1e-12);
    }
}
