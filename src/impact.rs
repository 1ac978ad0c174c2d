//! Per-node impact curve: sigmoid basis coefficients fit by NNLS.
//!
//! The response is the signed markup `sign(size) * markup`; the curve maps
//! a signed trade size to an expected price impulse. When the node has
//! more than two distinct trade sizes the fit runs on sqrt-count-weighted
//! group means, which damps the heteroscedastic noise of heavily repeated
//! sizes; tiny nodes fall back to a row-wise fit.

use std::fmt;

use crate::errors::{FitError, Result};
use crate::nnls;
use crate::sigmoid::SigmoidBasis;

/// A fitted impact curve plus its cross-validation statistics.
#[derive(Debug, Clone)]
pub struct ImpactModel {
    basis: SigmoidBasis,
    coeffs: Vec<f64>,
    /// In-fold SSE averaged across folds (divided by k-1).
    pub train_sse: f64,
    /// Out-of-fold SSE over the full sample.
    pub test_sse: f64,
    /// `sqrt(test_sse / n)`.
    pub test_rmse: f64,
    /// Out-of-fold signed residual per row, aligned with the fit input.
    pub(crate) test_err: Vec<f64>,
}

impl ImpactModel {
    /// Fit with `cv_folds`-fold cross-validation (contiguous folds, no
    /// shuffling, so repeated fits are identical).
    pub fn fit(signed_sizes: &[f64], markups: &[f64], cv_folds: usize) -> Result<Self> {
        let mut model = Self::fit_no_cv(signed_sizes, markups)?;
        model.cross_validate(signed_sizes, markups, cv_folds)?;
        Ok(model)
    }

    /// Fit coefficients only; CV statistics are left at zero.
    pub fn fit_no_cv(signed_sizes: &[f64], markups: &[f64]) -> Result<Self> {
        if signed_sizes.len() != markups.len() {
            return Err(FitError::LengthMismatch {
                column: "Markup".into(),
                expected: signed_sizes.len(),
                actual: markups.len(),
            });
        }
        if signed_sizes.is_empty() {
            return Err(FitError::EmptyData("impact fit on zero rows".into()));
        }

        let abs_sizes: Vec<f64> = signed_sizes.iter().map(|s| s.abs()).collect();
        let signed_markup: Vec<f64> = signed_sizes
            .iter()
            .zip(markups)
            .map(|(&s, &m)| crate::numeric::sign(s) * m)
            .collect();
        let basis = SigmoidBasis::from_trade_sizes(&abs_sizes)?;

        let groups = group_by_size(&abs_sizes, &signed_markup);
        let coeffs = if groups.len() > 2 {
            fit_grouped(&basis, &groups)?
        } else {
            fit_rowwise(&basis, &abs_sizes, &signed_markup)?
        };

        Ok(Self {
            basis,
            coeffs,
            train_sse: 0.0,
            test_sse: 0.0,
            test_rmse: 0.0,
            test_err: Vec::new(),
        })
    }

    /// K-fold cross-validation. Out-of-fold errors are the signed residual
    /// of the two-sided curve: `markup - model(signed_size)`.
    fn cross_validate(&mut self, signed_sizes: &[f64], markups: &[f64], k: usize) -> Result<()> {
        let n = signed_sizes.len();
        if k < 2 {
            return Err(FitError::Numeric(format!("cv_folds must be >= 2, got {k}")));
        }
        if n < k {
            return Err(FitError::EmptyData(format!(
                "{n} rows cannot form {k} folds"
            )));
        }

        let mut test_err = vec![0.0; n];
        let mut train_sse = 0.0;

        for (start, end) in fold_bounds(n, k) {
            let mut train_sizes = Vec::with_capacity(n - (end - start));
            let mut train_markups = Vec::with_capacity(n - (end - start));
            for i in (0..start).chain(end..n) {
                train_sizes.push(signed_sizes[i]);
                train_markups.push(markups[i]);
            }
            let fold_model = Self::fit_no_cv(&train_sizes, &train_markups)?;
            for i in start..end {
                test_err[i] = markups[i] - fold_model.apply(signed_sizes[i]);
            }
            train_sse += train_sizes
                .iter()
                .zip(&train_markups)
                .map(|(&x, &y)| {
                    let e = y - fold_model.apply(x);
                    e * e
                })
                .sum::<f64>();
        }

        self.train_sse = train_sse / (k - 1) as f64;
        self.test_sse = test_err.iter().map(|e| e * e).sum();
        self.test_rmse = (self.test_sse / n as f64).sqrt();
        self.test_err = test_err;
        Ok(())
    }

    /// Evaluate the curve at a signed trade size.
    pub fn apply(&self, x: f64) -> f64 {
        self.basis.apply(x, &self.coeffs)
    }

    pub fn apply_all(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.apply(x)).collect()
    }

    pub fn basis(&self) -> &SigmoidBasis {
        &self.basis
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0.0)
    }

    /// Stretch constants with strictly positive coefficients; an all-zero
    /// model collapses to a single 0 stretch.
    pub fn positive_stretches(&self) -> Vec<i64> {
        if self.is_zero() {
            return vec![0];
        }
        self.basis
            .stretches()
            .iter()
            .zip(&self.coeffs)
            .filter(|(_, &b)| b > 0.0)
            .map(|(&c, _)| c as i64)
            .collect()
    }

    /// Coefficients parallel to [`Self::positive_stretches`].
    pub fn positive_coeffs(&self) -> Vec<f64> {
        if self.is_zero() {
            return vec![0.0];
        }
        self.coeffs.iter().copied().filter(|&b| b > 0.0).collect()
    }

    /// `(stretch, coefficient)` pairs for serialization.
    pub fn serialize_pairs(&self) -> Vec<(i64, f64)> {
        self.positive_stretches()
            .into_iter()
            .zip(self.positive_coeffs())
            .collect()
    }

    /// Human-readable summary with coefficients scaled into ticks.
    pub fn describe(&self, tick_size: f64) -> String {
        let mut lines = Vec::new();
        if self.is_zero() {
            lines.push("(SV(0), 0)".to_string());
        } else {
            for (c, b) in self.basis.stretches().iter().zip(&self.coeffs) {
                if *b > 0.0 {
                    lines.push(format!("(SV({}), {:.4})", *c as i64, b / tick_size));
                }
            }
        }
        lines.push(format!(
            "RMSE Edge: {:.0}",
            1000.0 * self.test_rmse / tick_size
        ));
        lines.join("\n")
    }
}

impl fmt::Display for ImpactModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (c, b) in self.serialize_pairs() {
            writeln!(f, "(SV({c}), {b:.6})")?;
        }
        write!(f, "test RMSE: {:.6}", self.test_rmse)
    }
}

/// Contiguous fold boundaries: the first `n % k` folds get one extra row.
fn fold_bounds(n: usize, k: usize) -> Vec<(usize, usize)> {
    let base = n / k;
    let extra = n % k;
    let mut bounds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        bounds.push((start, start + size));
        start += size;
    }
    bounds
}

/// Group rows by exact absolute trade size, ascending.
/// Returns `(size, count, mean signed markup)` per group.
fn group_by_size(abs_sizes: &[f64], signed_markup: &[f64]) -> Vec<(f64, usize, f64)> {
    let mut order: Vec<usize> = (0..abs_sizes.len()).collect();
    order.sort_by(|&a, &b| {
        abs_sizes[a]
            .partial_cmp(&abs_sizes[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut groups: Vec<(f64, usize, f64)> = Vec::new();
    for &i in &order {
        match groups.last_mut() {
            Some((size, count, sum)) if *size == abs_sizes[i] => {
                *count += 1;
                *sum += signed_markup[i];
            }
            _ => groups.push((abs_sizes[i], 1, signed_markup[i])),
        }
    }
    for (_, count, sum) in &mut groups {
        *sum /= *count as f64;
    }
    groups
}

/// Weighted NNLS on group means, weight = sqrt(group count).
fn fit_grouped(basis: &SigmoidBasis, groups: &[(f64, usize, f64)]) -> Result<Vec<f64>> {
    let k = basis.len();
    let mut design = Vec::with_capacity(groups.len() * k);
    let mut target = Vec::with_capacity(groups.len());
    for &(size, count, mean_markup) in groups {
        let w = (count as f64).sqrt();
        for v in basis.design_row(size) {
            design.push(v * w);
        }
        target.push(mean_markup * w);
    }
    nnls::nnls(&design, groups.len(), k, &target)
}

fn fit_rowwise(basis: &SigmoidBasis, abs_sizes: &[f64], signed_markup: &[f64]) -> Result<Vec<f64>> {
    let design = basis.design(abs_sizes);
    nnls::nnls(&design, abs_sizes.len(), basis.len(), signed_markup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigmoid::sigmoid;

    fn synthetic(n: usize, stretch: f64, scale: f64) -> (Vec<f64>, Vec<f64>) {
        let sizes: Vec<f64> = (0..n)
            .map(|i| {
                let mag = 1.0 + (i % 40) as f64 * 5.0;
                if i % 2 == 0 {
                    mag
                } else {
                    -mag
                }
            })
            .collect();
        let markups = sizes.iter().map(|&s| scale * sigmoid(s, stretch)).collect();
        (sizes, markups)
    }

    #[test]
    fn coefficients_are_nonnegative() {
        let (sizes, markups) = synthetic(200, 16.0, 0.05);
        let model = ImpactModel::fit(&sizes, &markups, 2).unwrap();
        assert!(model.coeffs().iter().all(|&c| c >= 0.0));
    }

    #[test]
    fn recovers_known_curve() {
        let (sizes, markups) = synthetic(400, 7.0, 0.04);
        let model = ImpactModel::fit(&sizes, &markups, 2).unwrap();
        for &x in &[3.0, 20.0, 80.0, -80.0] {
            let truth = 0.04 * sigmoid(x, 7.0);
            assert!(
                (model.apply(x) - truth).abs() < 5e-3,
                "x={x}: {} vs {truth}",
                model.apply(x)
            );
        }
        // Odd curve: negative sizes mirror positive ones
        assert!((model.apply(50.0) + model.apply(-50.0)).abs() < 1e-12);
    }

    #[test]
    fn two_distinct_sizes_fit_rowwise_and_agree_with_grouping() {
        // With two groups of weight 1 the grouped design equals the raw
        // rows, so both code paths must produce the same coefficients.
        let abs_sizes = [2.0, 10.0];
        let signed_markup = [0.01, 0.03];
        let basis = SigmoidBasis::from_trade_sizes(&abs_sizes).unwrap();
        let rowwise = fit_rowwise(&basis, &abs_sizes, &signed_markup).unwrap();
        let groups = group_by_size(&abs_sizes, &signed_markup);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|&(_, count, _)| count == 1));
        let grouped = fit_grouped(&basis, &groups).unwrap();
        for (a, b) in rowwise.iter().zip(&grouped) {
            assert!((a - b).abs() < 1e-10);
        }
        // And the dispatcher takes the row-wise branch for <= 2 groups
        let model = ImpactModel::fit_no_cv(&[2.0, -10.0], &[0.01, -0.03]).unwrap();
        assert!(!model.coeffs().is_empty());
    }

    #[test]
    fn zero_model_serializes_to_single_pair() {
        // Markup anticorrelated with size: NNLS pins everything at zero
        let sizes = [1.0, 2.0, 5.0, 9.0, -1.0, -2.0, -5.0, -9.0];
        let markups = [-0.01, -0.02, -0.03, -0.04, 0.01, 0.02, 0.03, 0.04];
        let model = ImpactModel::fit(&sizes, &markups, 2).unwrap();
        assert!(model.is_zero());
        assert_eq!(model.serialize_pairs(), vec![(0, 0.0)]);
        assert_eq!(model.positive_stretches(), vec![0]);
    }

    #[test]
    fn cv_statistics_are_populated() {
        let (sizes, markups) = synthetic(100, 10.0, 0.02);
        let model = ImpactModel::fit(&sizes, &markups, 2).unwrap();
        assert_eq!(model.test_err.len(), 100);
        assert!(model.test_sse >= 0.0);
        assert!(model.test_rmse >= 0.0);
        assert!((model.test_rmse - (model.test_sse / 100.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn fold_bounds_are_contiguous_and_cover() {
        let bounds = fold_bounds(7, 2);
        assert_eq!(bounds, vec![(0, 4), (4, 7)]);
        let bounds = fold_bounds(10, 3);
        assert_eq!(bounds, vec![(0, 4), (4, 7), (7, 10)]);
    }
}
