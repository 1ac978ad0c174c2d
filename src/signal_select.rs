//! Active/passive-set NNLS over a named Gram matrix, used to select which
//! signals earn a place in the markup regression.
//!
//! Unlike the dense solver in [`crate::nnls`], this one never sees raw
//! rows: it works entirely on the averaged X'X sufficient statistic, adds
//! its regularization to a working copy, and walks signals between the
//! active (pinned at zero) and passive (free) sets one admission at a
//! time. The constant term starts passive and is never constrained.

use tracing::{debug, info, warn};

use crate::errors::{FitError, Result};
use crate::gram::{GramMatrix, CONST_COLUMN};
use crate::numeric;

/// Admissions allowed per signal before it is permanently evicted;
/// breaks active/passive thrash cycles.
const MAX_ROUND_TRIPS: usize = 10;

/// Ridge added to the Gram diagonal when measuring signal sensitivities.
const SENSITIVITY_RIDGE: f64 = 1e-4;

/// Result of a signal-selection fit.
#[derive(Debug, Clone)]
pub struct SignalFit {
    /// Coefficient per signal, in the solver's input order. Non-`const`
    /// coefficients are non-negative; the constant term is unconstrained.
    pub coefficients: Vec<(String, f64)>,
    /// Signals admitted to the passive set, in admission order.
    pub selected: Vec<String>,
    /// Selection-loop iterations consumed.
    pub iterations: usize,
}

impl SignalFit {
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficients
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| *c)
    }
}

/// Active-set NNLS solver bound to one Gram matrix restriction.
#[derive(Debug)]
pub struct ActiveSetNnls {
    /// Signal names followed by the markup column.
    names: Vec<String>,
    n_signals: usize,
    /// Positions (within signals) of the price-based signals.
    price: Vec<usize>,
    /// Position of the markup column (= `n_signals`).
    markup: usize,
    const_idx: usize,
    /// Unregularized restriction, kept for diagnostics.
    gram: GramMatrix,
    /// Regularized working matrix, row-major.
    working: Vec<f64>,
    sensitivities: Vec<f64>,
    beta: Vec<f64>,
    passive: Vec<usize>,
    active: Vec<usize>,
    admit_counts: Vec<usize>,
}

impl ActiveSetNnls {
    /// Restrict `gram` (an averaged covariance estimate) to the given
    /// signals and markup. `zero_signals` must contain the `const` column.
    pub fn new(
        gram: &GramMatrix,
        price_signals: &[String],
        zero_signals: &[String],
        markup: &str,
    ) -> Result<Self> {
        let mut names: Vec<String> = Vec::with_capacity(price_signals.len() + zero_signals.len() + 1);
        names.extend(price_signals.iter().cloned());
        names.extend(zero_signals.iter().cloned());
        let n_signals = names.len();
        let const_idx = names
            .iter()
            .position(|n| n == CONST_COLUMN)
            .ok_or_else(|| FitError::UnknownSignal(CONST_COLUMN.into()))?;
        names.push(markup.to_string());

        let restricted = gram.restricted(&names)?;
        Ok(Self {
            price: (0..price_signals.len()).collect(),
            markup: n_signals,
            const_idx,
            gram: restricted,
            working: Vec::new(),
            sensitivities: vec![0.0; n_signals],
            beta: vec![0.0; n_signals],
            passive: Vec::new(),
            active: Vec::new(),
            admit_counts: vec![0; n_signals],
            names,
            n_signals,
        })
    }

    /// Unregularized Gram restriction this solver was built on.
    pub fn gram(&self) -> &GramMatrix {
        &self.gram
    }

    /// Run the full selection. Deterministic for a given Gram matrix.
    pub fn fit(&mut self) -> Result<SignalFit> {
        self.calc_sensitivities()?;
        self.working = regularized_matrix(
            &self.gram,
            &self.price,
            self.markup,
            self.const_idx,
            &self.sensitivities,
        );

        self.beta = vec![0.0; self.n_signals];
        self.passive = vec![self.const_idx];
        self.active = (0..self.n_signals)
            .filter(|&s| s != self.const_idx)
            .collect();
        self.admit_counts = vec![0; self.n_signals];

        let mut selected = Vec::new();
        let mut iterations = 0;
        let max_iterations = MAX_ROUND_TRIPS * self.n_signals.max(1);

        while let Some(sig) = self.next_signal() {
            self.active.retain(|&s| s != sig);
            self.passive.push(sig);
            selected.push(self.names[sig].clone());
            self.update_beta()?;

            iterations += 1;
            debug!(count = iterations, signal = %self.names[sig], "signal admitted");
            if iterations >= max_iterations {
                warn!(
                    iterations,
                    "signal selection hit the iteration cap; stopping with current passive set"
                );
                break;
            }
        }

        // Roundoff guard: non-const coefficients are non-negative by
        // construction of the Lawson-Hanson steps.
        for (s, b) in self.beta.iter_mut().enumerate() {
            if s != self.const_idx && *b < 0.0 {
                *b = 0.0;
            }
        }

        Ok(SignalFit {
            coefficients: (0..self.n_signals)
                .map(|s| (self.names[s].clone(), self.beta[s]))
                .collect(),
            selected,
            iterations,
        })
    }

    /// Signal sensitivities: sqrt of the ridge-stabilized inverse Gram
    /// diagonal over the signal block, normalized to a max of 1. Used to
    /// weight the per-signal shrinkage, not as coefficients.
    fn calc_sensitivities(&mut self) -> Result<()> {
        let k = self.n_signals;
        let n = self.names.len();
        let dense = self.gram.dense();
        let mut block = vec![0.0; k * k];
        for i in 0..k {
            for j in 0..k {
                block[i * k + j] = dense[i * n + j];
            }
            block[i * k + i] += SENSITIVITY_RIDGE;
        }
        let inv = numeric::invert(&block, k)
            .ok_or_else(|| FitError::Numeric("singular sensitivity matrix".into()))?;
        let mut sens: Vec<f64> = (0..k).map(|i| inv[i * k + i].max(0.0).sqrt()).collect();
        let max = sens.iter().cloned().fold(0.0f64, f64::max);
        if max > 0.0 {
            for s in &mut sens {
                *s /= max;
            }
        }
        self.sensitivities = sens;
        Ok(())
    }

    /// Pick the next signal to admit: the active signal with the largest
    /// positive residual covariance. Signals that round-trip too often are
    /// evicted permanently; if only non-positively-correlated candidates
    /// remain, the weakest positively-normalized one is dropped instead.
    fn next_signal(&mut self) -> Option<usize> {
        loop {
            if self.active.is_empty() {
                return None;
            }
            let w = &self.working;
            let n = self.names.len();

            let err_cov: Vec<f64> = self
                .active
                .iter()
                .map(|&s| {
                    let mut c = w[s * n + self.markup];
                    for j in 0..self.n_signals {
                        c -= w[s * n + j] * self.beta[j];
                    }
                    c
                })
                .collect();

            let max_cov = err_cov.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if max_cov <= 0.0 {
                info!("no more positively-correlated signals in the active set");
                return None;
            }

            let mut err_var = w[self.markup * n + self.markup];
            for i in 0..self.n_signals {
                for j in 0..self.n_signals {
                    err_var -= self.beta[i] * w[i * n + j] * self.beta[j];
                }
            }

            if let Some(pos) = err_cov.iter().position(|&c| c > 0.0) {
                // First maximal candidate wins ties
                let mut best = pos;
                for (i, &c) in err_cov.iter().enumerate() {
                    if c > err_cov[best] {
                        best = i;
                    }
                }
                let sig = self.active[best];
                self.admit_counts[sig] += 1;
                if self.admit_counts[sig] > MAX_ROUND_TRIPS {
                    debug!(signal = %self.names[sig], "too many round trips, evicting");
                    self.active.retain(|&s| s != sig);
                    continue;
                }
                debug!(
                    signal = %self.names[sig],
                    cov = err_cov[best],
                    sensitivity = self.sensitivities[sig],
                    "next signal"
                );
                return Some(sig);
            }

            // No strictly positive covariance left: drop the weakest
            // positively-normalized coefficient and retry.
            let mut weakest: Option<(usize, f64)> = None;
            for (i, &s) in self.active.iter().enumerate() {
                let var = w[s * n + s];
                if var <= 0.0 || err_var <= 0.0 {
                    continue;
                }
                let norm = err_cov[i] / var.sqrt() / err_var.sqrt();
                if norm > 0.0 {
                    match weakest {
                        Some((_, best)) if best <= norm => {}
                        _ => weakest = Some((s, norm)),
                    }
                }
            }
            match weakest {
                Some((s, norm)) => {
                    debug!(signal = %self.names[s], norm_beta = norm, "evicting weak signal");
                    self.active.retain(|&a| a != s);
                }
                None => return None,
            }
        }
    }

    /// Re-solve the unconstrained least squares on the passive set; while
    /// any non-const passive coefficient is non-positive, take a
    /// Lawson-Hanson interpolation step toward feasibility and evict the
    /// most negative offender back to the active set.
    fn update_beta(&mut self) -> Result<()> {
        let mut fit = self.passive_fit()?;
        loop {
            let offenders: Vec<usize> = self
                .passive
                .iter()
                .enumerate()
                .filter(|&(_, &s)| s != self.const_idx)
                .filter(|&(pi, _)| fit[pi] <= 0.0)
                .map(|(_, &s)| s)
                .collect();
            if offenders.is_empty() {
                break;
            }

            let fit_ext = self.extend(&fit);
            let mut alpha = f64::INFINITY;
            for &s in &offenders {
                let denom = self.beta[s] - fit_ext[s];
                if denom != 0.0 {
                    let step = self.beta[s] / denom;
                    if step.is_finite() && step < alpha {
                        alpha = step;
                    }
                }
            }
            if alpha.is_finite() {
                for s in 0..self.n_signals {
                    self.beta[s] -= alpha * (self.beta[s] - fit_ext[s]);
                }
            } else {
                warn!("degenerate interpolation step; evicting without moving beta");
            }

            let remove = *offenders
                .iter()
                .min_by(|&&a, &&b| {
                    self.beta[a]
                        .partial_cmp(&self.beta[b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .ok_or_else(|| FitError::Numeric("empty offender set".into()))?;
            debug!(
                signal = %self.names[remove],
                fit = fit_ext[remove],
                beta = self.beta[remove],
                "evicting non-positive passive coefficient"
            );
            self.passive.retain(|&s| s != remove);
            self.active.push(remove);
            fit = self.passive_fit()?;
        }

        self.beta = self.extend(&fit);
        Ok(())
    }

    /// Unconstrained least squares over the passive block of the working
    /// matrix; returned in passive-set order.
    fn passive_fit(&self) -> Result<Vec<f64>> {
        let k = self.passive.len();
        let n = self.names.len();
        let w = &self.working;
        let mut a = vec![0.0; k * k];
        let mut b = vec![0.0; k];
        for (i, &si) in self.passive.iter().enumerate() {
            b[i] = w[si * n + self.markup];
            for (j, &sj) in self.passive.iter().enumerate() {
                a[i * k + j] = w[si * n + sj];
            }
        }
        numeric::solve_lstsq(&a, &b, k)
    }

    /// Scatter a passive-order fit into a full signal-length vector.
    fn extend(&self, fit: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_signals];
        for (pi, &s) in self.passive.iter().enumerate() {
            out[s] = fit[pi];
        }
        out
    }
}

/// Build the regularized working matrix from the raw restriction. Pure
/// with respect to the input Gram matrix.
///
/// Three terms, applied in order:
/// 1. The const row/column is inflated 1000x and folded into the markup
///    row/column, centering the constant coefficient.
/// 2. An outer-product anchor over price signals plus markup, scaling the
///    sum of price-based coefficients.
/// 3. A small per-signal outer product weighted by its sensitivity,
///    shrinking ill-determined signals toward sensible scale.
fn regularized_matrix(
    gram: &GramMatrix,
    price: &[usize],
    markup: usize,
    const_idx: usize,
    sensitivities: &[f64],
) -> Vec<f64> {
    let n = gram.dim();
    let n_signals = n - 1;
    let mut g = gram.dense().to_vec();

    // Const column, then const row, scaled 1000x (diagonal gets both).
    for i in 0..n {
        g[i * n + const_idx] *= 1000.0;
    }
    for j in 0..n {
        g[const_idx * n + j] *= 1000.0;
    }
    // Fold const into markup: column first, then row, sequentially.
    for i in 0..n {
        g[i * n + markup] += g[i * n + const_idx];
    }
    for j in 0..n {
        g[markup * n + j] += g[const_idx * n + j];
    }

    // Anchor: sum of price-based coefficients vs markup.
    let anchor = 10.0 * g[markup * n + markup].max(0.0).sqrt();
    let mut vec_buf = vec![0.0; n];
    for &p in price {
        vec_buf[p] = anchor;
    }
    vec_buf[markup] = anchor;
    add_outer(&mut g, &vec_buf, 1.0, n);

    // Per-signal shrinkage weighted by sensitivity.
    const C: f64 = 1000.0;
    for s in 0..n_signals {
        for v in vec_buf.iter_mut() {
            *v = 0.0;
        }
        for &p in price {
            vec_buf[p] = C;
        }
        vec_buf[s] += sensitivities[s] / C;
        add_outer(&mut g, &vec_buf, 1e-6, n);
    }

    g
}

fn add_outer(g: &mut [f64], v: &[f64], scale: f64, n: usize) {
    for i in 0..n {
        if v[i] == 0.0 {
            continue;
        }
        for j in 0..n {
            g[i * n + j] += scale * v[i] * v[j];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Rows over [s1, s2, const, markup] where the markup is driven by
    /// s1. Both signals are exactly zero-mean and mutually orthogonal,
    /// so the const fold adds nothing to their markup covariances and
    /// the residual-covariance ordering reflects the true drivers.
    fn dominant_signal_gram() -> GramMatrix {
        let mut rows = Vec::new();
        for i in 0..200 {
            let s1 = if i % 2 == 0 { 1.0 } else { -1.0 };
            let s2 = if i % 4 < 2 { 1.0 } else { -1.0 };
            let markup = 1.5 * s1 + 0.05 * s2;
            rows.push(vec![s1, s2, 1.0, markup]);
        }
        GramMatrix::from_rows(names(&["s1", "s2", CONST_COLUMN, "mkp_Midpt_1m"]), &rows)
            .unwrap()
    }

    #[test]
    fn dominant_signal_selected_first_with_largest_share() {
        let gram = dominant_signal_gram().averaged().unwrap();
        let mut solver = ActiveSetNnls::new(
            &gram,
            &names(&["s1", "s2"]),
            &names(&[CONST_COLUMN]),
            "mkp_Midpt_1m",
        )
        .unwrap();
        let fit = solver.fit().unwrap();

        assert_eq!(fit.selected.first().map(String::as_str), Some("s1"));
        let c1 = fit.coefficient("s1").unwrap();
        let c2 = fit.coefficient("s2").unwrap();
        assert!(c1 > 0.0);
        assert!(c1 > c2, "s1 ({c1}) should dominate s2 ({c2})");
    }

    #[test]
    fn non_const_coefficients_are_nonnegative() {
        let mut rows = Vec::new();
        for i in 0..120 {
            let s1 = (i as f64 / 60.0) - 1.0;
            let s2 = -s1 + 0.01 * ((i % 5) as f64 - 2.0);
            let markup = 0.8 * s1;
            rows.push(vec![s1, s2, 1.0, markup]);
        }
        let gram = GramMatrix::from_rows(names(&["s1", "s2", CONST_COLUMN, "mkp"]), &rows)
            .unwrap()
            .averaged()
            .unwrap();
        let mut solver = ActiveSetNnls::new(
            &gram,
            &names(&["s1", "s2"]),
            &names(&[CONST_COLUMN]),
            "mkp",
        )
        .unwrap();
        let fit = solver.fit().unwrap();
        for (name, coeff) in &fit.coefficients {
            if name != CONST_COLUMN {
                assert!(*coeff >= 0.0, "{name} = {coeff}");
            }
        }
    }

    #[test]
    fn missing_const_is_rejected() {
        let gram = dominant_signal_gram().averaged().unwrap();
        let err = ActiveSetNnls::new(&gram, &names(&["s1", "s2"]), &[], "mkp_Midpt_1m");
        assert!(matches!(err, Err(FitError::UnknownSignal(_))));
    }

    #[test]
    fn regularization_does_not_mutate_input() {
        let gram = dominant_signal_gram().averaged().unwrap();
        let mut solver = ActiveSetNnls::new(
            &gram,
            &names(&["s1", "s2"]),
            &names(&[CONST_COLUMN]),
            "mkp_Midpt_1m",
        )
        .unwrap();
        let before = solver.gram().clone();
        solver.fit().unwrap();
        assert_eq!(before, *solver.gram());
    }

    #[test]
    fn selection_terminates_on_uncorrelated_noise() {
        // Markup orthogonal to every signal: nothing should be admitted
        // beyond what the anchor terms force, and fit() must return.
        let mut rows = Vec::new();
        for i in 0..100 {
            let s1 = if i % 2 == 0 { 1.0 } else { -1.0 };
            let s2 = if i % 4 < 2 { 1.0 } else { -1.0 };
            rows.push(vec![s1, s2, 1.0, 0.0]);
        }
        let gram = GramMatrix::from_rows(names(&["s1", "s2", CONST_COLUMN, "mkp"]), &rows)
            .unwrap()
            .averaged()
            .unwrap();
        let mut solver = ActiveSetNnls::new(
            &gram,
            &names(&["s1", "s2"]),
            &names(&[CONST_COLUMN]),
            "mkp",
        )
        .unwrap();
        let fit = solver.fit().unwrap();
        assert!(fit.iterations <= MAX_ROUND_TRIPS * 3);
    }
}
