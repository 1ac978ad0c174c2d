//! Dense non-negative least squares (Lawson-Hanson).
//!
//! Solves `min ||A x - b||` subject to `x >= 0` for the small design
//! matrices produced by the sigmoid basis (a handful of columns). The
//! signal-selection solver in [`crate::signal_select`] is a separate
//! algorithm operating on sufficient statistics; this one sees raw rows.

use crate::errors::{FitError, Result};
use crate::numeric;

/// Maximum passive-set rebuild iterations, scaled by column count.
const MAX_OUTER_FACTOR: usize = 3;

/// Solve the NNLS problem for row-major `a` (m x n) and target `b`.
///
/// Returns coefficients of length `n`, all `>= 0`.
pub(crate) fn nnls(a: &[f64], m: usize, n: usize, b: &[f64]) -> Result<Vec<f64>> {
    debug_assert_eq!(a.len(), m * n);
    debug_assert_eq!(b.len(), m);
    if m == 0 || n == 0 {
        return Err(FitError::EmptyData("nnls on empty design".into()));
    }

    let mut x = vec![0.0; n];
    let mut passive = vec![false; n];

    // Gradient w = A'(b - Ax); at x = 0 this is A'b.
    let mut w = gradient(a, m, n, b, &x);

    let tol = 1e-10 * max_abs(&w).max(1.0);
    let max_outer = MAX_OUTER_FACTOR * n.max(1);

    for _ in 0..max_outer {
        // Most positively correlated inactive column
        let mut best: Option<(usize, f64)> = None;
        for j in 0..n {
            if !passive[j] {
                match best {
                    Some((_, bw)) if w[j] <= bw => {}
                    _ => best = Some((j, w[j])),
                }
            }
        }
        let (j_new, w_max) = match best {
            Some(pair) => pair,
            None => break, // all columns passive
        };
        if w_max <= tol {
            break; // KKT satisfied
        }
        passive[j_new] = true;

        // Inner loop: restore feasibility of the passive-set solution
        loop {
            let z = passive_solve(a, m, n, b, &passive)?;
            let min_z = passive
                .iter()
                .enumerate()
                .filter(|(_, &p)| p)
                .map(|(j, _)| z[j])
                .fold(f64::INFINITY, f64::min);
            if min_z > 0.0 {
                for j in 0..n {
                    x[j] = if passive[j] { z[j] } else { 0.0 };
                }
                break;
            }

            // Interpolate toward feasibility and drop the binding column
            let mut alpha = f64::INFINITY;
            for j in 0..n {
                if passive[j] && z[j] <= 0.0 {
                    let step = x[j] / (x[j] - z[j]);
                    if step < alpha {
                        alpha = step;
                    }
                }
            }
            for j in 0..n {
                if passive[j] {
                    x[j] += alpha * (z[j] - x[j]);
                }
            }
            for j in 0..n {
                if passive[j] && x[j].abs() < 1e-12 && z[j] <= 0.0 {
                    passive[j] = false;
                    x[j] = 0.0;
                }
            }
        }

        w = gradient(a, m, n, b, &x);
    }

    // Clamp any -0.0 / roundoff leakage
    for v in &mut x {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
    Ok(x)
}

/// Unconstrained least squares on the passive columns via normal equations.
fn passive_solve(a: &[f64], m: usize, n: usize, b: &[f64], passive: &[bool]) -> Result<Vec<f64>> {
    let cols: Vec<usize> = (0..n).filter(|&j| passive[j]).collect();
    let k = cols.len();
    let mut ata = vec![0.0; k * k];
    let mut atb = vec![0.0; k];
    for row in 0..m {
        let base = row * n;
        for (ci, &jc) in cols.iter().enumerate() {
            let aij = a[base + jc];
            atb[ci] += aij * b[row];
            for (cj, &jc2) in cols.iter().enumerate().skip(ci) {
                ata[ci * k + cj] += aij * a[base + jc2];
            }
        }
    }
    // Mirror the upper triangle
    for i in 0..k {
        for j in 0..i {
            ata[i * k + j] = ata[j * k + i];
        }
    }
    let sol = numeric::solve_lstsq(&ata, &atb, k)?;
    let mut z = vec![0.0; n];
    for (ci, &jc) in cols.iter().enumerate() {
        z[jc] = sol[ci];
    }
    Ok(z)
}

fn gradient(a: &[f64], m: usize, n: usize, b: &[f64], x: &[f64]) -> Vec<f64> {
    let mut w = vec![0.0; n];
    for row in 0..m {
        let base = row * n;
        let mut pred = 0.0;
        for j in 0..n {
            pred += a[base + j] * x[j];
        }
        let resid = b[row] - pred;
        for j in 0..n {
            w[j] += a[base + j] * resid;
        }
    }
    w
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0f64, |acc, x| acc.max(x.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_nonnegative_solution_exactly() {
        // b = A [1, 2] with well-conditioned A
        let a = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let b = [1.0, 2.0, 3.0];
        let x = nnls(&a, 3, 2, &b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-8);
        assert!((x[1] - 2.0).abs() < 1e-8);
    }

    #[test]
    fn clips_negative_unconstrained_solution_to_zero() {
        // Unconstrained LS would want a negative weight on column 2
        let a = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let b = [2.0, 2.0, 2.0];
        let x = nnls(&a, 3, 2, &b).unwrap();
        assert!(x.iter().all(|&v| v >= 0.0));
        assert!((x[0] - 2.0).abs() < 1e-8);
        assert_eq!(x[1], 0.0);
    }

    #[test]
    fn zero_target_gives_zero_coefficients() {
        let a = [1.0, 0.5, 0.25, 1.0, 2.0, 3.0];
        let b = [0.0, 0.0];
        let x = nnls(&a, 2, 3, &b).unwrap();
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn anticorrelated_target_stays_at_zero() {
        let a = [1.0, 1.0, 1.0];
        let b = [-1.0, -2.0, -3.0];
        let x = nnls(&a, 3, 1, &b).unwrap();
        assert_eq!(x[0], 0.0);
    }
}
