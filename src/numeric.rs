//! Small dense linear algebra and sample statistics.
//!
//! Matrices are flat row-major `Vec<f64>` of dynamic size; everything here
//! is sized for the fitting pipeline (a few dozen columns at most), so the
//! O(n^3) direct methods are fine.

use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::errors::{FitError, Result};

/// Linear-interpolation percentile over unsorted data: the q-th percentile
/// sits at fractional rank `q/100 * (n-1)` of the sorted sample.
pub(crate) fn percentile(values: &[f64], q: f64) -> Result<f64> {
    if values.is_empty() {
        return Err(FitError::EmptyData("percentile of empty slice".into()));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (q / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Ok(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Ok(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
}

/// Zero-propagating sign: -1, 0, or 1. `f64::signum` maps 0.0 to 1.0,
/// which would leak a phantom markup for zero-size rows.
pub(crate) fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (ddof = 0). The split t-test divides by
/// this, not the sample estimate.
pub(crate) fn population_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / n as f64).sqrt()
}

/// Upper-tail probability of the Student-t distribution with `df` degrees
/// of freedom. Infinite test statistics map to exact 0/1 tails.
pub(crate) fn student_t_sf(t: f64, df: f64) -> f64 {
    if t.is_infinite() {
        return if t > 0.0 { 0.0 } else { 1.0 };
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => 1.0 - dist.cdf(t),
        // df <= 0 only happens on empty samples upstream
        Err(_) => 1.0,
    }
}

/// Solve `A x = b` for symmetric positive-definite `A` (n x n, row-major)
/// via Cholesky decomposition. Returns `None` if `A` is not PD.
pub(crate) fn solve_cholesky(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n);

    // A = L * L'
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                let ljj = l[j * n + j];
                if ljj.abs() < 1e-12 {
                    return None;
                }
                l[i * n + j] = sum / ljj;
            }
        }
    }

    // Forward substitution: L y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    // Backward substitution: L' x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }

    Some(x)
}

/// Least-squares solve of the normal equations `A x = b` where `A` is a
/// Gram block. Falls back to a scaled ridge when `A` is singular.
pub(crate) fn solve_lstsq(a: &[f64], b: &[f64], n: usize) -> Result<Vec<f64>> {
    if let Some(x) = solve_cholesky(a, b, n) {
        return Ok(x);
    }
    let trace: f64 = (0..n).map(|i| a[i * n + i]).sum();
    let ridge = 1e-10 * trace.abs().max(1.0) / n as f64;
    let mut reg = a.to_vec();
    for i in 0..n {
        reg[i * n + i] += ridge;
    }
    solve_cholesky(&reg, b, n)
        .ok_or_else(|| FitError::Numeric(format!("singular {n}x{n} normal equations")))
}

/// Invert an n x n matrix by Gauss-Jordan elimination with partial
/// pivoting. Returns `None` on a numerically singular pivot.
pub(crate) fn invert(a: &[f64], n: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);
    let mut work = a.to_vec();
    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        inv[i * n + i] = 1.0;
    }

    for col in 0..n {
        // Pivot selection
        let mut pivot = col;
        for row in (col + 1)..n {
            if work[row * n + col].abs() > work[pivot * n + col].abs() {
                pivot = row;
            }
        }
        if work[pivot * n + col].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for j in 0..n {
                work.swap(col * n + j, pivot * n + j);
                inv.swap(col * n + j, pivot * n + j);
            }
        }

        let p = work[col * n + col];
        for j in 0..n {
            work[col * n + j] /= p;
            inv[col * n + j] /= p;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[row * n + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                work[row * n + j] -= factor * work[col * n + j];
                inv[row * n + j] -= factor * inv[col * n + j];
            }
        }
    }
    Some(inv)
}

/// Unique integer grid spaced evenly in log2 between `2^lo` and `2^hi`.
pub(crate) fn log2_spaced_ints(lo: f64, hi: f64, num: usize) -> Vec<u64> {
    let mut out: Vec<u64> = (0..num)
        .map(|i| {
            let exp = lo + (hi - lo) * i as f64 / (num - 1) as f64;
            2f64.powf(exp) as u64
        })
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}
