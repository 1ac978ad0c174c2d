//! Named Gram (X'X) matrix accumulated over data partitions.
//!
//! The Gram matrix is the sufficient statistic for the signal-selection
//! fit: per-day sums of pairwise column products are accumulated (never
//! overwritten), and the running row count comes from the `const` column's
//! diagonal entry. Regularization happens downstream on a copy, so the raw
//! accumulator stays available for diagnostics.

use std::collections::HashMap;

use crate::errors::{FitError, Result};

/// Name of the constant-term column; its diagonal carries the row count.
pub const CONST_COLUMN: &str = "const";

/// Symmetric sum-of-products matrix over a fixed ordered set of columns.
#[derive(Debug, Clone, PartialEq)]
pub struct GramMatrix {
    names: Vec<String>,
    index: HashMap<String, usize>,
    data: Vec<f64>,
}

impl GramMatrix {
    /// Zero matrix over the given ordered column names.
    pub fn zeros(names: Vec<String>) -> Result<Self> {
        let index: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        if index.len() != names.len() {
            return Err(FitError::Numeric("duplicate Gram column names".into()));
        }
        let n = names.len();
        Ok(Self {
            names,
            index,
            data: vec![0.0; n * n],
        })
    }

    /// Build X'X from row-major rows over `names` (a `const` column of
    /// ones should be included by the caller).
    pub fn from_rows(names: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let mut gram = Self::zeros(names)?;
        let n = gram.names.len();
        for row in rows {
            if row.len() != n {
                return Err(FitError::LengthMismatch {
                    column: "gram row".into(),
                    expected: n,
                    actual: row.len(),
                });
            }
            for i in 0..n {
                for j in i..n {
                    let v = row[i] * row[j];
                    gram.data[i * n + j] += v;
                    if i != j {
                        gram.data[j * n + i] += v;
                    }
                }
            }
        }
        Ok(gram)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub(crate) fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| FitError::UnknownSignal(name.to_string()))
    }

    pub fn get(&self, row: &str, col: &str) -> Result<f64> {
        let (i, j) = (self.position(row)?, self.position(col)?);
        Ok(self.data[i * self.dim() + j])
    }

    /// Accumulate another partition's sums. Column sets must match.
    pub fn accumulate(&mut self, update: &GramMatrix) -> Result<()> {
        if update.names != self.names {
            return Err(FitError::Numeric(
                "gram accumulation with mismatched columns".into(),
            ));
        }
        for (dst, src) in self.data.iter_mut().zip(&update.data) {
            *dst += src;
        }
        Ok(())
    }

    /// Accumulated row count, read off the `const` diagonal.
    pub fn row_count(&self) -> Result<f64> {
        self.get(CONST_COLUMN, CONST_COLUMN)
    }

    /// Averaged covariance estimate: every entry divided by the row count.
    pub fn averaged(&self) -> Result<GramMatrix> {
        let count = self.row_count()?;
        if count <= 0.0 {
            return Err(FitError::EmptyData("gram matrix has no rows".into()));
        }
        let mut out = self.clone();
        for v in &mut out.data {
            *v /= count;
        }
        Ok(out)
    }

    /// Restriction to an ordered subset of columns.
    pub fn restricted(&self, names: &[String]) -> Result<GramMatrix> {
        let mut out = GramMatrix::zeros(names.to_vec())?;
        let k = names.len();
        for (i, a) in names.iter().enumerate() {
            let pa = self.position(a)?;
            for (j, b) in names.iter().enumerate() {
                let pb = self.position(b)?;
                out.data[i * k + j] = self.data[pa * self.dim() + pb];
            }
        }
        Ok(out)
    }

    /// Raw dense storage, row-major over [`Self::names`].
    pub(crate) fn dense(&self) -> &[f64] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn from_rows_is_symmetric_with_nonnegative_diagonal() {
        let rows = vec![
            vec![1.0, 2.0, 1.0],
            vec![-1.0, 0.5, 1.0],
            vec![3.0, -2.0, 1.0],
        ];
        let g = GramMatrix::from_rows(names(&["a", "b", CONST_COLUMN]), &rows).unwrap();
        assert_eq!(g.get("a", "b").unwrap(), g.get("b", "a").unwrap());
        assert!(g.get("a", "a").unwrap() >= 0.0);
        assert!(g.get("b", "b").unwrap() >= 0.0);
        assert_eq!(g.row_count().unwrap(), 3.0);
    }

    #[test]
    fn accumulate_sums_partitions() {
        let day1 = GramMatrix::from_rows(
            names(&["a", CONST_COLUMN]),
            &[vec![1.0, 1.0], vec![2.0, 1.0]],
        )
        .unwrap();
        let day2 =
            GramMatrix::from_rows(names(&["a", CONST_COLUMN]), &[vec![3.0, 1.0]]).unwrap();
        let mut total = GramMatrix::zeros(names(&["a", CONST_COLUMN])).unwrap();
        total.accumulate(&day1).unwrap();
        total.accumulate(&day2).unwrap();
        assert_eq!(total.get("a", "a").unwrap(), 14.0);
        assert_eq!(total.row_count().unwrap(), 3.0);

        let avg = total.averaged().unwrap();
        assert!((avg.get("a", "a").unwrap() - 14.0 / 3.0).abs() < 1e-12);
        // Raw accumulator untouched
        assert_eq!(total.get("a", "a").unwrap(), 14.0);
    }

    #[test]
    fn restriction_reorders_columns() {
        let g = GramMatrix::from_rows(
            names(&["a", "b", CONST_COLUMN]),
            &[vec![1.0, 2.0, 1.0], vec![4.0, -1.0, 1.0]],
        )
        .unwrap();
        let r = g.restricted(&names(&["b", CONST_COLUMN])).unwrap();
        assert_eq!(r.dim(), 2);
        assert_eq!(r.get("b", "b").unwrap(), g.get("b", "b").unwrap());
        assert!(r.get("a", "a").is_err());
    }

    #[test]
    fn duplicate_names_rejected() {
        assert!(GramMatrix::zeros(names(&["a", "a"])).is_err());
    }
}
