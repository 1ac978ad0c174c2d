//! Observation table: the named, typed column store the fitters run on.
//!
//! Data loading (CSV/Parquet, caching) lives outside this crate; callers
//! hand over fully materialized columns. The schema is validated once at
//! construction so the fitting pipeline can use typed accessors without
//! per-row checks.

use std::collections::{HashMap, HashSet};

use crate::errors::{FitError, Result};

/// Milliseconds per minute bucket; effective-size counting collapses
/// observations that land in the same bucket.
const MINUTE_MS: u64 = 60_000;

/// Column-major tick-event table for a single instrument.
///
/// Required typed columns are fields; markups, the baseline theo, and the
/// split features are free-form named f64 columns.
#[derive(Debug, Clone)]
pub struct ObservationTable {
    n_rows: usize,
    ts_ms: Vec<u64>,
    signed_trade_size: Vec<f64>,
    quotes_since_last_trade: Vec<f64>,
    is_trade: Vec<bool>,
    avg_trade_price: Vec<f64>,
    time_to_tick: Vec<f64>,
    columns: HashMap<String, Vec<f64>>,
}

impl ObservationTable {
    /// Build a table from the required typed columns. All vectors must have
    /// equal length.
    pub fn new(
        ts_ms: Vec<u64>,
        signed_trade_size: Vec<f64>,
        quotes_since_last_trade: Vec<f64>,
        is_trade: Vec<bool>,
        avg_trade_price: Vec<f64>,
        time_to_tick: Vec<f64>,
    ) -> Result<Self> {
        let n_rows = ts_ms.len();
        check_len("SignedTradeSize", signed_trade_size.len(), n_rows)?;
        check_len(
            "QuotesSinceLastTrade",
            quotes_since_last_trade.len(),
            n_rows,
        )?;
        check_len("isTrade", is_trade.len(), n_rows)?;
        check_len("AvgTradePrice", avg_trade_price.len(), n_rows)?;
        check_len("time_to_tick", time_to_tick.len(), n_rows)?;
        Ok(Self {
            n_rows,
            ts_ms,
            signed_trade_size,
            quotes_since_last_trade,
            is_trade,
            avg_trade_price,
            time_to_tick,
            columns: HashMap::new(),
        })
    }

    /// Attach a named f64 column (markup, theo, or split feature).
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        check_len(&name, values.len(), self.n_rows)?;
        self.columns.insert(name, values);
        Ok(self)
    }

    /// Verify that every named column in `names` is present.
    pub fn require_columns<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            if !self.columns.contains_key(name) {
                return Err(FitError::MissingColumn(name.to_string()));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| FitError::MissingColumn(name.to_string()))
    }

    pub fn ts_ms(&self) -> &[u64] {
        &self.ts_ms
    }

    pub fn signed_trade_size(&self) -> &[f64] {
        &self.signed_trade_size
    }

    pub fn quotes_since_last_trade(&self) -> &[f64] {
        &self.quotes_since_last_trade
    }

    pub fn is_trade(&self) -> &[bool] {
        &self.is_trade
    }

    pub fn avg_trade_price(&self) -> &[f64] {
        &self.avg_trade_price
    }

    pub fn time_to_tick(&self) -> &[f64] {
        &self.time_to_tick
    }

    /// Minute bucket of a row's timestamp.
    pub fn minute(&self, row: usize) -> u64 {
        self.ts_ms[row] / MINUTE_MS
    }

    /// Effective sample size of a row subset: the number of distinct
    /// minute buckets represented. Densely clustered (millisecond-apart)
    /// observations count once.
    pub fn effective_size(&self, rows: &[usize]) -> usize {
        let mut minutes = HashSet::with_capacity(rows.len().min(1024));
        for &r in rows {
            minutes.insert(self.minute(r));
        }
        minutes.len()
    }

    /// Indices of rows flagged as trades.
    pub fn trade_rows(&self) -> Vec<usize> {
        (0..self.n_rows).filter(|&r| self.is_trade[r]).collect()
    }
}

fn check_len(column: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(FitError::LengthMismatch {
            column: column.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(n: usize) -> ObservationTable {
        ObservationTable::new(
            (0..n as u64).map(|i| i * 250).collect(),
            vec![1.0; n],
            vec![0.0; n],
            vec![true; n],
            vec![100.0; n],
            vec![30_000.0; n],
        )
        .unwrap()
    }

    #[test]
    fn rejects_length_mismatch() {
        let err = ObservationTable::new(
            vec![0, 250],
            vec![1.0],
            vec![0.0, 0.0],
            vec![true, false],
            vec![0.0, 0.0],
            vec![0.0, 0.0],
        )
        .unwrap_err();
        assert!(matches!(err, FitError::LengthMismatch { .. }));

        let err = table(4).with_column("Midpt", vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, FitError::LengthMismatch { .. }));
    }

    #[test]
    fn missing_column_is_reported() {
        let t = table(4);
        assert!(matches!(
            t.column("nope"),
            Err(FitError::MissingColumn(_))
        ));
        assert!(t.require_columns(["nope"]).is_err());
    }

    #[test]
    fn effective_size_counts_distinct_minutes() {
        // 4 rows at 250ms spacing share one minute; one more a minute later
        let t = ObservationTable::new(
            vec![0, 250, 500, 750, 61_000],
            vec![1.0; 5],
            vec![0.0; 5],
            vec![true; 5],
            vec![0.0; 5],
            vec![0.0; 5],
        )
        .unwrap();
        assert_eq!(t.effective_size(&[0, 1, 2, 3]), 1);
        assert_eq!(t.effective_size(&[0, 1, 2, 3, 4]), 2);
    }

    #[test]
    fn trade_rows_filters_flag() {
        let t = ObservationTable::new(
            vec![0, 250, 500],
            vec![1.0; 3],
            vec![0.0; 3],
            vec![true, false, true],
            vec![0.0; 3],
            vec![0.0; 3],
        )
        .unwrap();
        assert_eq!(t.trade_rows(), vec![0, 2]);
    }
}
