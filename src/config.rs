//! Configuration for tree growth and post-fit processing.

use serde::{Deserialize, Serialize};

/// Parameters controlling tree growth, split acceptance, and the
/// post-growth decay / removal-edge fits.
///
/// These are constructor parameters, not a config file: the caller builds
/// one per fitting run and hands it to [`crate::ImpactTree`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Global significance level for split acceptance. A node's candidate
    /// splits are accepted only below `significance / n_candidates`
    /// (Bonferroni across the per-feature winners).
    pub significance: f64,

    /// Minimum squared-error reduction a split must clear, expressed in
    /// ticks. Enters the paired t-test as `(min_tick_gain * tick_size)^2`.
    pub min_tick_gain: f64,

    /// Round-trip trading fee per contract, in currency units.
    pub trading_fee: f64,

    /// Notional size used to convert removal markups into profit.
    pub notional: f64,

    /// Minimum price increment of the instrument. All tick-gain
    /// normalization uses this unit.
    pub tick_size: f64,

    /// Feature whose full percentile grid is always probed during split
    /// search, regardless of the median-split pruning heuristic.
    pub primary_feature: Option<String>,

    /// Minimum effective size (distinct minute buckets, strict) required
    /// on both sides of a candidate split.
    pub min_effective_size: usize,

    /// Number of cross-validation folds for impact-model fits.
    pub cv_folds: usize,

    /// Rows with more quotes since the last trade than this are excluded
    /// from the decay-length fit.
    pub decay_max_quotes: f64,

    /// Minimum `time_to_tick` for a trade to count as a removal candidate.
    pub removal_min_time_to_tick: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            significance: 0.05,
            min_tick_gain: 0.01,
            trading_fee: 0.24,
            notional: 200_000.0,
            tick_size: 1.0 / 128.0,
            primary_feature: Some("TradeSize".to_string()),
            min_effective_size: 100,
            cv_folds: 2,
            decay_max_quotes: 500.0,
            removal_min_time_to_tick: 20_000.0,
        }
    }
}

impl TreeConfig {
    /// Squared-error reduction threshold used by the split t-test.
    pub(crate) fn min_sqr_reduction(&self) -> f64 {
        (self.min_tick_gain * self.tick_size).powi(2)
    }
}
