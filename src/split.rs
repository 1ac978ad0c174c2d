//! Candidate split evaluation: partition a node, fit child impact curves,
//! and test whether the split meaningfully reduces squared error.

use crate::config::TreeConfig;
use crate::errors::Result;
use crate::impact::ImpactModel;
use crate::numeric;

/// Node-local data handed to split evaluation. All slices are aligned with
/// `rows`, which holds tree-level trade-row indices.
pub(crate) struct SplitContext<'a> {
    pub rows: &'a [usize],
    pub sizes: &'a [f64],
    pub markups: &'a [f64],
    pub minutes: &'a [u64],
    pub parent: &'a ImpactModel,
    pub config: &'a TreeConfig,
}

/// A candidate (or applied) binary partition of a node by
/// `feature < threshold` (left) vs `feature >= threshold` (right).
#[derive(Debug, Clone)]
pub struct Split {
    pub feature: String,
    pub threshold: f64,
    /// Tree-level trade-row indices on each side.
    pub(crate) left_rows: Vec<usize>,
    pub(crate) right_rows: Vec<usize>,
    pub(crate) left_model: Option<ImpactModel>,
    pub(crate) right_model: Option<ImpactModel>,
    /// Parent train SSE minus the children's.
    pub train_sse_gain: f64,
    /// Parent out-of-fold SSE minus the children's.
    pub test_sse_gain: f64,
    /// Sign-preserving sqrt-normalized gain, in ticks.
    pub tick_gain: f64,
    /// Per-side test gain vs the parent's errors restricted to that side.
    pub left_test_gain: f64,
    pub right_test_gain: f64,
    pub left_tick_gain: f64,
    pub right_tick_gain: f64,
    /// Paired t statistic of the squared-error reduction.
    pub t_stat: f64,
    /// One-sided p-value; 1.0 for infeasible splits.
    pub p_value: f64,
}

impl Split {
    /// Evaluate one candidate. `values` holds the split feature per row,
    /// aligned with `ctx.rows`. Child models are fit only when both sides
    /// exceed the minimum effective size (distinct minutes, strict);
    /// otherwise the split comes back infeasible with `p_value = 1`.
    pub(crate) fn evaluate(
        ctx: &SplitContext<'_>,
        feature: &str,
        threshold: f64,
        values: &[f64],
    ) -> Result<Split> {
        let n = ctx.rows.len();
        let cfg = ctx.config;
        debug_assert_eq!(values.len(), n);

        let mut left_local = Vec::new();
        let mut right_local = Vec::new();
        for (i, &v) in values.iter().enumerate() {
            if v < threshold {
                left_local.push(i);
            } else {
                right_local.push(i);
            }
        }

        let mut split = Split {
            feature: feature.to_string(),
            threshold,
            left_rows: left_local.iter().map(|&i| ctx.rows[i]).collect(),
            right_rows: right_local.iter().map(|&i| ctx.rows[i]).collect(),
            left_model: None,
            right_model: None,
            train_sse_gain: 0.0,
            test_sse_gain: 0.0,
            tick_gain: 0.0,
            left_test_gain: 0.0,
            right_test_gain: 0.0,
            left_tick_gain: 0.0,
            right_tick_gain: 0.0,
            t_stat: 0.0,
            p_value: 1.0,
        };

        let left_esize = distinct_minutes(ctx.minutes, &left_local);
        let right_esize = distinct_minutes(ctx.minutes, &right_local);
        if left_esize <= cfg.min_effective_size || right_esize <= cfg.min_effective_size {
            return Ok(split);
        }

        let left_model = fit_side(ctx, &left_local)?;
        let right_model = fit_side(ctx, &right_local)?;

        let left_parent_sse = side_sse(&ctx.parent.test_err, &left_local);
        let right_parent_sse = side_sse(&ctx.parent.test_err, &right_local);
        split.left_test_gain = left_parent_sse - left_model.test_sse;
        split.right_test_gain = right_parent_sse - right_model.test_sse;
        split.left_tick_gain = tick_gain(split.left_test_gain, left_local.len(), cfg.tick_size);
        split.right_tick_gain = tick_gain(split.right_test_gain, right_local.len(), cfg.tick_size);

        split.train_sse_gain =
            ctx.parent.train_sse - left_model.train_sse - right_model.train_sse;
        split.test_sse_gain = ctx.parent.test_sse - left_model.test_sse - right_model.test_sse;
        split.tick_gain = tick_gain(split.test_sse_gain, n, cfg.tick_size);

        // Paired one-sided t-test on the per-row squared-error reduction
        // against the minimum-gain threshold.
        let mut split_err = vec![0.0; n];
        for (k, &i) in left_local.iter().enumerate() {
            split_err[i] = left_model.test_err[k];
        }
        for (k, &i) in right_local.iter().enumerate() {
            split_err[i] = right_model.test_err[k];
        }
        let reduction: Vec<f64> = ctx
            .parent
            .test_err
            .iter()
            .zip(&split_err)
            .map(|(p, s)| p * p - s * s)
            .collect();
        let mean = numeric::mean(&reduction);
        let stderr = numeric::population_std(&reduction) / (n as f64).sqrt();
        let numerator = mean - cfg.min_sqr_reduction();
        split.t_stat = if stderr > 0.0 {
            numerator / stderr
        } else if numerator > 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };
        split.p_value = numeric::student_t_sf(split.t_stat, n as f64);

        split.left_model = Some(left_model);
        split.right_model = Some(right_model);
        Ok(split)
    }

    /// A split is viable once child models exist.
    pub fn is_feasible(&self) -> bool {
        self.left_model.is_some() && self.right_model.is_some()
    }

    pub fn left_size(&self) -> usize {
        self.left_rows.len()
    }

    pub fn right_size(&self) -> usize {
        self.right_rows.len()
    }
}

fn fit_side(ctx: &SplitContext<'_>, local: &[usize]) -> Result<ImpactModel> {
    let sizes: Vec<f64> = local.iter().map(|&i| ctx.sizes[i]).collect();
    let markups: Vec<f64> = local.iter().map(|&i| ctx.markups[i]).collect();
    ImpactModel::fit(&sizes, &markups, ctx.config.cv_folds)
}

fn side_sse(test_err: &[f64], local: &[usize]) -> f64 {
    local.iter().map(|&i| test_err[i] * test_err[i]).sum()
}

/// Sign-preserving sqrt-normalized gain, in ticks.
pub(crate) fn tick_gain(gain: f64, n: usize, tick_size: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    gain.signum() * (gain.abs() / n as f64).sqrt() / tick_size
}

fn distinct_minutes(minutes: &[u64], local: &[usize]) -> usize {
    let mut seen: Vec<u64> = local.iter().map(|&i| minutes[i]).collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}
