//! Regression tree over contextual features with an impact curve at every
//! node.
//!
//! Growth is strictly greedy: every inserted node immediately searches for
//! its best candidate split, and each iteration applies the single
//! highest-test-gain split among all current leaves. Child candidates are
//! computed on the actual partitioned data after the split is applied, so
//! there is no lookahead queue to maintain.
//!
//! Nodes live in an insertion-ordered arena; parent/child links are plain
//! indices and `node_id` equals arena position, which the serializer
//! re-verifies before emitting anything.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TreeConfig;
use crate::errors::{FitError, Result};
use crate::impact::ImpactModel;
use crate::numeric;
use crate::schema::ObservationTable;
use crate::sigmoid::sigmoid;
use crate::split::{tick_gain, Split, SplitContext};

/// Percentile grid probed around the median during split search.
const PROBE_PERCENTILES: [f64; 8] = [10.0, 20.0, 30.0, 40.0, 60.0, 70.0, 80.0, 90.0];

/// Decay-length grid: ~20 log2-spaced integers in [4, 256].
const DECAY_GRID_POINTS: usize = 20;

/// One arena node: a partition of the tree's trade rows.
#[derive(Debug, Clone)]
pub struct Node {
    /// Position in the tree's insertion-ordered node list.
    pub id: usize,
    pub parent: Option<usize>,
    pub left: Option<usize>,
    pub right: Option<usize>,
    /// Positions into the tree's trade-row arrays (a view, not a copy).
    pub(crate) rows: Vec<usize>,
    pub model: ImpactModel,
    /// The applied split, once this node becomes internal.
    pub split: Option<Split>,
    /// Best pending candidate found at insertion; `None` when no viable
    /// split exists.
    pub best_split: Option<Split>,
    /// Fitted exponential decay length (post-growth).
    pub decay_length: Option<u64>,
    effective_size: usize,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Distinct minute buckets in this node's rows.
    pub fn effective_size(&self) -> usize {
        self.effective_size
    }
}

/// Per-leaf removal-edge diagnostics retained after
/// [`ImpactTree::determine_removal_leaves`].
#[derive(Debug, Clone)]
pub struct RemovalLeafSummary {
    pub node_id: usize,
    /// Edge threshold at the cumulative-profit maximum.
    pub min_edge_to_remove: f64,
    /// Cumulative profit at that threshold.
    pub profit_at_edge: f64,
    /// Number of removal-candidate trades in the leaf.
    pub candidate_count: usize,
    /// Trades at or above the chosen edge.
    pub removal_count: usize,
}

/// Forward-filled forecast columns over the full event table.
#[derive(Debug, Clone)]
pub(crate) struct ForecastColumns {
    pub node_id: Vec<Option<usize>>,
    pub forecast: Vec<f64>,
    pub target: Vec<f64>,
}

/// The fitted tree. Holds read-only views into the observation table and
/// owns the node arena.
pub struct ImpactTree<'a> {
    table: &'a ObservationTable,
    features: Vec<String>,
    base_theo: String,
    markup: String,
    config: TreeConfig,
    /// Table rows flagged as trades, in table order.
    trade_rows: Vec<usize>,
    /// Aligned with `trade_rows`.
    sizes: Vec<f64>,
    markups: Vec<f64>,
    minutes: Vec<u64>,
    nodes: Vec<Node>,
    forecasts: Option<ForecastColumns>,
    rem_allowed: Option<Vec<bool>>,
    removal_summary: Vec<RemovalLeafSummary>,
}

impl<'a> ImpactTree<'a> {
    /// Bind a tree to its data. Columns are validated here; the root fit
    /// happens in [`Self::grow`].
    pub fn new(
        table: &'a ObservationTable,
        features: Vec<String>,
        base_theo: impl Into<String>,
        markup: impl Into<String>,
        config: TreeConfig,
    ) -> Result<Self> {
        let base_theo = base_theo.into();
        let markup = markup.into();
        table.require_columns(features.iter().map(String::as_str))?;
        table.require_columns([base_theo.as_str(), markup.as_str()])?;

        let trade_rows = table.trade_rows();
        if trade_rows.is_empty() {
            return Err(FitError::EmptyData("no trade rows in table".into()));
        }
        let size_col = table.signed_trade_size();
        let markup_col = table.column(&markup)?;
        let theo_col = table.column(&base_theo)?;
        let sizes: Vec<f64> = trade_rows.iter().map(|&r| size_col[r]).collect();
        let markups: Vec<f64> = trade_rows
            .iter()
            .map(|&r| markup_col[r] - theo_col[r])
            .collect();
        let minutes: Vec<u64> = trade_rows.iter().map(|&r| table.minute(r)).collect();

        Ok(Self {
            table,
            features,
            base_theo,
            markup,
            config,
            trade_rows,
            sizes,
            markups,
            minutes,
            nodes: Vec::new(),
            forecasts: None,
            rem_allowed: None,
            removal_summary: Vec::new(),
        })
    }

    /// Fit the root model and grow greedily until no leaf has a viable
    /// split.
    pub fn grow(&mut self) -> Result<()> {
        if self.nodes.is_empty() {
            let model = ImpactModel::fit(&self.sizes, &self.markups, self.config.cv_folds)?;
            info!(
                rows = self.sizes.len(),
                test_rmse = model.test_rmse,
                "root model fitted"
            );
            let rows: Vec<usize> = (0..self.sizes.len()).collect();
            self.insert_node(rows, None, model)?;
        }

        while let Some(node_id) = self.find_node_to_split() {
            self.apply_split(node_id)?;
            info!(
                score = self.score(),
                tick_gain = self.total_tick_gain(),
                leaves = self.leaf_ids().len(),
                "split applied"
            );
        }
        info!(nodes = self.nodes.len(), "tree growth finished");
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Arena ids of internal nodes, in insertion order.
    pub fn split_ids(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| !n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// Arena ids of leaves, in insertion order.
    pub fn leaf_ids(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// Sum of applied splits' test-SSE gains.
    pub fn score(&self) -> f64 {
        self.nodes
            .iter()
            .filter_map(|n| n.split.as_ref())
            .map(|s| s.test_sse_gain)
            .sum()
    }

    /// Tree-level tick gain over all trade rows.
    pub fn total_tick_gain(&self) -> f64 {
        tick_gain(self.score(), self.trade_rows.len(), self.config.tick_size)
    }

    /// Per-feature usage: (feature, split count, accumulated test gain),
    /// sorted by gain descending.
    pub fn feature_scores(&self) -> Vec<(String, usize, f64)> {
        let mut scores: Vec<(String, usize, f64)> = Vec::new();
        for split in self.nodes.iter().filter_map(|n| n.split.as_ref()) {
            match scores.iter_mut().find(|(f, _, _)| *f == split.feature) {
                Some((_, count, gain)) => {
                    *count += 1;
                    *gain += split.test_sse_gain;
                }
                None => scores.push((split.feature.clone(), 1, split.test_sse_gain)),
            }
        }
        scores.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scores
    }

    /// Walk from the root to the leaf selecting on feature values.
    pub fn leaf_for(&self, mut value_of: impl FnMut(&str) -> f64) -> Result<usize> {
        if self.nodes.is_empty() {
            return Err(FitError::InvalidTree("tree has not been grown".into()));
        }
        let mut id = 0;
        while let Some(split) = &self.nodes[id].split {
            let next = if value_of(&split.feature) < split.threshold {
                self.nodes[id].left
            } else {
                self.nodes[id].right
            };
            id = next.ok_or_else(|| {
                FitError::InvalidTree(format!("internal node {id} is missing a child"))
            })?;
        }
        Ok(id)
    }

    /// Leaf impulse for a signed trade size under the given feature values.
    pub fn predict(&self, value_of: impl FnMut(&str) -> f64, signed_size: f64) -> Result<f64> {
        let leaf = self.leaf_for(value_of)?;
        Ok(self.nodes[leaf].model.apply(signed_size))
    }

    pub fn removal_summary(&self) -> &[RemovalLeafSummary] {
        &self.removal_summary
    }

    // ------------------------------------------------------------------
    // Growth internals
    // ------------------------------------------------------------------

    fn insert_node(
        &mut self,
        rows: Vec<usize>,
        parent: Option<usize>,
        model: ImpactModel,
    ) -> Result<usize> {
        let best_split = self.compute_best_split(&rows, &model)?;
        let effective_size = self.effective_size(&rows);
        let id = self.nodes.len();
        debug!(
            id,
            size = rows.len(),
            effective_size,
            has_candidate = best_split.is_some(),
            "node inserted"
        );
        self.nodes.push(Node {
            id,
            parent,
            left: None,
            right: None,
            rows,
            model,
            split: None,
            best_split,
            decay_length: None,
            effective_size,
        });
        Ok(id)
    }

    fn effective_size(&self, rows: &[usize]) -> usize {
        let table_rows: Vec<usize> = rows.iter().map(|&r| self.trade_rows[r]).collect();
        self.table.effective_size(&table_rows)
    }

    /// Search all features for this node's best candidate split, then
    /// apply the multiple-selection significance filter across the
    /// per-feature winners.
    fn compute_best_split(&self, rows: &[usize], model: &ImpactModel) -> Result<Option<Split>> {
        let sizes: Vec<f64> = rows.iter().map(|&r| self.sizes[r]).collect();
        let markups: Vec<f64> = rows.iter().map(|&r| self.markups[r]).collect();
        let minutes: Vec<u64> = rows.iter().map(|&r| self.minutes[r]).collect();
        let ctx = SplitContext {
            rows,
            sizes: &sizes,
            markups: &markups,
            minutes: &minutes,
            parent: model,
            config: &self.config,
        };

        let mut best_per_feature: Vec<Split> = Vec::with_capacity(self.features.len());
        let mut max_half_score = 0.0f64;
        for feature in &self.features {
            let column = self.table.column(feature)?;
            let values: Vec<f64> = rows
                .iter()
                .map(|&r| column[self.trade_rows[r]])
                .collect();

            let half_threshold = numeric::percentile(&values, 50.0)?;
            let half = Split::evaluate(&ctx, feature, half_threshold, &values)?;
            max_half_score = max_half_score.max(half.test_sse_gain);

            // Probe the full percentile grid only when the median split
            // clears half the best median gain seen so far, or for the
            // designated primary feature.
            let probe = half.test_sse_gain > max_half_score / 2.0
                || self.config.primary_feature.as_deref() == Some(feature.as_str());
            let mut best = half;
            if probe {
                let mut thresholds: Vec<f64> = PROBE_PERCENTILES
                    .iter()
                    .map(|&q| numeric::percentile(&values, q))
                    .collect::<Result<_>>()?;
                thresholds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                thresholds.dedup();
                for threshold in thresholds {
                    let candidate = Split::evaluate(&ctx, feature, threshold, &values)?;
                    if candidate.train_sse_gain > best.train_sse_gain {
                        best = candidate;
                    }
                }
            }
            debug!(
                feature = %best.feature,
                threshold = best.threshold,
                train_gain = best.train_sse_gain,
                test_gain = best.test_sse_gain,
                tick_gain = best.tick_gain,
                p_value = best.p_value,
                "feature winner"
            );
            best_per_feature.push(best);
        }

        let n = best_per_feature.len();
        if n == 0 {
            return Ok(None);
        }
        // Bonferroni across the per-feature winners; among significant
        // candidates the highest test gain wins.
        let cutoff = self.config.significance / n as f64;
        best_per_feature.sort_by(|a, b| {
            a.test_sse_gain
                .partial_cmp(&b.test_sse_gain)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut chosen: Option<Split> = None;
        for split in best_per_feature {
            if split.p_value < cutoff {
                chosen = Some(split);
            }
        }
        if let Some(split) = &chosen {
            debug!(
                feature = %split.feature,
                threshold = split.threshold,
                tick_gain = split.tick_gain,
                p_value = split.p_value,
                "significant candidate selected"
            );
        } else {
            debug!("no significant split for node");
        }
        Ok(chosen)
    }

    /// The leaf with the highest pending test gain, if any. First wins on
    /// exact ties, keeping growth deterministic.
    fn find_node_to_split(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for node in &self.nodes {
            if !node.is_leaf() {
                continue;
            }
            if let Some(split) = &node.best_split {
                match best {
                    Some((_, gain)) if split.test_sse_gain <= gain => {}
                    _ => best = Some((node.id, split.test_sse_gain)),
                }
            }
        }
        best.map(|(id, _)| id)
    }

    /// Promote a node's pending candidate to its applied split and insert
    /// both children (each immediately evaluated for its own candidate).
    fn apply_split(&mut self, node_id: usize) -> Result<()> {
        let mut split = self.nodes[node_id].best_split.take().ok_or_else(|| {
            FitError::InvalidTree(format!("node {node_id} has no pending split"))
        })?;
        let left_model = split
            .left_model
            .take()
            .ok_or_else(|| FitError::InvalidTree("applying an infeasible split".into()))?;
        let right_model = split
            .right_model
            .take()
            .ok_or_else(|| FitError::InvalidTree("applying an infeasible split".into()))?;
        let left_rows = std::mem::take(&mut split.left_rows);
        let right_rows = std::mem::take(&mut split.right_rows);

        info!(
            node = node_id,
            feature = %split.feature,
            threshold = split.threshold,
            train_gain = split.train_sse_gain,
            test_gain = split.test_sse_gain,
            tick_gain = split.tick_gain,
            p_value = split.p_value,
            left = left_rows.len(),
            right = right_rows.len(),
            "splitting node"
        );

        self.nodes[node_id].split = Some(split);
        let left_id = self.insert_node(left_rows, Some(node_id), left_model)?;
        let right_id = self.insert_node(right_rows, Some(node_id), right_model)?;
        self.nodes[node_id].left = Some(left_id);
        self.nodes[node_id].right = Some(right_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Post-growth processing
    // ------------------------------------------------------------------

    /// Write per-leaf forecasts into full-table columns and forward-fill
    /// across rows without fresh trade forecasts.
    fn append_forecasts(&mut self) -> Result<()> {
        let n = self.table.len();
        let theo = self.table.column(&self.base_theo)?;
        let markup_col = self.table.column(&self.markup)?;

        let mut node_id: Vec<Option<usize>> = vec![None; n];
        let mut forecast = vec![f64::NAN; n];
        let mut target = vec![f64::NAN; n];

        for leaf in self.leaf_ids() {
            for &pos in &self.nodes[leaf].rows {
                let row = self.trade_rows[pos];
                let impulse = self.nodes[leaf].model.apply(self.sizes[pos]);
                node_id[row] = Some(leaf);
                forecast[row] = theo[row] + impulse;
                target[row] = markup_col[row];
            }
        }

        // Forward fill
        let mut last_node = None;
        let mut last_forecast = f64::NAN;
        let mut last_target = f64::NAN;
        for row in 0..n {
            match node_id[row] {
                Some(id) => {
                    last_node = Some(id);
                    last_forecast = forecast[row];
                    last_target = target[row];
                }
                None => {
                    node_id[row] = last_node;
                    forecast[row] = last_forecast;
                    target[row] = last_target;
                }
            }
        }

        self.forecasts = Some(ForecastColumns {
            node_id,
            forecast,
            target,
        });
        Ok(())
    }

    /// Fit each leaf's exponential decay length by grid search: minimize
    /// the SSE of `alpha * forecast + (1 - alpha) * theo` against the
    /// forward-filled target, with `alpha = ((L-1)/L)^quotes`.
    pub fn fit_node_decays(&mut self) -> Result<()> {
        if self.forecasts.is_none() {
            self.append_forecasts()?;
        }
        let lengths = numeric::log2_spaced_ints(2.0, 8.0, DECAY_GRID_POINTS);
        let theo = self.table.column(&self.base_theo)?;
        let quotes = self.table.quotes_since_last_trade();
        let forecasts = self
            .forecasts
            .as_ref()
            .ok_or_else(|| FitError::InvalidTree("forecast columns missing".into()))?;

        let mut fitted: Vec<(usize, u64)> = Vec::new();
        for leaf in self.leaf_ids() {
            let rows: Vec<usize> = (0..self.table.len())
                .filter(|&r| {
                    forecasts.node_id[r] == Some(leaf) && quotes[r] < self.config.decay_max_quotes
                })
                .collect();

            let mut best: Option<(f64, u64)> = None;
            for &length in &lengths {
                let rate = (length as f64 - 1.0) / length as f64;
                let sse: f64 = rows
                    .iter()
                    .map(|&r| {
                        let alpha = rate.powf(quotes[r]);
                        let estimate =
                            alpha * forecasts.forecast[r] + (1.0 - alpha) * theo[r];
                        let err = estimate - forecasts.target[r];
                        err * err
                    })
                    .sum();
                match best {
                    Some((best_sse, _)) if sse >= best_sse => {}
                    _ => best = Some((sse, length)),
                }
            }
            let (sse, length) = best
                .ok_or_else(|| FitError::Numeric("empty decay-length grid".into()))?;
            debug!(leaf, length, sse, rows = rows.len(), "decay fitted");
            fitted.push((leaf, length));
        }
        for (leaf, length) in fitted {
            self.nodes[leaf].decay_length = Some(length);
        }
        Ok(())
    }

    /// Mark leaves where early order removal is net-profitable: per leaf,
    /// scan removal candidates in decreasing forecast-edge order and keep
    /// the cumulative-profit maximum; the leaf qualifies iff it is
    /// positive.
    pub fn determine_removal_leaves(&mut self) -> Result<()> {
        if self.forecasts.is_none() {
            self.append_forecasts()?;
        }
        let markup_col = self.table.column(&self.markup)?;
        let avg_price = self.table.avg_trade_price();
        let time_to_tick = self.table.time_to_tick();
        let forecasts = self
            .forecasts
            .as_ref()
            .ok_or_else(|| FitError::InvalidTree("forecast columns missing".into()))?;

        let leaf_ids = self.leaf_ids();
        let mut rem_allowed = vec![false; leaf_ids.len()];
        let mut summaries = Vec::new();

        for (leaf_index, &leaf) in leaf_ids.iter().enumerate() {
            // (edge, profit) for removal-candidate trades in this leaf
            let mut candidates: Vec<(f64, f64)> = Vec::new();
            for &pos in &self.nodes[leaf].rows {
                let row = self.trade_rows[pos];
                let sign = numeric::sign(self.sizes[pos]);
                let edge = sign * (forecasts.forecast[row] - avg_price[row]);
                if time_to_tick[row] <= self.config.removal_min_time_to_tick || edge <= 0.0 {
                    continue;
                }
                let removal_markup = sign * (markup_col[row] - avg_price[row]);
                let profit =
                    removal_markup * self.config.notional / 100.0 - self.config.trading_fee;
                candidates.push((edge, profit));
            }
            if candidates.is_empty() {
                continue;
            }
            candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut cumulative = 0.0;
            let mut best_profit = f64::NEG_INFINITY;
            let mut best_edge = 0.0;
            for &(edge, profit) in &candidates {
                cumulative += profit;
                if cumulative > best_profit {
                    best_profit = cumulative;
                    best_edge = edge;
                }
            }
            let removal_count = candidates.iter().filter(|&&(e, _)| e >= best_edge).count();
            rem_allowed[leaf_index] = best_profit > 0.0;
            summaries.push(RemovalLeafSummary {
                node_id: leaf,
                min_edge_to_remove: best_edge,
                profit_at_edge: best_profit,
                candidate_count: candidates.len(),
                removal_count,
            });
            debug!(
                leaf,
                edge = best_edge,
                profit = best_profit,
                candidates = candidates.len(),
                allowed = rem_allowed[leaf_index],
                "removal edge determined"
            );
        }

        self.rem_allowed = Some(rem_allowed);
        self.removal_summary = summaries;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation and serialization
    // ------------------------------------------------------------------

    /// Structural consistency check; must pass before serialization.
    pub fn validate(&self) -> Result<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id != i {
                return Err(FitError::InvalidTree(format!(
                    "node id {} inconsistent with arena position {i}",
                    node.id
                )));
            }
            match (&node.split, node.left, node.right) {
                (Some(_), Some(l), Some(r)) => {
                    if l <= i || r <= i {
                        return Err(FitError::InvalidTree(format!(
                            "children of node {i} do not follow it in insertion order"
                        )));
                    }
                }
                (None, None, None) => {
                    if node.decay_length.is_none() {
                        return Err(FitError::InvalidTree(format!(
                            "leaf {i} is missing its decay fit"
                        )));
                    }
                }
                _ => {
                    return Err(FitError::InvalidTree(format!(
                        "node {i} is neither a leaf nor a two-child internal node"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Emit the downstream parameter record. `signals` maps every split
    /// feature name and the baseline theo to its wire id.
    ///
    /// Requires decay fits; removal determination runs on demand.
    pub fn serialize(&mut self, signals: &HashMap<String, i64>) -> Result<TreeParams> {
        if self.rem_allowed.is_none() {
            self.determine_removal_leaves()?;
        }
        self.validate()?;

        let signal_id = |name: &str| -> Result<i64> {
            signals
                .get(name)
                .copied()
                .ok_or_else(|| FitError::UnknownSignal(name.to_string()))
        };

        let split_ids = self.split_ids();
        let leaf_ids = self.leaf_ids();
        let split_pos: HashMap<usize, usize> =
            split_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let leaf_pos: HashMap<usize, usize> =
            leaf_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let child_code = |child: usize| -> Result<i64> {
            if let Some(&i) = split_pos.get(&child) {
                Ok(i as i64)
            } else if let Some(&i) = leaf_pos.get(&child) {
                // Leaves are flagged by negation; a code of 0 is a leaf,
                // since the root split can never be anyone's child.
                Ok(-(i as i64))
            } else {
                Err(FitError::InvalidTree(format!("dangling child id {child}")))
            }
        };

        let mut feature = Vec::with_capacity(split_ids.len());
        let mut threshold = Vec::with_capacity(split_ids.len());
        let mut left_idx = Vec::with_capacity(split_ids.len());
        let mut right_idx = Vec::with_capacity(split_ids.len());
        for &id in &split_ids {
            let node = &self.nodes[id];
            let split = node
                .split
                .as_ref()
                .ok_or_else(|| FitError::InvalidTree(format!("node {id} lost its split")))?;
            feature.push(signal_id(&split.feature)?);
            threshold.push(split.threshold);
            let (l, r) = match (node.left, node.right) {
                (Some(l), Some(r)) => (l, r),
                _ => {
                    return Err(FitError::InvalidTree(format!(
                        "internal node {id} is missing children"
                    )))
                }
            };
            left_idx.push(child_code(l)?);
            right_idx.push(child_code(r)?);
        }

        let mut stretch = Vec::with_capacity(leaf_ids.len());
        let mut coeff = Vec::with_capacity(leaf_ids.len());
        let mut decay = Vec::with_capacity(leaf_ids.len());
        let mut rmse = Vec::with_capacity(leaf_ids.len());
        for &id in &leaf_ids {
            let node = &self.nodes[id];
            stretch.push(node.model.positive_stretches());
            coeff.push(node.model.positive_coeffs());
            let length = node.decay_length.ok_or_else(|| {
                FitError::InvalidTree(format!("leaf {id} is missing its decay fit"))
            })? as f64;
            decay.push((length - 1.0) / length);
            rmse.push(node.model.test_rmse);
        }

        let rem_allowed = self
            .rem_allowed
            .clone()
            .ok_or_else(|| FitError::InvalidTree("removal leaves undetermined".into()))?;

        Ok(TreeParams {
            base_theo: signal_id(&self.base_theo)?,
            feature,
            threshold,
            left_idx,
            right_idx,
            stretch,
            coeff,
            decay,
            rmse,
            rem_allowed,
            model_type: TreeParams::MODEL_TYPE.to_string(),
        })
    }
}

/// Serialized tree parameters in the downstream consumer's layout: split
/// arrays are parallel over internal nodes, leaf arrays over leaves, and
/// child codes index splits when positive and leaves (negated) otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    #[serde(rename = "base_theo_")]
    pub base_theo: i64,
    #[serde(rename = "feature_")]
    pub feature: Vec<i64>,
    #[serde(rename = "threshold_")]
    pub threshold: Vec<f64>,
    #[serde(rename = "left_idx_")]
    pub left_idx: Vec<i64>,
    #[serde(rename = "right_idx_")]
    pub right_idx: Vec<i64>,
    #[serde(rename = "stretch_")]
    pub stretch: Vec<Vec<i64>>,
    #[serde(rename = "coeff_")]
    pub coeff: Vec<Vec<f64>>,
    #[serde(rename = "decay_")]
    pub decay: Vec<f64>,
    #[serde(rename = "rmse_")]
    pub rmse: Vec<f64>,
    #[serde(rename = "rem_allowed_")]
    pub rem_allowed: Vec<bool>,
    #[serde(rename = "type")]
    pub model_type: String,
}

impl TreeParams {
    pub const MODEL_TYPE: &'static str = "TreeSVDynamicEdge2";

    /// Traverse the flattened tree to a leaf index. `value_of` resolves a
    /// feature id to its current value.
    pub fn leaf_for(&self, mut value_of: impl FnMut(i64) -> f64) -> usize {
        if self.feature.is_empty() {
            return 0;
        }
        let mut idx = 0usize;
        loop {
            let code = if value_of(self.feature[idx]) < self.threshold[idx] {
                self.left_idx[idx]
            } else {
                self.right_idx[idx]
            };
            if code > 0 {
                idx = code as usize;
            } else {
                return (-code) as usize;
            }
        }
    }

    /// Leaf impulse: the serialized sigmoid curve at a signed trade size.
    pub fn impulse(&self, leaf: usize, signed_size: f64) -> f64 {
        self.stretch[leaf]
            .iter()
            .zip(&self.coeff[leaf])
            .map(|(&c, &b)| sigmoid(signed_size, c as f64) * b)
            .sum()
    }

    /// Decay weight of a leaf's forecast after `quotes` quote events.
    pub fn decay_weight(&self, leaf: usize, quotes: f64) -> f64 {
        self.decay[leaf].powf(quotes)
    }
}
