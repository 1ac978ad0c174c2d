//! Integration tests for the full fitting pipeline.
//!
//! These exercise the pieces together rather than in isolation:
//! - tree growth on a noisy synthetic stream with a known regime split
//! - serialization idempotence and node-id ordering
//! - determinism of repeated fits on the same data
//! - signal selection against a Gram matrix built from raw rows

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};

use crate::{
    sigmoid, ActiveSetNnls, GramMatrix, ImpactTree, ObservationTable, TreeConfig, CONST_COLUMN,
};

const TICK: f64 = 1.0 / 128.0;

/// One trade per minute. Impact scale depends only on the sign of the
/// book imbalance, so the tree has a single clean split to find, buried
/// under small gaussian noise.
fn noisy_regime_table(minutes: usize, seed: u64) -> ObservationTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let size_dist = LogNormal::<f64>::new(1.0, 0.8).unwrap();
    let noise = Normal::new(0.0, 0.001).unwrap();

    let n = minutes;
    let mut ts = Vec::with_capacity(n);
    let mut sizes = Vec::with_capacity(n);
    let mut imbalance = Vec::with_capacity(n);
    let mut markup = Vec::with_capacity(n);
    let theo = 100.0;
    for minute in 0..n {
        let imb: f64 = rng.gen_range(-1.0..1.0);
        let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let magnitude = size_dist.sample(&mut rng).round().max(1.0);
        let size = sign * magnitude;
        let scale = if imb < 0.0 { 2.0 } else { 10.0 };
        let impulse = scale * TICK * sigmoid(size, 5.0);
        ts.push(minute as u64 * 60_000);
        sizes.push(size);
        imbalance.push(imb);
        markup.push(theo + impulse + noise.sample(&mut rng));
    }
    ObservationTable::new(
        ts,
        sizes,
        vec![0.0; n],
        vec![true; n],
        vec![theo; n],
        vec![30_000.0; n],
    )
    .unwrap()
    .with_column("BookImbalance", imbalance)
    .unwrap()
    .with_column("Theo", vec![theo; n])
    .unwrap()
    .with_column("Markup", markup)
    .unwrap()
}

fn pipeline_config() -> TreeConfig {
    TreeConfig {
        min_effective_size: 50,
        primary_feature: None,
        ..TreeConfig::default()
    }
}

fn fit_tree(table: &ObservationTable) -> ImpactTree<'_> {
    let mut tree = ImpactTree::new(
        table,
        vec!["BookImbalance".to_string()],
        "Theo",
        "Markup",
        pipeline_config(),
    )
    .unwrap();
    tree.grow().unwrap();
    tree
}

#[test]
fn pipeline_recovers_imbalance_regimes_under_noise() {
    let table = noisy_regime_table(600, 7);
    let tree = fit_tree(&table);

    assert!(tree.nodes().len() >= 3, "no split found");
    let root_split = tree.nodes()[0].split.as_ref().unwrap();
    assert_eq!(root_split.feature, "BookImbalance");
    assert!(
        root_split.threshold.abs() < 0.6,
        "threshold {} far from regime boundary",
        root_split.threshold
    );

    // The two sides of the root must carry clearly different impact
    // scales at a representative size.
    let left = tree.nodes()[1].model.apply(8.0);
    let right = tree.nodes()[2].model.apply(8.0);
    let (low, high) = if left < right { (left, right) } else { (right, left) };
    assert!(high > 2.0 * low, "regimes not separated: {low} vs {high}");
}

#[test]
fn node_ids_are_insertion_ordered() {
    let table = noisy_regime_table(600, 7);
    let mut tree = fit_tree(&table);
    tree.fit_node_decays().unwrap();
    tree.validate().unwrap();
    for (i, node) in tree.nodes().iter().enumerate() {
        assert_eq!(node.id, i);
        if let (Some(l), Some(r)) = (node.left, node.right) {
            assert!(l > i && r > i);
        }
    }
}

#[test]
fn serialization_is_idempotent() {
    let table = noisy_regime_table(600, 7);
    let mut tree = fit_tree(&table);
    tree.fit_node_decays().unwrap();
    let signals = HashMap::from([
        ("Theo".to_string(), 0i64),
        ("BookImbalance".to_string(), 1),
    ]);
    let first = tree.serialize(&signals).unwrap();
    let second = tree.serialize(&signals).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.feature.len() + 1, first.stretch.len());
    assert_eq!(first.stretch.len(), first.rem_allowed.len());
}

#[test]
fn repeated_fits_are_deterministic() {
    let table = noisy_regime_table(400, 11);
    let a = fit_tree(&table);
    let b = fit_tree(&table);
    assert_eq!(a.nodes().len(), b.nodes().len());
    for (na, nb) in a.nodes().iter().zip(b.nodes().iter()) {
        assert_eq!(na.size(), nb.size());
        match (&na.split, &nb.split) {
            (Some(sa), Some(sb)) => {
                assert_eq!(sa.feature, sb.feature);
                assert_eq!(sa.threshold, sb.threshold);
            }
            (None, None) => {}
            _ => panic!("tree structures diverged at node {}", na.id),
        }
    }
}

#[test]
fn signal_selection_finds_the_true_signal_from_raw_rows() {
    let mut rng = StdRng::seed_from_u64(3);
    let noise = Normal::new(0.0, 0.05).unwrap();

    let names: Vec<String> = ["alpha", "beta", CONST_COLUMN, "mkp"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    // Antithetic pairs keep each signal's sample mean exactly zero, so
    // the const-fold regularization cannot leak into the signal rows.
    let mut rows = Vec::with_capacity(4000);
    for _ in 0..2000 {
        let alpha: f64 = rng.gen_range(-1.0..1.0);
        let beta: f64 = rng.gen_range(-1.0..1.0);
        rows.push(vec![alpha, beta, 1.0, 0.6 * alpha + noise.sample(&mut rng)]);
        rows.push(vec![-alpha, -beta, 1.0, -0.6 * alpha + noise.sample(&mut rng)]);
    }
    let gram = GramMatrix::from_rows(names, &rows).unwrap().averaged().unwrap();

    let mut solver = ActiveSetNnls::new(
        &gram,
        &["alpha".to_string(), "beta".to_string()],
        &[CONST_COLUMN.to_string()],
        "mkp",
    )
    .unwrap();
    let fit = solver.fit().unwrap();

    // The driving signal is admitted first and keeps the dominant share
    // of the (anchor-shrunk) coefficient mass.
    assert_eq!(fit.selected.first().map(String::as_str), Some("alpha"));
    let alpha = fit.coefficient("alpha").unwrap();
    let beta = fit.coefficient("beta").unwrap();
    assert!(alpha > 0.0, "alpha = {alpha}");
    assert!(beta >= 0.0, "beta = {beta}");
    assert!(alpha > beta, "alpha ({alpha}) should dominate beta ({beta})");
}
