//! Impact Tree Fitting Report
//!
//! Fits an impact tree on a synthetic tick stream and prints the fitted
//! structure plus the serialized parameter record the trading system
//! would load. Useful for eyeballing split selection, decay fits, and
//! removal-edge determination without wiring up real market data.
//!
//! Usage:
//!   tree_report [OPTIONS]
//!
//! Options:
//!   --minutes <N>      Minutes of synthetic data to generate (default: 3000)
//!   --seed <N>         RNG seed (default: 42)
//!   --output <FILE>    Write the serialized parameters as JSON
//!
//! Example:
//!   tree_report --minutes 5000 --output params.json

use std::collections::HashMap;
use std::fs;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use impact_tree::{sigmoid, ImpactTree, ObservationTable, TreeConfig};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "tree_report")]
#[command(version, about = "Fit an impact tree on synthetic data and report it")]
struct Cli {
    /// Minutes of synthetic data to generate
    #[arg(long, default_value = "3000")]
    minutes: usize,

    /// RNG seed for the synthetic stream
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Write serialized tree parameters as JSON
    #[arg(short, long)]
    output: Option<String>,
}

// ============================================================================
// Synthetic data
// ============================================================================

/// One trade plus three quote updates per minute. The true impact curve is
/// a single sigmoid whose scale depends on the sign agreement between book
/// imbalance and trade direction, so the tree has exactly one real split
/// to find.
fn synthetic_table(minutes: usize, seed: u64) -> impact_tree::Result<ObservationTable> {
    let mut rng = StdRng::seed_from_u64(seed);
    let size_dist = LogNormal::<f64>::new(1.0, 0.8).expect("valid lognormal");
    let noise = Normal::new(0.0, 0.003).expect("valid normal");
    let tick = 1.0 / 128.0;

    let mut ts = Vec::new();
    let mut sizes = Vec::new();
    let mut quotes_since = Vec::new();
    let mut is_trade = Vec::new();
    let mut avg_price = Vec::new();
    let mut time_to_tick = Vec::new();
    let mut imbalance = Vec::new();
    let mut trade_size = Vec::new();
    let mut theo_col = Vec::new();
    let mut markup_col = Vec::new();

    let mut theo = 100.0;
    for minute in 0..minutes {
        theo += 0.01 * noise.sample(&mut rng);
        let imb: f64 = rng.gen_range(-1.0..1.0);
        let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let magnitude = size_dist.sample(&mut rng).round().max(1.0);
        let size = sign * magnitude;
        // Aligned flow moves the price three times as hard.
        let scale = if imb * sign > 0.0 { 12.0 } else { 4.0 };
        let impulse = scale * tick * sigmoid(size, 5.0);

        let base_ms = minute as u64 * 60_000;
        // Trade event.
        ts.push(base_ms);
        sizes.push(size);
        quotes_since.push(0.0);
        is_trade.push(true);
        avg_price.push(theo - sign * tick / 2.0);
        time_to_tick.push(rng.gen_range(0.0..60_000.0));
        imbalance.push(imb);
        trade_size.push(magnitude);
        theo_col.push(theo);
        markup_col.push(theo + impulse + noise.sample(&mut rng));

        // Quote events decaying back toward theo.
        for q in 1..=3u32 {
            ts.push(base_ms + q as u64 * 15_000);
            sizes.push(0.0);
            quotes_since.push(q as f64);
            is_trade.push(false);
            avg_price.push(theo);
            time_to_tick.push(rng.gen_range(0.0..60_000.0));
            imbalance.push(imb);
            trade_size.push(0.0);
            theo_col.push(theo);
            markup_col.push(theo + impulse * 0.85f64.powi(q as i32) + noise.sample(&mut rng));
        }
    }

    ObservationTable::new(ts, sizes, quotes_since, is_trade, avg_price, time_to_tick)?
        .with_column("BookImbalance", imbalance)?
        .with_column("TradeSize", trade_size)?
        .with_column("Theo", theo_col)?
        .with_column("Markup", markup_col)
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(minutes = cli.minutes, seed = cli.seed, "generating synthetic stream");
    let table = synthetic_table(cli.minutes, cli.seed)?;

    let config = TreeConfig::default();
    let mut tree = ImpactTree::new(
        &table,
        vec!["TradeSize".to_string(), "BookImbalance".to_string()],
        "Theo",
        "Markup",
        config.clone(),
    )?;
    tree.grow()?;
    tree.fit_node_decays()?;
    tree.determine_removal_leaves()?;

    println!("nodes: {}", tree.nodes().len());
    println!(
        "score: {:.6}  tick gain: {:.4}",
        tree.score(),
        tree.total_tick_gain()
    );
    for (feature, count, gain) in tree.feature_scores() {
        println!("  {feature}: {count} splits, test gain {gain:.6}");
    }
    for &leaf in &tree.leaf_ids() {
        let node = &tree.nodes()[leaf];
        println!(
            "leaf {leaf}: {} trades ({} effective), decay {:?}",
            node.size(),
            node.effective_size(),
            node.decay_length
        );
        println!("  {}", node.model.describe(config.tick_size));
    }
    for summary in tree.removal_summary() {
        println!(
            "leaf {}: removal edge {:.5} profit {:.2} over {} of {} candidates",
            summary.node_id,
            summary.min_edge_to_remove,
            summary.profit_at_edge,
            summary.removal_count,
            summary.candidate_count
        );
    }

    let signals = HashMap::from([
        ("Theo".to_string(), 0i64),
        ("TradeSize".to_string(), 1),
        ("BookImbalance".to_string(), 2),
    ]);
    let params = tree.serialize(&signals)?;
    let json = serde_json::to_string_pretty(&params)?;
    match cli.output {
        Some(path) => {
            fs::write(&path, &json)?;
            info!(%path, "serialized parameters written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
