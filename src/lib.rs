#![deny(unreachable_pub)]

//! Market-impact model estimation: sigmoid impact curves fit by
//! non-negative least squares, a greedy regression tree over contextual
//! features, and active-set signal selection on accumulated Gram
//! matrices. Fitted trees serialize to the flat parameter layout the
//! trading system loads.

// Core modules
mod config;
mod errors;
mod numeric;

// Fitting modules
mod gram;
mod impact;
mod nnls;
mod schema;
mod sigmoid;
mod signal_select;
mod split;
mod tree;

#[cfg(test)]
mod tests;

// Re-exports
pub use config::TreeConfig;
pub use errors::{FitError, Result};
pub use gram::{GramMatrix, CONST_COLUMN};
pub use impact::ImpactModel;
pub use schema::ObservationTable;
pub use sigmoid::{sigmoid, SigmoidBasis};
pub use signal_select::{ActiveSetNnls, SignalFit};
pub use split::Split;
pub use tree::{ImpactTree, Node, RemovalLeafSummary, TreeParams};
