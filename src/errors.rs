use thiserror::Error;

/// Errors surfaced by the fitting pipeline.
#[derive(Error, Debug, Clone)]
pub enum FitError {
    /// A required column is missing from the observation table.
    #[error("missing column: {0}")]
    MissingColumn(String),

    /// A column's length does not match the table's row count.
    #[error("column {column} has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// A fit was requested on an empty data selection.
    #[error("empty data: {0}")]
    EmptyData(String),

    /// A numerical routine failed (singular system, non-convergence).
    #[error("numeric failure: {0}")]
    Numeric(String),

    /// A signal name is not present in the Gram matrix or signal map.
    #[error("unknown signal: {0}")]
    UnknownSignal(String),

    /// Tree structural validation failed; serialization is blocked.
    #[error("invalid tree: {0}")]
    InvalidTree(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FitError>;
