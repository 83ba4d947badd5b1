//! Error types for pool balancing.

use thiserror::Error;

/// Result type alias for balancing operations.
pub type BalanceResult<T> = Result<T, BalanceError>;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("target and spare pools hold {available} duts, cannot resize target to {requested}")]
    NotEnoughDuts { available: usize, requested: usize },

    #[error("pool change for unknown dut {0}")]
    UnknownDut(String),
}
