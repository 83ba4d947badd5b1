//! Error types for the inventory model.

use thiserror::Error;

/// Result type alias for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Errors raised while decoding, indexing or mutating an inventory snapshot.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to parse {kind}: {source}")]
    Parse {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize {kind}: {source}")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("unknown pool: {0}")]
    UnknownPool(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dut {dut_id} is already assigned to drone {drone}")]
    AlreadyAssigned { dut_id: String, drone: String },

    #[error("queen drone {0} is missing from the inventory")]
    QueenDroneMissing(String),

    #[error("no free servo port on servo host {0}")]
    NoFreeServoPort(String),
}
