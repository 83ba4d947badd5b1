//! Service errors and their mapping to RPC status codes.

use axum::http::StatusCode;
use labfleet_balance::BalanceError;
use labfleet_cache::CacheError;
use labfleet_gitstore::GitStoreError;
use labfleet_inventory::InventoryError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("health tracker: {0}")]
    Tracker(String),

    #[error("task scheduler: {0}")]
    Scheduler(String),

    #[error("inventory store: {0}")]
    Store(#[from] GitStoreError),

    #[error("cache: {0}")]
    Cache(#[from] CacheError),
}

impl ServiceError {
    /// HTTP status for this error at the REST boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::FailedPrecondition(_) => StatusCode::PRECONDITION_FAILED,
            ServiceError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Store(GitStoreError::InvalidStore(_) | GitStoreError::Config(_)) => {
                StatusCode::PRECONDITION_FAILED
            }
            ServiceError::Store(GitStoreError::MissingFile(_)) => StatusCode::NOT_FOUND,
            ServiceError::Internal(_)
            | ServiceError::Tracker(_)
            | ServiceError::Scheduler(_)
            | ServiceError::Store(_)
            | ServiceError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a whole Refresh, mutate, Commit attempt may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Store(e) => e.is_transient(),
            ServiceError::Tracker(_) => true,
            _ => false,
        }
    }
}

impl From<InventoryError> for ServiceError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::InvalidArgument(_)
            | InventoryError::AlreadyAssigned { .. }
            | InventoryError::UnknownPool(_)
            | InventoryError::UnknownEnvironment(_) => ServiceError::InvalidArgument(e.to_string()),
            InventoryError::NotFound(_) => ServiceError::NotFound(e.to_string()),
            InventoryError::NoFreeServoPort(_) => ServiceError::FailedPrecondition(e.to_string()),
            InventoryError::QueenDroneMissing(_)
            | InventoryError::Parse { .. }
            | InventoryError::Serialize { .. } => ServiceError::Internal(e.to_string()),
        }
    }
}

impl From<BalanceError> for ServiceError {
    fn from(e: BalanceError) -> Self {
        match e {
            BalanceError::NotEnoughDuts { .. } => ServiceError::FailedPrecondition(e.to_string()),
            BalanceError::UnknownDut(_) => ServiceError::Internal(e.to_string()),
        }
    }
}
