//! labfleet-balance — pool health balancing and pool resizing.
//!
//! Pure algorithms over DUT pool memberships. Health values come from
//! the caller; nothing here performs I/O.

pub mod balancer;
pub mod error;
pub mod resize;
pub mod types;

pub use balancer::{BalanceOutcome, PoolBalancer};
pub use error::{BalanceError, BalanceResult};
pub use resize::{apply_pool_changes, resize_pool};
pub use types::{BalanceFailure, Health, PoolChange, PoolStatus};
