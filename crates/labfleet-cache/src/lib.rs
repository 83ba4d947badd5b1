//! labfleet-cache — read cache and free-DUT tracker for the lab inventory.
//!
//! Backed by [redb](https://docs.rs/redb). Records are JSON-serialized
//! into `&[u8]` value columns.
//!
//! # Tables
//!
//! ```text
//! duts_by_id          id       → CachedDut
//! dut_id_by_hostname  hostname → id
//! drone_configs       hostname → DroneConfig
//! free_duts           id       → FreeDut
//! deployments         id       → Deployment
//! ```
//!
//! `InventoryCache` is `Clone + Send + Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{CacheError, CacheResult};
pub use store::{InventoryCache, SyncStats};
pub use types::*;
