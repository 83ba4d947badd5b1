//! labfleet-inventory — the lab inventory model.
//!
//! A [`Lab`] lists every device-under-test (DUT) and an [`Infrastructure`]
//! lists every server, drones included. The pair is the unit that is read
//! from and committed back to the config repository.
//!
//! # Architecture
//!
//! ```text
//! Lab + Infrastructure (owned snapshot)
//!   └── InventoryIndex (borrows the snapshot mutably)
//!       ├── hostname → DUT id
//!       ├── DUT id → DUT
//!       ├── hostname → drone
//!       └── DUT id → owning drone
//!           └── AssignmentEngine (assign / remove, keeps both sides in sync)
//! ```
//!
//! Everything in this crate is synchronous and free of I/O.

pub mod assign;
pub mod codec;
pub mod error;
pub mod index;
pub mod select;
pub mod servo;
pub mod types;

pub use assign::{AssignedDut, AssignmentEngine, RemovalOutcome, RemovalRequest};
pub use error::{InventoryError, InventoryResult};
pub use index::InventoryIndex;
pub use select::DutSelector;
pub use servo::{SERVO_HOST_ATTRIBUTE, SERVO_PORT_ATTRIBUTE, assign_servo_port, has_servo_port};
pub use types::*;
