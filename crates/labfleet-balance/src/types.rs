//! Value types shared by the balancer and the resizer.

use labfleet_inventory::{DutId, DutPool};
use serde::{Deserialize, Serialize};

/// Health of a DUT as reported by the tracker.
///
/// Anything other than `Healthy` counts as unhealthy, including DUTs
/// the tracker does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    Unhealthy,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

/// One DUT moving from one pool to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolChange {
    pub dut_id: DutId,
    pub old_pool: DutPool,
    pub new_pool: DutPool,
}

/// Partial failure reported alongside a successful balancing result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceFailure {
    TooManyUnhealthyDuts,
    NotEnoughHealthySpares,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub size: usize,
    pub healthy_count: usize,
}
