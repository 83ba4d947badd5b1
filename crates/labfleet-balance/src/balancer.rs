//! PoolBalancer — keep a target pool healthy by swapping with a spare pool.
//!
//! The balancer holds two `dut id → health` maps and mutates them as it
//! decides swaps; pool statuses are counted from the mutated maps. It is
//! rebuilt for every call and never persisted, only the emitted
//! [`PoolChange`]s are written back to the Lab.

use std::collections::{BTreeMap, HashMap};

use labfleet_inventory::{Dut, DutId, DutPool};
use tracing::{debug, info};

use crate::types::{BalanceFailure, Health, PoolChange, PoolStatus};

/// Changes and failures from one balancing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceOutcome {
    pub changes: Vec<PoolChange>,
    pub failures: Vec<BalanceFailure>,
}

pub struct PoolBalancer {
    target_pool: DutPool,
    spare_pool: DutPool,
    // Ordered by DUT id so pairing is deterministic.
    target: BTreeMap<DutId, Health>,
    spare: BTreeMap<DutId, Health>,
}

impl PoolBalancer {
    pub fn new(
        target_pool: DutPool,
        spare_pool: DutPool,
        target: BTreeMap<DutId, Health>,
        spare: BTreeMap<DutId, Health>,
    ) -> Self {
        Self {
            target_pool,
            spare_pool,
            target,
            spare,
        }
    }

    /// Split `duts` into the two pools, looking up each DUT's health.
    ///
    /// DUTs missing from `health` are `Unknown`. A DUT in both pools is
    /// treated as a target-pool member.
    pub fn from_duts<'a>(
        duts: impl IntoIterator<Item = &'a Dut>,
        target_pool: DutPool,
        spare_pool: DutPool,
        health: &HashMap<DutId, Health>,
    ) -> Self {
        let mut target = BTreeMap::new();
        let mut spare = BTreeMap::new();
        for dut in duts {
            let h = health.get(&dut.id).copied().unwrap_or_default();
            if dut.in_pool(target_pool) {
                target.insert(dut.id.clone(), h);
            } else if dut.in_pool(spare_pool) {
                spare.insert(dut.id.clone(), h);
            }
        }
        Self::new(target_pool, spare_pool, target, spare)
    }

    pub fn target_status(&self) -> PoolStatus {
        status(&self.target)
    }

    pub fn spare_status(&self) -> PoolStatus {
        status(&self.spare)
    }

    /// Swap unhealthy target DUTs with healthy spares.
    ///
    /// `max_unhealthy == 0` disables the cap. When the cap is exceeded no
    /// swap is made.
    pub fn ensure_target_healthy(&mut self, max_unhealthy: usize) -> BalanceOutcome {
        let need: Vec<DutId> = self
            .target
            .iter()
            .filter(|(_, h)| !h.is_healthy())
            .map(|(id, _)| id.clone())
            .collect();
        if max_unhealthy > 0 && need.len() > max_unhealthy {
            info!(
                target_pool = %self.target_pool,
                unhealthy = need.len(),
                max_unhealthy,
                "too many unhealthy duts, not balancing"
            );
            return BalanceOutcome {
                changes: Vec::new(),
                failures: vec![BalanceFailure::TooManyUnhealthyDuts],
            };
        }

        let have: Vec<DutId> = self
            .spare
            .iter()
            .filter(|(_, h)| h.is_healthy())
            .map(|(id, _)| id.clone())
            .collect();

        let mut outcome = BalanceOutcome::default();
        for (n, h) in need.iter().zip(&have) {
            self.swap(n, h);
            debug!(unhealthy = %n, healthy = %h, "swapping duts between pools");
            outcome.changes.push(PoolChange {
                dut_id: n.clone(),
                old_pool: self.target_pool,
                new_pool: self.spare_pool,
            });
            outcome.changes.push(PoolChange {
                dut_id: h.clone(),
                old_pool: self.spare_pool,
                new_pool: self.target_pool,
            });
        }
        if have.len() < need.len() {
            outcome.failures.push(BalanceFailure::NotEnoughHealthySpares);
        }

        info!(
            target_pool = %self.target_pool,
            spare_pool = %self.spare_pool,
            need = need.len(),
            have = have.len(),
            changes = outcome.changes.len(),
            "pool balanced"
        );
        outcome
    }

    fn swap(&mut self, from_target: &str, from_spare: &str) {
        let n = self.target.remove(from_target).unwrap_or_default();
        let h = self.spare.remove(from_spare).unwrap_or_default();
        self.spare.insert(from_target.to_string(), n);
        self.target.insert(from_spare.to_string(), h);
    }
}

fn status(pool: &BTreeMap<DutId, Health>) -> PoolStatus {
    PoolStatus {
        size: pool.len(),
        healthy_count: pool.values().filter(|h| h.is_healthy()).count(),
    }
}
