//! Exact-size pool resizing and writing pool changes back to a Lab.

use std::collections::HashMap;

use labfleet_inventory::{Dut, DutPool, Lab};
use tracing::{debug, info};

use crate::error::{BalanceError, BalanceResult};
use crate::types::PoolChange;

/// Move DUTs between `target_pool` and `spare_pool` so the target holds
/// exactly `target_size` of `duts`. Health is not considered.
///
/// DUTs are picked in ascending id order. Fails without changes if both
/// pools together are too small.
pub fn resize_pool<'a>(
    duts: impl IntoIterator<Item = &'a Dut>,
    target_pool: DutPool,
    spare_pool: DutPool,
    target_size: usize,
) -> BalanceResult<Vec<PoolChange>> {
    let mut target = Vec::new();
    let mut spare = Vec::new();
    for dut in duts {
        if dut.in_pool(target_pool) {
            target.push(dut.id.clone());
        } else if dut.in_pool(spare_pool) {
            spare.push(dut.id.clone());
        }
    }
    target.sort();
    spare.sort();

    let available = target.len() + spare.len();
    if available < target_size {
        return Err(BalanceError::NotEnoughDuts {
            available,
            requested: target_size,
        });
    }

    let (moving, old_pool, new_pool) = if target.len() < target_size {
        (&spare[..target_size - target.len()], spare_pool, target_pool)
    } else {
        (&target[..target.len() - target_size], target_pool, spare_pool)
    };
    let changes: Vec<PoolChange> = moving
        .iter()
        .map(|id| PoolChange {
            dut_id: id.clone(),
            old_pool,
            new_pool,
        })
        .collect();

    info!(
        %target_pool,
        %spare_pool,
        current = target.len(),
        target_size,
        changes = changes.len(),
        "pool resize planned"
    );
    Ok(changes)
}

/// Apply `changes` to the DUTs of `lab`. Every change must name a DUT in the Lab.
pub fn apply_pool_changes(lab: &mut Lab, changes: &[PoolChange]) -> BalanceResult<()> {
    let by_id: HashMap<&str, usize> = lab
        .duts
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id.as_str(), i))
        .collect();
    let positions = changes
        .iter()
        .map(|c| {
            by_id
                .get(c.dut_id.as_str())
                .copied()
                .ok_or_else(|| BalanceError::UnknownDut(c.dut_id.clone()))
        })
        .collect::<BalanceResult<Vec<usize>>>()?;

    for (change, i) in changes.iter().zip(positions) {
        lab.duts[i].move_pool(change.old_pool, change.new_pool);
        debug!(dut_id = %change.dut_id, old = %change.old_pool, new = %change.new_pool, "pool changed");
    }
    Ok(())
}
