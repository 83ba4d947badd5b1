//! InventoryIndex — O(1) lookups over one inventory snapshot.
//!
//! The index borrows the snapshot mutably for its whole lifetime, so
//! the snapshot cannot change underneath it. Mutations that go through
//! the index ([`InventoryIndex::attach`], [`InventoryIndex::detach`])
//! update the snapshot and the reverse maps together.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{InventoryError, InventoryResult};
use crate::types::{Dut, DutId, Infrastructure, Lab, Server};

/// Derived lookup maps over a `Lab` + `Infrastructure` pair.
pub struct InventoryIndex<'a> {
    lab: &'a mut Lab,
    infrastructure: &'a mut Infrastructure,
    /// Hostnames are not unique; the last DUT in file order wins.
    hostname_to_id: HashMap<String, DutId>,
    /// DUT id → position in `lab.duts`.
    id_to_dut: HashMap<DutId, usize>,
    /// Drone hostname → position in `infrastructure.servers`.
    hostname_to_drone: HashMap<String, usize>,
    /// DUT id → position of the owning drone in `infrastructure.servers`.
    drone_for_dut: HashMap<DutId, usize>,
}

impl<'a> InventoryIndex<'a> {
    /// Build the index in a single pass over DUTs and servers.
    pub fn new(lab: &'a mut Lab, infrastructure: &'a mut Infrastructure) -> Self {
        let mut hostname_to_id = HashMap::with_capacity(lab.duts.len());
        let mut id_to_dut = HashMap::with_capacity(lab.duts.len());
        for (i, dut) in lab.duts.iter().enumerate() {
            hostname_to_id.insert(dut.hostname.clone(), dut.id.clone());
            id_to_dut.insert(dut.id.clone(), i);
        }

        let mut hostname_to_drone = HashMap::new();
        let mut drone_for_dut = HashMap::new();
        for (i, server) in infrastructure.servers.iter().enumerate() {
            if !server.is_drone() {
                continue;
            }
            hostname_to_drone.insert(server.hostname.clone(), i);
            for id in &server.dut_uids {
                drone_for_dut.insert(id.clone(), i);
            }
        }

        debug!(
            duts = id_to_dut.len(),
            drones = hostname_to_drone.len(),
            assigned = drone_for_dut.len(),
            "inventory index built"
        );

        Self {
            lab,
            infrastructure,
            hostname_to_id,
            id_to_dut,
            hostname_to_drone,
            drone_for_dut,
        }
    }

    /// Resolve a request's "id or hostname" pair to a DUT id.
    ///
    /// An id is taken as-is (it may name a DUT that only a drone still
    /// lists). A hostname must resolve through the index.
    pub fn resolve_dut_id(&self, id: Option<&str>, hostname: Option<&str>) -> InventoryResult<DutId> {
        let id = id.filter(|s| !s.is_empty());
        let hostname = hostname.filter(|s| !s.is_empty());
        match (id, hostname) {
            (Some(id), _) => Ok(id.to_string()),
            (None, Some(hostname)) => self
                .hostname_to_id
                .get(hostname)
                .cloned()
                .ok_or_else(|| InventoryError::NotFound(format!("no dut with hostname {hostname}"))),
            (None, None) => Err(InventoryError::InvalidArgument(
                "one of dut id or dut hostname is required".to_string(),
            )),
        }
    }

    pub fn dut_id_for_hostname(&self, hostname: &str) -> Option<&str> {
        self.hostname_to_id.get(hostname).map(String::as_str)
    }

    pub fn dut(&self, id: &str) -> Option<&Dut> {
        self.id_to_dut.get(id).map(|&i| &self.lab.duts[i])
    }

    pub fn dut_mut(&mut self, id: &str) -> Option<&mut Dut> {
        let i = *self.id_to_dut.get(id)?;
        Some(&mut self.lab.duts[i])
    }

    /// All DUTs in file order.
    pub fn duts(&self) -> impl Iterator<Item = &Dut> {
        self.lab.duts.iter()
    }

    pub fn drone(&self, hostname: &str) -> Option<&Server> {
        self.hostname_to_drone
            .get(hostname)
            .map(|&i| &self.infrastructure.servers[i])
    }

    /// Every drone in file order.
    pub fn drones(&self) -> impl Iterator<Item = &Server> {
        self.infrastructure.servers.iter().filter(|s| s.is_drone())
    }

    /// The drone currently owning `dut_id`, if any.
    pub fn drone_for_dut(&self, dut_id: &str) -> Option<&Server> {
        self.drone_for_dut
            .get(dut_id)
            .map(|&i| &self.infrastructure.servers[i])
    }

    /// DUTs in the Lab that no drone owns.
    pub fn free_duts(&self) -> impl Iterator<Item = &Dut> {
        self.lab
            .duts
            .iter()
            .filter(move |d| !self.drone_for_dut.contains_key(&d.id))
    }

    pub fn dut_count(&self) -> usize {
        self.id_to_dut.len()
    }

    /// Append `dut_id` to the drone's list and record the ownership.
    pub(crate) fn attach(&mut self, dut_id: &str, drone_hostname: &str) -> InventoryResult<()> {
        let i = *self
            .hostname_to_drone
            .get(drone_hostname)
            .ok_or_else(|| InventoryError::NotFound(format!("no drone with hostname {drone_hostname}")))?;
        self.infrastructure.servers[i].dut_uids.push(dut_id.to_string());
        self.drone_for_dut.insert(dut_id.to_string(), i);
        Ok(())
    }

    /// Drop `dut_id` from its owning drone. Returns that drone's hostname.
    pub(crate) fn detach(&mut self, dut_id: &str) -> Option<String> {
        let i = self.drone_for_dut.remove(dut_id)?;
        let drone = &mut self.infrastructure.servers[i];
        drone.dut_uids.retain(|id| id != dut_id);
        Some(drone.hostname.clone())
    }
}
