//! DUT ↔ drone assignment over an [`InventoryIndex`].
//!
//! Every mutation updates the drone's `dut_uids`, the reverse index and
//! the DUT's removal reason in one step, so a DUT is owned by at most
//! one drone at any point of a mutation pass.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{InventoryError, InventoryResult};
use crate::index::InventoryIndex;
use crate::types::{DutId, Environment, RemovalReason};

/// A DUT and the drone it was attached to (or detached from).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedDut {
    pub dut_id: DutId,
    pub drone_hostname: String,
}

/// One entry of a removal batch. Either `dut_id` or `dut_hostname` is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalRequest {
    #[serde(default)]
    pub dut_id: Option<DutId>,
    #[serde(default)]
    pub dut_hostname: Option<String>,
    #[serde(default)]
    pub reason: Option<RemovalReason>,
}

/// What a removal did.
///
/// Only `Removed` shows up in an RPC response; the other two are silent
/// no-ops kept apart so callers and tests can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed(AssignedDut),
    /// No drone owns the DUT.
    NotOwned,
    /// The owning drone is outside the caller's environment and is not the queen.
    WrongEnvironment,
}

/// Assign and remove DUTs for one environment.
pub struct AssignmentEngine<'a> {
    index: InventoryIndex<'a>,
    environment: Environment,
    queen: String,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(index: InventoryIndex<'a>, environment: Environment, queen: impl Into<String>) -> Self {
        Self {
            index,
            environment,
            queen: queen.into(),
        }
    }

    pub fn index(&self) -> &InventoryIndex<'a> {
        &self.index
    }

    pub fn queen(&self) -> &str {
        &self.queen
    }

    /// Attach `dut_id` to the queen drone and clear its removal reason.
    pub fn assign(&mut self, dut_id: &str) -> InventoryResult<AssignedDut> {
        if self.index.drone(&self.queen).is_none() {
            error!(queen = %self.queen, env = %self.environment, "queen drone missing from inventory");
            return Err(InventoryError::QueenDroneMissing(self.queen.clone()));
        }
        if self.index.dut(dut_id).is_none() {
            return Err(InventoryError::NotFound(format!("no dut with id {dut_id}")));
        }
        if let Some(drone) = self.index.drone_for_dut(dut_id) {
            return Err(InventoryError::AlreadyAssigned {
                dut_id: dut_id.to_string(),
                drone: drone.hostname.clone(),
            });
        }

        self.index.attach(dut_id, &self.queen)?;
        if let Some(dut) = self.index.dut_mut(dut_id) {
            dut.removal_reason = None;
        }
        info!(%dut_id, drone = %self.queen, "dut assigned");
        Ok(AssignedDut {
            dut_id: dut_id.to_string(),
            drone_hostname: self.queen.clone(),
        })
    }

    /// Detach a DUT from its drone and record why.
    pub fn remove(&mut self, request: &RemovalRequest) -> InventoryResult<RemovalOutcome> {
        let dut_id = self
            .index
            .resolve_dut_id(request.dut_id.as_deref(), request.dut_hostname.as_deref())?;

        let Some(drone) = self.index.drone_for_dut(&dut_id) else {
            debug!(%dut_id, "dut not owned by any drone, skipping");
            return Ok(RemovalOutcome::NotOwned);
        };
        if drone.hostname != self.queen && drone.environment != self.environment {
            debug!(
                %dut_id,
                drone = %drone.hostname,
                drone_env = %drone.environment,
                env = %self.environment,
                "dut owned by a drone in another environment, skipping"
            );
            return Ok(RemovalOutcome::WrongEnvironment);
        }

        let Some(drone_hostname) = self.index.detach(&dut_id) else {
            return Ok(RemovalOutcome::NotOwned);
        };
        if let Some(dut) = self.index.dut_mut(&dut_id) {
            dut.removal_reason = Some(request.reason.clone().unwrap_or_default());
        }
        info!(%dut_id, drone = %drone_hostname, "dut removed from drone");
        Ok(RemovalOutcome::Removed(AssignedDut {
            dut_id,
            drone_hostname,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use std::collections::BTreeMap;

    const QUEEN: &str = "drone-queen-ENVIRONMENT_STAGING";

    fn dut(id: &str) -> Dut {
        Dut {
            id: id.to_string(),
            hostname: format!("{id}-host"),
            environment: Environment::Staging,
            model: "link".to_string(),
            pools: vec![],
            attributes: BTreeMap::new(),
            removal_reason: None,
        }
    }

    fn drone(hostname: &str, env: Environment, duts: &[&str]) -> Server {
        Server {
            hostname: hostname.to_string(),
            environment: env,
            roles: vec![ServerRole::Drone],
            status: ServerStatus::Primary,
            dut_uids: duts.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn fixture() -> (Lab, Infrastructure) {
        let lab = Lab {
            duts: vec![dut("a"), dut("b"), dut("c")],
        };
        let infra = Infrastructure {
            servers: vec![
                drone(QUEEN, Environment::Staging, &[]),
                drone("drone-staging", Environment::Staging, &["b"]),
                drone("drone-prod", Environment::Prod, &["c"]),
            ],
        };
        (lab, infra)
    }

    #[test]
    fn assign_targets_queen_and_clears_reason() {
        let (mut lab, mut infra) = fixture();
        lab.duts[0].removal_reason = Some(RemovalReason::default());
        {
            let mut engine = AssignmentEngine::new(
                InventoryIndex::new(&mut lab, &mut infra),
                Environment::Staging,
                QUEEN,
            );
            let assigned = engine.assign("a").unwrap();
            assert_eq!(assigned.drone_hostname, QUEEN);
            assert_eq!(engine.index().drone_for_dut("a").unwrap().hostname, QUEEN);
        }
        assert_eq!(infra.servers[0].dut_uids, vec!["a".to_string()]);
        assert!(lab.duts[0].removal_reason.is_none());
    }

    #[test]
    fn assign_already_owned_fails_and_leaves_snapshot_alone() {
        let (mut lab, mut infra) = fixture();
        let before = (lab.clone(), infra.clone());
        {
            let mut engine = AssignmentEngine::new(
                InventoryIndex::new(&mut lab, &mut infra),
                Environment::Staging,
                QUEEN,
            );
            let err = engine.assign("b").unwrap_err();
            assert!(err.to_string().contains("drone-staging"));
            assert!(matches!(err, InventoryError::AlreadyAssigned { .. }));
        }
        assert_eq!((lab, infra), before);
    }

    #[test]
    fn assign_unknown_dut_is_not_found() {
        let (mut lab, mut infra) = fixture();
        let mut engine = AssignmentEngine::new(
            InventoryIndex::new(&mut lab, &mut infra),
            Environment::Staging,
            QUEEN,
        );
        assert!(matches!(engine.assign("zzz"), Err(InventoryError::NotFound(_))));
    }

    #[test]
    fn assign_without_queen_is_an_error() {
        let (mut lab, mut infra) = fixture();
        infra.servers.remove(0);
        let mut engine = AssignmentEngine::new(
            InventoryIndex::new(&mut lab, &mut infra),
            Environment::Staging,
            QUEEN,
        );
        assert!(matches!(
            engine.assign("a"),
            Err(InventoryError::QueenDroneMissing(_))
        ));
    }

    #[test]
    fn remove_same_environment_sets_reason() {
        let (mut lab, mut infra) = fixture();
        let reason = RemovalReason {
            bug: "b/123".to_string(),
            comment: "bad servo".to_string(),
            expire_time: None,
        };
        {
            let mut engine = AssignmentEngine::new(
                InventoryIndex::new(&mut lab, &mut infra),
                Environment::Staging,
                QUEEN,
            );
            let outcome = engine
                .remove(&RemovalRequest {
                    dut_hostname: Some("b-host".to_string()),
                    reason: Some(reason.clone()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(
                outcome,
                RemovalOutcome::Removed(AssignedDut {
                    dut_id: "b".to_string(),
                    drone_hostname: "drone-staging".to_string(),
                })
            );
        }
        assert!(infra.servers[1].dut_uids.is_empty());
        assert_eq!(lab.duts[1].removal_reason.as_ref(), Some(&reason));
    }

    #[test]
    fn remove_without_reason_still_marks_dut_removed() {
        let (mut lab, mut infra) = fixture();
        {
            let mut engine = AssignmentEngine::new(
                InventoryIndex::new(&mut lab, &mut infra),
                Environment::Staging,
                QUEEN,
            );
            engine
                .remove(&RemovalRequest {
                    dut_id: Some("b".to_string()),
                    ..Default::default()
                })
                .unwrap();
        }
        assert_eq!(lab.duts[1].removal_reason, Some(RemovalReason::default()));
    }

    #[test]
    fn remove_cross_environment_is_a_silent_noop() {
        let (mut lab, mut infra) = fixture();
        let before = (lab.clone(), infra.clone());
        {
            let mut engine = AssignmentEngine::new(
                InventoryIndex::new(&mut lab, &mut infra),
                Environment::Staging,
                QUEEN,
            );
            let outcome = engine
                .remove(&RemovalRequest {
                    dut_id: Some("c".to_string()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(outcome, RemovalOutcome::WrongEnvironment);
        }
        assert_eq!((lab, infra), before);
    }

    #[test]
    fn remove_from_queen_ignores_environment() {
        let (mut lab, mut infra) = fixture();
        infra.servers[0].environment = Environment::Prod;
        infra.servers[0].dut_uids.push("a".to_string());
        let mut engine = AssignmentEngine::new(
            InventoryIndex::new(&mut lab, &mut infra),
            Environment::Staging,
            QUEEN,
        );
        let outcome = engine
            .remove(&RemovalRequest {
                dut_id: Some("a".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(outcome, RemovalOutcome::Removed(_)));
    }

    #[test]
    fn remove_unowned_and_bad_requests() {
        let (mut lab, mut infra) = fixture();
        let mut engine = AssignmentEngine::new(
            InventoryIndex::new(&mut lab, &mut infra),
            Environment::Staging,
            QUEEN,
        );
        let outcome = engine
            .remove(&RemovalRequest {
                dut_id: Some("a".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome, RemovalOutcome::NotOwned);

        assert!(matches!(
            engine.remove(&RemovalRequest::default()),
            Err(InventoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.remove(&RemovalRequest {
                dut_hostname: Some("ghost".to_string()),
                ..Default::default()
            }),
            Err(InventoryError::NotFound(_))
        ));
    }
}
