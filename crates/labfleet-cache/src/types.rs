//! Records stored in the cache.

use chrono::{DateTime, Duration, Utc};
use labfleet_inventory::{Dut, DutId};
use serde::{Deserialize, Serialize};
use tracing::error;

/// A DUT as last synced from the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDut {
    pub id: DutId,
    pub hostname: String,
    /// JSON encoding of the full DUT record.
    pub serialized_spec: String,
    pub updated: DateTime<Utc>,
}

impl CachedDut {
    pub fn new(dut: &Dut, serialized_spec: String, updated: DateTime<Utc>) -> Self {
        Self {
            id: dut.id.clone(),
            hostname: dut.hostname.clone(),
            serialized_spec,
            updated,
        }
    }

    /// Whether the record was synced within `window` of `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.updated <= window
    }
}

/// The DUTs a drone is configured to operate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroneConfig {
    pub hostname: String,
    pub dut_ids: Vec<DutId>,
}

/// A DUT with no owning drone, with its removal metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeDut {
    pub id: DutId,
    pub hostname: String,
    #[serde(default)]
    pub bug: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub model: String,
}

impl FreeDut {
    pub fn from_dut(dut: &Dut) -> Self {
        let reason = dut.removal_reason.clone().unwrap_or_default();
        Self {
            id: dut.id.clone(),
            hostname: dut.hostname.clone(),
            bug: reason.bug,
            comment: reason.comment,
            expire_time: reason.expire_time,
            model: dut.model.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    InProgress,
    Succeeded,
    #[default]
    Failed,
}

/// Progress of bringing one DUT into the fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutDeployment {
    /// Empty until the DUT has been added to the Lab.
    #[serde(default)]
    pub dut_id: DutId,
    pub hostname: String,
    pub state: DeploymentState,
    /// No further task polling is needed.
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub change_url: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub reason: String,
}

impl DutDeployment {
    pub fn in_progress(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            state: DeploymentState::InProgress,
            ..Default::default()
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = DeploymentState::Failed;
        self.is_final = true;
        self.reason = reason.into();
        error!(hostname = %self.hostname, dut_id = %self.dut_id, reason = %self.reason, "dut deployment failed");
    }

    pub fn succeed(&mut self) {
        self.state = DeploymentState::Succeeded;
        self.is_final = true;
    }
}

/// One deploy or redeploy request and the DUTs it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub created: DateTime<Utc>,
    pub duts: Vec<DutDeployment>,
}

impl Deployment {
    pub fn new(id: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created,
            duts: Vec::new(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.duts.iter().all(|d| d.is_final)
    }

    /// Failed if any DUT failed, in progress while any is still running.
    pub fn state(&self) -> DeploymentState {
        let states = || self.duts.iter().map(|d| d.state);
        if states().any(|s| s == DeploymentState::Failed) {
            DeploymentState::Failed
        } else if states().any(|s| s == DeploymentState::InProgress) {
            DeploymentState::InProgress
        } else {
            DeploymentState::Succeeded
        }
    }

    /// Failure reasons of every failed DUT, one per line.
    pub fn message(&self) -> String {
        self.duts
            .iter()
            .filter(|d| d.state == DeploymentState::Failed)
            .map(|d| format!("{}: {}", d.hostname, d.reason))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_state_aggregates_its_duts() {
        let mut deployment = Deployment::new("d1", Utc::now());
        deployment.duts.push(DutDeployment::in_progress("host-1"));
        deployment.duts.push(DutDeployment::in_progress("host-2"));
        assert_eq!(deployment.state(), DeploymentState::InProgress);
        assert!(!deployment.is_final());

        deployment.duts[0].succeed();
        assert_eq!(deployment.state(), DeploymentState::InProgress);
        deployment.duts[1].succeed();
        assert_eq!(deployment.state(), DeploymentState::Succeeded);
        assert!(deployment.is_final());

        deployment.duts[1].fail("task failed");
        assert_eq!(deployment.state(), DeploymentState::Failed);
        assert_eq!(deployment.message(), "host-2: task failed");
    }
}
