//! Request and response messages for every RPC.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use labfleet_balance::{BalanceFailure, PoolChange, PoolStatus};
use labfleet_cache::{DeploymentState, DutDeployment, FreeDut};
use labfleet_inventory::{AssignedDut, Dut, DutId, DutSelector, RemovalRequest};
use serde::{Deserialize, Serialize};

use crate::scheduler::DeploymentActions;

// ── Assignment ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutAssignment {
    #[serde(default)]
    pub dut_id: Option<DutId>,
    #[serde(default)]
    pub dut_hostname: Option<String>,
    /// Accepted for compatibility. DUTs always go to the queen drone.
    #[serde(default)]
    pub drone_hostname: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignDutsRequest {
    #[serde(default)]
    pub assignments: Vec<DutAssignment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignDutsResponse {
    pub assigned: Vec<AssignedDut>,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveDutsRequest {
    #[serde(default)]
    pub removals: Vec<RemovalRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveDutsResponse {
    pub removed: Vec<AssignedDut>,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteDutsRequest {
    #[serde(default)]
    pub hostnames: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDutsResponse {
    pub ids: Vec<DutId>,
    pub url: String,
}

// ── Pools ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnsurePoolHealthyRequest {
    #[serde(default)]
    pub dut_selector: DutSelector,
    pub target_pool: String,
    pub spare_pool: String,
    /// 0 disables the cap.
    #[serde(default)]
    pub max_unhealthy_duts: u32,
    #[serde(default)]
    pub dryrun: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsurePoolHealthyResponse {
    pub target_pool_status: PoolStatus,
    pub spare_pool_status: PoolStatus,
    pub changes: Vec<PoolChange>,
    pub failures: Vec<BalanceFailure>,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnsurePoolHealthyForAllModelsRequest {
    pub target_pool: String,
    pub spare_pool: String,
    #[serde(default)]
    pub max_unhealthy_duts: u32,
    #[serde(default)]
    pub dryrun: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsurePoolHealthyForAllModelsResponse {
    /// Per-model results. Their `url` is empty; the single commit's URL is `url`.
    pub model_result: BTreeMap<String, EnsurePoolHealthyResponse>,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResizePoolRequest {
    #[serde(default)]
    pub dut_selector: DutSelector,
    pub target_pool: String,
    pub spare_pool: String,
    pub target_pool_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizePoolResponse {
    pub changes: Vec<PoolChange>,
    pub url: String,
}

// ── Deployment ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentOptions {
    /// Pick a free servo port when the specs carry a servo host but no port.
    pub assign_servo_port_if_missing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployDutsRequest {
    /// Specs of the new DUTs. Ids are assigned by the service.
    pub new_specs: Vec<Dut>,
    #[serde(default)]
    pub actions: DeploymentActions,
    #[serde(default)]
    pub options: DeploymentOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployDutsResponse {
    pub deployment_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeployDutRequest {
    /// The DUT as the caller last saw it; must still match the inventory.
    pub old_specs: Dut,
    pub new_specs: Dut,
    #[serde(default)]
    pub actions: DeploymentActions,
    #[serde(default)]
    pub options: DeploymentOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeployDutResponse {
    pub deployment_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDeploymentStatusRequest {
    pub deployment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDeploymentStatusResponse {
    pub status: DeploymentState,
    /// Failure reasons, one line per failed DUT.
    pub message: String,
    pub duts: Vec<DutDeployment>,
}

// ── Cache reads ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDutInfoRequest {
    #[serde(default)]
    pub id: Option<DutId>,
    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDutInfoResponse {
    pub serialized_spec: String,
    pub updated_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCachedInventoryResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRemovedDutsResponse {
    pub duts: Vec<FreeDut>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDroneConfigRequest {
    pub hostname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDroneConfigResponse {
    pub dut_ids: Vec<DutId>,
}
