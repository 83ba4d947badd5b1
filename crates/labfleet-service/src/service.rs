//! InventoryService — the RPC facade.
//!
//! Every mutating RPC runs Refresh, mutate, Commit inside the retry
//! driver. Each attempt builds a fresh [`InventoryStore`] and fresh
//! derived state, so a failed attempt leaves nothing behind. Read RPCs
//! go to the [`InventoryCache`] only.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use labfleet_balance::{PoolBalancer, PoolChange, apply_pool_changes, resize_pool};
use labfleet_cache::{Deployment, DeploymentState, DroneConfig, DutDeployment, FreeDut, InventoryCache};
use labfleet_gitstore::{GerritClient, GitStoreError, GitilesClient, InventoryStore};
use labfleet_inventory::{
    AssignmentEngine, Dut, DutId, DutPool, DutSelector, InventoryIndex, Lab, RemovalOutcome, assign_servo_port,
    has_servo_port,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::*;
use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::scheduler::{DeploymentActions, StaticScheduler, TaskScheduler, TaskState};
use crate::tracker::HealthTracker;

pub struct InventoryService {
    config: ServiceConfig,
    queen: String,
    gitiles: Arc<dyn GitilesClient>,
    gerrit: Arc<dyn GerritClient>,
    tracker: Arc<dyn HealthTracker>,
    scheduler: Arc<dyn TaskScheduler>,
    cache: InventoryCache,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl InventoryService {
    pub fn new(
        config: ServiceConfig,
        gitiles: Arc<dyn GitilesClient>,
        gerrit: Arc<dyn GerritClient>,
        tracker: Arc<dyn HealthTracker>,
        cache: InventoryCache,
    ) -> ServiceResult<Self> {
        let queen = config
            .queen_drone()
            .ok_or_else(|| {
                ServiceError::FailedPrecondition(format!(
                    "no queen drone configured for {}",
                    config.environment
                ))
            })?
            .to_string();
        let limiter = RateLimiter::new(
            config.rate_limit.max_requests,
            Duration::from_secs(config.rate_limit.period_secs),
        );
        let retry = RetryPolicy::from_config(&config.retry);
        info!(env = %config.environment, %queen, project = %config.inventory.project, "inventory service ready");
        Ok(Self {
            config,
            queen,
            gitiles,
            gerrit,
            tracker,
            scheduler: Arc::new(StaticScheduler::default()),
            cache,
            limiter,
            retry,
        })
    }

    /// Schedule deploy preparation tasks through `scheduler` instead of
    /// recording them in process.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> &InventoryCache {
        &self.cache
    }

    // ── Assignment ────────────────────────────────────────────────

    pub async fn assign_duts_to_drones(&self, req: &AssignDutsRequest) -> ServiceResult<AssignDutsResponse> {
        if req.assignments.is_empty() {
            return Err(ServiceError::InvalidArgument("assignments must not be empty".to_string()));
        }
        self.admit("AssignDutsToDrones")?;
        let (resp, free) = self
            .retry
            .run("AssignDutsToDrones", move |_| self.assign_once(req))
            .await?;
        self.reconcile_free_duts(&free);
        Ok(resp)
    }

    async fn assign_once(&self, req: &AssignDutsRequest) -> ServiceResult<(AssignDutsResponse, Vec<FreeDut>)> {
        let mut store = self.fresh_store().await?;
        let (assigned, free) = {
            let (lab, infra) = store.inventory_mut()?;
            let mut engine = AssignmentEngine::new(
                InventoryIndex::new(lab, infra),
                self.config.environment,
                self.queen.as_str(),
            );
            let mut assigned = Vec::with_capacity(req.assignments.len());
            for a in &req.assignments {
                let dut_id = engine
                    .index()
                    .resolve_dut_id(a.dut_id.as_deref(), a.dut_hostname.as_deref())?;
                if let Some(drone) = a.drone_hostname.as_deref().filter(|d| !d.is_empty() && *d != self.queen) {
                    debug!(%dut_id, requested = drone, queen = %self.queen, "assigning to queen drone instead");
                }
                assigned.push(engine.assign(&dut_id)?);
            }
            (assigned, free_duts(engine.index()))
        };
        let url = self.commit(&mut store, &format!("assign {} DUT(s) to drones", assigned.len())).await?;
        Ok((AssignDutsResponse { assigned, url }, free))
    }

    pub async fn remove_duts_from_drones(&self, req: &RemoveDutsRequest) -> ServiceResult<RemoveDutsResponse> {
        if req.removals.is_empty() {
            return Err(ServiceError::InvalidArgument("removals must not be empty".to_string()));
        }
        self.admit("RemoveDutsFromDrones")?;
        let (resp, free) = self
            .retry
            .run("RemoveDutsFromDrones", move |_| self.remove_once(req))
            .await?;
        self.reconcile_free_duts(&free);
        Ok(resp)
    }

    async fn remove_once(&self, req: &RemoveDutsRequest) -> ServiceResult<(RemoveDutsResponse, Vec<FreeDut>)> {
        let mut store = self.fresh_store().await?;
        let (removed, free) = {
            let (lab, infra) = store.inventory_mut()?;
            let mut engine = AssignmentEngine::new(
                InventoryIndex::new(lab, infra),
                self.config.environment,
                self.queen.as_str(),
            );
            let mut removed = Vec::new();
            for r in &req.removals {
                match engine.remove(r)? {
                    RemovalOutcome::Removed(dut) => removed.push(dut),
                    RemovalOutcome::NotOwned | RemovalOutcome::WrongEnvironment => {}
                }
            }
            (removed, free_duts(engine.index()))
        };
        let url = self.commit(&mut store, &format!("remove {} DUT(s) from drones", removed.len())).await?;
        Ok((RemoveDutsResponse { removed, url }, free))
    }

    pub async fn delete_duts(&self, req: &DeleteDutsRequest) -> ServiceResult<DeleteDutsResponse> {
        if req.hostnames.is_empty() {
            return Err(ServiceError::InvalidArgument("hostnames must not be empty".to_string()));
        }
        self.admit("DeleteDuts")?;
        let (resp, free) = self.retry.run("DeleteDuts", move |_| self.delete_once(req)).await?;
        self.reconcile_free_duts(&free);
        Ok(resp)
    }

    async fn delete_once(&self, req: &DeleteDutsRequest) -> ServiceResult<(DeleteDutsResponse, Vec<FreeDut>)> {
        let mut store = self.fresh_store().await?;
        let (ids, free) = {
            let (lab, infra) = store.inventory_mut()?;
            let ids: Vec<DutId> = lab
                .remove_duts_with_hostnames(&req.hostnames)
                .into_iter()
                .map(|d| d.id)
                .collect();
            let index = InventoryIndex::new(lab, infra);
            (ids, free_duts(&index))
        };
        info!(deleted = ids.len(), requested = req.hostnames.len(), "duts deleted from lab");
        let url = self.commit(&mut store, &format!("delete {} DUT(s)", ids.len())).await?;
        Ok((DeleteDutsResponse { ids, url }, free))
    }

    // ── Pools ─────────────────────────────────────────────────────

    pub async fn ensure_pool_healthy(&self, req: &EnsurePoolHealthyRequest) -> ServiceResult<EnsurePoolHealthyResponse> {
        req.dut_selector.validate()?;
        let (target, spare) = parse_pools(&req.target_pool, &req.spare_pool)?;
        self.admit("EnsurePoolHealthy")?;
        self.retry
            .run("EnsurePoolHealthy", move |_| self.ensure_pool_healthy_once(req, target, spare))
            .await
    }

    async fn ensure_pool_healthy_once(
        &self,
        req: &EnsurePoolHealthyRequest,
        target: DutPool,
        spare: DutPool,
    ) -> ServiceResult<EnsurePoolHealthyResponse> {
        let mut store = self.fresh_store().await?;
        let duts = self.selected_duts(store.lab()?, &req.dut_selector);
        let max_unhealthy = req.max_unhealthy_duts as usize;
        let mut resp = plan_balance(self.tracker.as_ref(), &duts, target, spare, max_unhealthy).await?;
        if req.dryrun || resp.changes.is_empty() {
            return Ok(resp);
        }
        let (lab, _) = store.inventory_mut()?;
        apply_pool_changes(lab, &resp.changes)?;
        resp.url = self.commit(&mut store, &format!("balance pool {target} from {spare}")).await?;
        Ok(resp)
    }

    pub async fn ensure_pool_healthy_for_all_models(
        &self,
        req: &EnsurePoolHealthyForAllModelsRequest,
    ) -> ServiceResult<EnsurePoolHealthyForAllModelsResponse> {
        let (target, spare) = parse_pools(&req.target_pool, &req.spare_pool)?;
        self.admit("EnsurePoolHealthyForAllModels")?;
        self.retry
            .run("EnsurePoolHealthyForAllModels", move |_| {
                self.all_models_once(req, target, spare)
            })
            .await
    }

    async fn all_models_once(
        &self,
        req: &EnsurePoolHealthyForAllModelsRequest,
        target: DutPool,
        spare: DutPool,
    ) -> ServiceResult<EnsurePoolHealthyForAllModelsResponse> {
        let mut store = self.fresh_store().await?;
        let mut by_model: BTreeMap<String, Vec<Dut>> = BTreeMap::new();
        for dut in store.lab()?.duts.iter().filter(|d| d.environment == self.config.environment) {
            by_model.entry(dut.model.clone()).or_default().push(dut.clone());
        }

        let results = Arc::new(Mutex::new(BTreeMap::new()));
        let semaphore = Arc::new(Semaphore::new(self.config.balancing.workers.max(1)));
        let max_unhealthy = req.max_unhealthy_duts as usize;
        let mut workers = JoinSet::new();
        for (model, duts) in by_model {
            let tracker = self.tracker.clone();
            let results = results.clone();
            let semaphore = semaphore.clone();
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ServiceError::Internal(format!("balancing worker pool closed: {e}")))?;
                let resp = plan_balance(tracker.as_ref(), &duts, target, spare, max_unhealthy).await?;
                debug!(%model, changes = resp.changes.len(), failures = resp.failures.len(), "model balanced");
                results.lock().unwrap_or_else(|p| p.into_inner()).insert(model, resp);
                Ok::<(), ServiceError>(())
            });
        }
        while let Some(joined) = workers.join_next().await {
            let outcome = joined
                .map_err(|e| ServiceError::Internal(format!("balancing worker failed: {e}")))
                .and_then(|r| r);
            if let Err(e) = outcome {
                workers.abort_all();
                warn!(error = %e, "model balancing failed, aborting batch");
                return Err(e);
            }
        }

        let model_result: BTreeMap<String, EnsurePoolHealthyResponse> =
            std::mem::take(&mut *results.lock().unwrap_or_else(|p| p.into_inner()));
        let changes: Vec<PoolChange> = model_result
            .values()
            .flat_map(|r| r.changes.iter().cloned())
            .collect();
        info!(
            %target,
            %spare,
            models = model_result.len(),
            changes = changes.len(),
            dryrun = req.dryrun,
            "all models balanced"
        );

        let mut url = String::new();
        if !req.dryrun && !changes.is_empty() {
            let (lab, _) = store.inventory_mut()?;
            apply_pool_changes(lab, &changes)?;
            url = self
                .commit(
                    &mut store,
                    &format!("balance pool {target} from {spare} for {} models", model_result.len()),
                )
                .await?;
        }
        Ok(EnsurePoolHealthyForAllModelsResponse { model_result, url })
    }

    pub async fn resize_pool(&self, req: &ResizePoolRequest) -> ServiceResult<ResizePoolResponse> {
        req.dut_selector.validate()?;
        let (target, spare) = parse_pools(&req.target_pool, &req.spare_pool)?;
        self.admit("ResizePool")?;
        self.retry
            .run("ResizePool", move |_| self.resize_once(req, target, spare))
            .await
    }

    async fn resize_once(&self, req: &ResizePoolRequest, target: DutPool, spare: DutPool) -> ServiceResult<ResizePoolResponse> {
        let mut store = self.fresh_store().await?;
        let duts = self.selected_duts(store.lab()?, &req.dut_selector);
        let changes = resize_pool(&duts, target, spare, req.target_pool_size as usize)?;
        if changes.is_empty() {
            return Ok(ResizePoolResponse::default());
        }
        let (lab, _) = store.inventory_mut()?;
        apply_pool_changes(lab, &changes)?;
        let url = self
            .commit(
                &mut store,
                &format!("resize pool {target} to {} using {spare}", req.target_pool_size),
            )
            .await?;
        Ok(ResizePoolResponse { changes, url })
    }

    // ── Deployment ────────────────────────────────────────────────

    /// Add every DUT in `new_specs` to the fleet, attached to the queen
    /// drone, and schedule its preparation task. Per-DUT failures are
    /// recorded in the deployment rather than failing the RPC.
    pub async fn deploy_duts(&self, req: &DeployDutsRequest) -> ServiceResult<DeployDutsResponse> {
        if req.new_specs.is_empty() {
            return Err(ServiceError::InvalidArgument("new_specs must not be empty".to_string()));
        }
        if req.new_specs.iter().any(|d| d.hostname.is_empty()) {
            return Err(ServiceError::InvalidArgument("dut hostname not set in new_specs".to_string()));
        }
        self.admit("DeployDuts")?;

        let mut deployment = Deployment::new(Uuid::new_v4().to_string(), Utc::now());
        for specs in &req.new_specs {
            let mut entry = DutDeployment::in_progress(&specs.hostname);
            let options = req.options;
            match self
                .retry
                .run("DeployDuts", move |_| self.add_dut_once(specs, options))
                .await
            {
                Ok((dut_id, url, free)) => {
                    entry.dut_id = dut_id;
                    entry.change_url = url;
                    self.reconcile_free_duts(&free);
                    self.schedule_preparation(&mut entry, &req.actions).await;
                }
                Err(e) => entry.fail(format!("failed to add dut to fleet: {e}")),
            }
            deployment.duts.push(entry);
        }
        self.cache.put_deployment(&deployment)?;
        info!(
            deployment_id = %deployment.id,
            duts = deployment.duts.len(),
            state = ?deployment.state(),
            "deployment started"
        );
        Ok(DeployDutsResponse {
            deployment_id: deployment.id,
        })
    }

    async fn add_dut_once(
        &self,
        specs: &Dut,
        options: DeploymentOptions,
    ) -> ServiceResult<(DutId, String, Vec<FreeDut>)> {
        let mut store = self.fresh_store().await?;
        let mut dut = specs.clone();
        let hostname = dut.hostname.clone();
        let (dut_id, free) = {
            let (lab, infra) = store.inventory_mut()?;
            if lab.duts.iter().any(|d| d.hostname == hostname) {
                return Err(ServiceError::InvalidArgument(format!(
                    "dut with hostname {hostname} already exists"
                )));
            }
            if options.assign_servo_port_if_missing && !has_servo_port(&dut) {
                assign_servo_port(&lab.duts, &mut dut)?;
            }
            // A fresh id per attempt.
            dut.id = Uuid::new_v4().to_string();
            let dut_id = dut.id.clone();
            lab.duts.push(dut);

            let mut engine = AssignmentEngine::new(
                InventoryIndex::new(lab, infra),
                self.config.environment,
                self.queen.as_str(),
            );
            engine.assign(&dut_id)?;
            (dut_id, free_duts(engine.index()))
        };
        let url = self.commit(&mut store, &format!("add new dut {hostname}")).await?;
        info!(%dut_id, %hostname, %url, "dut added to fleet");
        Ok((dut_id, url, free))
    }

    /// Replace an existing DUT's specs (when they changed) and schedule
    /// its preparation task.
    pub async fn redeploy_dut(&self, req: &RedeployDutRequest) -> ServiceResult<RedeployDutResponse> {
        let id = &req.old_specs.id;
        if id.is_empty() {
            return Err(ServiceError::InvalidArgument("empty id in old_specs".to_string()));
        }
        if req.new_specs.id != *id {
            return Err(ServiceError::InvalidArgument(format!(
                "new_specs id {} does not match old_specs id {id}",
                req.new_specs.id
            )));
        }
        self.admit("RedeployDut")?;

        let mut deployment = Deployment::new(Uuid::new_v4().to_string(), Utc::now());
        let mut entry = DutDeployment::in_progress(&req.new_specs.hostname);
        entry.dut_id = id.clone();
        if req.old_specs != req.new_specs {
            match self
                .retry
                .run("RedeployDut", move |_| self.update_specs_once(req))
                .await
            {
                Ok((url, free)) => {
                    entry.change_url = url;
                    self.reconcile_free_duts(&free);
                }
                Err(e) => entry.fail(format!("failed to update dut specs: {e}")),
            }
        }
        if !entry.is_final {
            self.schedule_preparation(&mut entry, &req.actions).await;
        }
        deployment.duts.push(entry);
        self.cache.put_deployment(&deployment)?;
        info!(deployment_id = %deployment.id, dut_id = %id, state = ?deployment.state(), "redeployment started");
        Ok(RedeployDutResponse {
            deployment_id: deployment.id,
        })
    }

    async fn update_specs_once(&self, req: &RedeployDutRequest) -> ServiceResult<(String, Vec<FreeDut>)> {
        let mut store = self.fresh_store().await?;
        let id = req.old_specs.id.as_str();
        let mut specs = req.new_specs.clone();
        let free = {
            let (lab, infra) = store.inventory_mut()?;
            if req.options.assign_servo_port_if_missing && !has_servo_port(&specs) {
                assign_servo_port(&lab.duts, &mut specs)?;
            }
            let current = lab
                .duts
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| ServiceError::NotFound(format!("no dut with id {id}")))?;
            if *current != req.old_specs {
                return Err(ServiceError::FailedPrecondition(format!(
                    "dut {id} changed since old_specs were read"
                )));
            }
            *current = specs;
            free_duts(&InventoryIndex::new(lab, infra))
        };
        let url = self.commit(&mut store, &format!("update dut {id}")).await?;
        Ok((url, free))
    }

    /// Current state of a deployment. Unfinished DUTs are refreshed from
    /// the scheduler and the record is written back.
    pub async fn get_deployment_status(
        &self,
        req: &GetDeploymentStatusRequest,
    ) -> ServiceResult<GetDeploymentStatusResponse> {
        if req.deployment_id.is_empty() {
            return Err(ServiceError::InvalidArgument("deployment_id is required".to_string()));
        }
        let mut deployment = self.cache.get_deployment(&req.deployment_id)?.ok_or_else(|| {
            ServiceError::NotFound(format!("no deployment attempt with id {}", req.deployment_id))
        })?;
        if !deployment.is_final() {
            for entry in deployment.duts.iter_mut().filter(|d| !d.is_final) {
                self.refresh_task_state(entry).await?;
            }
            self.cache.put_deployment(&deployment)?;
        }
        Ok(GetDeploymentStatusResponse {
            status: deployment.state(),
            message: deployment.message(),
            duts: deployment.duts,
        })
    }

    async fn schedule_preparation(&self, entry: &mut DutDeployment, actions: &DeploymentActions) {
        let scheduled = self.scheduler.schedule_preparation(&entry.dut_id, actions).await;
        match scheduled {
            Ok(task_id) => {
                debug!(dut_id = %entry.dut_id, %task_id, "preparation task scheduled");
                entry.task_id = task_id;
            }
            Err(e) => entry.fail(format!("failed to create deploy task: {e}")),
        }
    }

    async fn refresh_task_state(&self, entry: &mut DutDeployment) -> ServiceResult<()> {
        if entry.task_id.is_empty() {
            entry.fail("missing deploy task id");
            return Ok(());
        }
        let state = self.scheduler.task_state(&entry.task_id).await?;
        match state {
            TaskState::Completed { failed: false } => entry.succeed(),
            TaskState::Completed { failed: true } => {
                let reason = format!("deploy task {} failed", entry.task_id);
                entry.fail(reason);
            }
            TaskState::Pending | TaskState::Running => entry.state = DeploymentState::InProgress,
            TaskState::Other(state) => entry.fail(format!("unhandled deploy task state: {state}")),
        }
        Ok(())
    }

    // ── Cache ─────────────────────────────────────────────────────

    /// Refresh the cache from the repository: every DUT record, drone
    /// configurations and the free-DUT table.
    pub async fn update_cached_inventory(&self) -> ServiceResult<UpdateCachedInventoryResponse> {
        let mut store = self
            .retry
            .run("UpdateCachedInventory", move |_| self.fresh_store())
            .await?;
        let (lab, infra) = store.inventory_mut()?;
        let synced = self.cache.sync_duts(&lab.duts, Utc::now())?;
        let index = InventoryIndex::new(lab, infra);
        let drones: Vec<DroneConfig> = index
            .drones()
            .map(|d| DroneConfig {
                hostname: d.hostname.clone(),
                dut_ids: d.dut_uids.clone(),
            })
            .collect();
        self.cache.put_drone_configs(&drones)?;
        let free = self.cache.reconcile_free_duts(&free_duts(&index))?;
        info!(
            duts = index.dut_count(),
            written = synced.written,
            pruned = synced.removed,
            drones = drones.len(),
            free_written = free.written,
            free_removed = free.removed,
            "cached inventory updated"
        );
        Ok(UpdateCachedInventoryResponse {})
    }

    pub fn get_dut_info(&self, req: &GetDutInfoRequest) -> ServiceResult<GetDutInfoResponse> {
        let id = req.id.as_deref().filter(|s| !s.is_empty());
        let hostname = req.hostname.as_deref().filter(|s| !s.is_empty());
        let cached = match (id, hostname) {
            (Some(id), _) => self
                .cache
                .get_dut_by_id(id)?
                .ok_or_else(|| ServiceError::NotFound(format!("no cached dut with id {id}")))?,
            (None, Some(hostname)) => self
                .cache
                .get_dut_by_hostname(hostname)?
                .ok_or_else(|| ServiceError::NotFound(format!("no cached dut with hostname {hostname}")))?,
            (None, None) => {
                return Err(ServiceError::InvalidArgument("id or hostname is required".to_string()));
            }
        };

        let env = serde_json::from_str::<Dut>(&cached.serialized_spec)
            .map(|d| d.environment)
            .unwrap_or(self.config.environment);
        let window = chrono::Duration::from_std(self.config.freshness_for(env))
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let now = Utc::now();
        if !cached.is_fresh(now, window) {
            warn!(
                dut_id = %cached.id,
                age_secs = (now - cached.updated).num_seconds(),
                "serving stale cached dut"
            );
        }
        Ok(GetDutInfoResponse {
            serialized_spec: cached.serialized_spec,
            updated_timestamp: cached.updated,
        })
    }

    pub fn list_removed_duts(&self) -> ServiceResult<ListRemovedDutsResponse> {
        Ok(ListRemovedDutsResponse {
            duts: self.cache.list_free_duts()?,
        })
    }

    pub fn get_drone_config(&self, req: &GetDroneConfigRequest) -> ServiceResult<GetDroneConfigResponse> {
        if req.hostname.is_empty() {
            return Err(ServiceError::InvalidArgument("hostname is required".to_string()));
        }
        let config = self
            .cache
            .get_drone_config(&req.hostname)?
            .ok_or_else(|| ServiceError::NotFound(format!("no drone config for {}", req.hostname)))?;
        Ok(GetDroneConfigResponse {
            dut_ids: config.dut_ids,
        })
    }

    // ── Helpers ───────────────────────────────────────────────────

    fn admit(&self, rpc: &'static str) -> ServiceResult<()> {
        if self.limiter.try_request() {
            Ok(())
        } else {
            warn!(rpc, "request rejected by rate limiter");
            Err(ServiceError::ResourceExhausted(format!("{rpc}: too many requests")))
        }
    }

    async fn fresh_store(&self) -> ServiceResult<InventoryStore> {
        let mut store = InventoryStore::new(
            self.config.inventory.clone(),
            self.gitiles.clone(),
            self.gerrit.clone(),
        );
        store.refresh().await?;
        Ok(store)
    }

    /// DUTs of this service's environment matching `selector`.
    fn selected_duts(&self, lab: &Lab, selector: &DutSelector) -> Vec<Dut> {
        lab.duts
            .iter()
            .filter(|d| d.environment == self.config.environment && selector.matches(d))
            .cloned()
            .collect()
    }

    /// Commit `store`. A failure after part of the commit landed is retried
    /// on the same snapshot, so the mutation is never redone against a
    /// half-applied inventory; once that budget is spent the error is
    /// reported as internal so the outer retry does not redo it either.
    async fn commit(&self, store: &mut InventoryStore, description: &str) -> ServiceResult<String> {
        let mut n = 1;
        loop {
            match commit_or_empty(store, description).await {
                Err(e) if store.is_partially_committed() => {
                    if e.is_transient() && n < self.retry.attempts() {
                        warn!(attempt = n, error = %e, "commit partially landed, resubmitting the rest");
                        tokio::time::sleep(self.retry.backoff(n)).await;
                        n += 1;
                        continue;
                    }
                    error!(attempt = n, error = %e, "commit partially landed and could not be finished");
                    return Err(ServiceError::Internal(format!(
                        "inventory partially committed: {e}"
                    )));
                }
                other => return other,
            }
        }
    }

    fn reconcile_free_duts(&self, free: &[FreeDut]) {
        // The commit already landed; a cache failure is repaired by the next sync.
        match self.cache.reconcile_free_duts(free) {
            Ok(stats) => info!(written = stats.written, removed = stats.removed, "free duts reconciled"),
            Err(e) => warn!(error = %e, "free dut reconciliation failed"),
        }
    }
}

/// Commit the store, treating "nothing changed" as success with no URL.
async fn commit_or_empty(store: &mut InventoryStore, description: &str) -> ServiceResult<String> {
    match store.commit(description).await {
        Ok(url) => Ok(url),
        Err(GitStoreError::EmptyCommit) => {
            debug!(description, "nothing changed, no commit");
            Ok(String::new())
        }
        Err(e) => Err(e.into()),
    }
}

fn free_duts(index: &InventoryIndex<'_>) -> Vec<FreeDut> {
    index.free_duts().map(FreeDut::from_dut).collect()
}

fn parse_pools(target: &str, spare: &str) -> ServiceResult<(DutPool, DutPool)> {
    let target: DutPool = target.parse()?;
    let spare: DutPool = spare.parse()?;
    if target == spare {
        return Err(ServiceError::InvalidArgument(format!(
            "target and spare pool are both {target}"
        )));
    }
    Ok((target, spare))
}

/// Fetch health for `duts` and run one balancing pass. `url` is left empty.
async fn plan_balance(
    tracker: &dyn HealthTracker,
    duts: &[Dut],
    target: DutPool,
    spare: DutPool,
    max_unhealthy: usize,
) -> ServiceResult<EnsurePoolHealthyResponse> {
    let ids: Vec<DutId> = duts
        .iter()
        .filter(|d| d.in_pool(target) || d.in_pool(spare))
        .map(|d| d.id.clone())
        .collect();
    let health = tracker.summarize(&ids).await?;
    let mut balancer = PoolBalancer::from_duts(duts, target, spare, &health);
    let outcome = balancer.ensure_target_healthy(max_unhealthy);
    Ok(EnsurePoolHealthyResponse {
        target_pool_status: balancer.target_status(),
        spare_pool_status: balancer.spare_status(),
        changes: outcome.changes,
        failures: outcome.failures,
        url: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_accept_long_and_short_names() {
        assert_eq!(
            parse_pools("DUT_POOL_CQ", "suites").unwrap(),
            (DutPool::Cq, DutPool::Suites)
        );
        assert!(matches!(parse_pools("cq", "nope"), Err(ServiceError::InvalidArgument(_))));
        assert!(matches!(parse_pools("cq", "CQ"), Err(ServiceError::InvalidArgument(_))));
    }
}
