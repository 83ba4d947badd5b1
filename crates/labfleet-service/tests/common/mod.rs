#![allow(dead_code)]

use std::sync::Arc;

use labfleet_cache::InventoryCache;
use labfleet_gitstore::{GerritClient, GitilesClient, MemoryRepo, StoreConfig};
use labfleet_inventory::codec::{load_infrastructure, load_lab, write_infrastructure, write_lab};
use labfleet_inventory::{Dut, DutPool, Environment, Infrastructure, Lab, Server, ServerRole, ServerStatus};
use labfleet_service::{InventoryService, ServiceConfig, StaticScheduler, StaticTracker};

pub const LAB_PATH: &str = "data/skylab/lab.textpb";
pub const INFRA_PATH: &str = "data/skylab/server_db.textpb";
pub const QUEEN: &str = "drone-queen-ENVIRONMENT_STAGING";
pub const URL_PREFIX: &str = "https://review.example.com/c/infra/config/+/";

pub fn dut(id: &str, hostname: &str, model: &str, pools: &[DutPool]) -> Dut {
    Dut {
        id: id.to_string(),
        hostname: hostname.to_string(),
        environment: Environment::Staging,
        model: model.to_string(),
        pools: pools.to_vec(),
        attributes: Default::default(),
        removal_reason: None,
    }
}

pub fn drone(hostname: &str, environment: Environment, duts: &[&str]) -> Server {
    Server {
        hostname: hostname.to_string(),
        environment,
        roles: vec![ServerRole::Drone],
        status: ServerStatus::Primary,
        dut_uids: duts.iter().map(|d| d.to_string()).collect(),
    }
}

pub fn infra(servers: Vec<Server>) -> Infrastructure {
    let mut servers = servers;
    if !servers.iter().any(|s| s.hostname == QUEEN) {
        servers.push(drone(QUEEN, Environment::Staging, &[]));
    }
    Infrastructure { servers }
}

pub fn config() -> ServiceConfig {
    let mut config = ServiceConfig::new(
        Environment::Staging,
        StoreConfig {
            gitiles_host: "https://gitiles.example.com".to_string(),
            gerrit_host: "https://review.example.com".to_string(),
            project: "infra/config".to_string(),
            ..Default::default()
        },
    );
    config.queen_drones.insert("ENVIRONMENT_STAGING".to_string(), QUEEN.to_string());
    config.retry.backoff_ms = 1;
    config
}

/// A service wired to an in-memory repository, tracker, scheduler and cache.
pub struct Harness {
    pub repo: Arc<MemoryRepo>,
    pub tracker: Arc<StaticTracker>,
    pub scheduler: Arc<StaticScheduler>,
    pub service: Arc<InventoryService>,
}

impl Harness {
    pub fn new(lab: Lab, infrastructure: Infrastructure) -> Self {
        Self::with_config(lab, infrastructure, |_| {})
    }

    pub fn with_config(lab: Lab, infrastructure: Infrastructure, tweak: impl FnOnce(&mut ServiceConfig)) -> Self {
        let repo = Arc::new(MemoryRepo::new());
        repo.set_file(LAB_PATH, write_lab(&lab).unwrap());
        repo.set_file(INFRA_PATH, write_infrastructure(&infrastructure).unwrap());
        let tracker = Arc::new(StaticTracker::default());
        let scheduler = Arc::new(StaticScheduler::default());

        let mut config = config();
        tweak(&mut config);
        let gitiles: Arc<dyn GitilesClient> = repo.clone();
        let gerrit: Arc<dyn GerritClient> = repo.clone();
        let service = InventoryService::new(
            config,
            gitiles,
            gerrit,
            tracker.clone(),
            InventoryCache::open_in_memory().unwrap(),
        )
        .unwrap()
        .with_scheduler(scheduler.clone());
        Self {
            repo,
            tracker,
            scheduler,
            service: Arc::new(service),
        }
    }

    pub fn lab(&self) -> Lab {
        load_lab(&self.repo.file(LAB_PATH).unwrap()).unwrap()
    }

    pub fn infrastructure(&self) -> Infrastructure {
        load_infrastructure(&self.repo.file(INFRA_PATH).unwrap()).unwrap()
    }

    pub fn dut(&self, id: &str) -> Dut {
        self.lab().duts.into_iter().find(|d| d.id == id).unwrap()
    }

    pub fn drone(&self, hostname: &str) -> Server {
        self.infrastructure()
            .servers
            .into_iter()
            .find(|s| s.hostname == hostname)
            .unwrap()
    }
}
