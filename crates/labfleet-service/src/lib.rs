//! labfleet-service — the inventory RPC facade and its REST router.
//!
//! ```text
//! REST router ─► InventoryService ─┬─► RetryPolicy ─► InventoryStore (archive fetch / review commit)
//!                                  ├─► HealthTracker
//!                                  ├─► TaskScheduler (deploy preparation)
//!                                  ├─► RateLimiter
//!                                  └─► InventoryCache (redb)
//! ```
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/AssignDutsToDrones` | Attach DUTs to the queen drone |
//! | POST | `/api/v1/RemoveDutsFromDrones` | Detach DUTs with a removal reason |
//! | POST | `/api/v1/DeleteDuts` | Delete DUTs from the Lab by hostname |
//! | POST | `/api/v1/EnsurePoolHealthy` | Swap unhealthy DUTs with healthy spares |
//! | POST | `/api/v1/EnsurePoolHealthyForAllModels` | Balance every model, one commit |
//! | POST | `/api/v1/ResizePool` | Resize a pool to an exact size |
//! | POST | `/api/v1/DeployDuts` | Add new DUTs to the fleet and schedule preparation |
//! | POST | `/api/v1/RedeployDut` | Update an existing DUT's specs and schedule preparation |
//! | POST | `/api/v1/GetDeploymentStatus` | Progress of a deploy or redeploy |
//! | POST | `/api/v1/GetDutInfo` | Cached DUT by id or hostname |
//! | POST | `/api/v1/UpdateCachedInventory` | Resync the cache from the repository |
//! | POST | `/api/v1/ListRemovedDuts` | DUTs no drone owns |
//! | POST | `/api/v1/GetDroneConfig` | DUT ids configured on a drone |
//! | GET | `/healthz` | Liveness |

pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ratelimit;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod tracker;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use ratelimit::RateLimiter;
pub use retry::RetryPolicy;
pub use scheduler::{DeploymentActions, StaticScheduler, TaskScheduler, TaskState};
pub use service::InventoryService;
pub use tracker::{HealthTracker, HttpTracker, StaticTracker};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<InventoryService>,
}

/// Build the complete API router.
pub fn build_router(service: Arc<InventoryService>) -> Router {
    let api_routes = Router::new()
        .route("/AssignDutsToDrones", post(handlers::assign_duts_to_drones))
        .route("/RemoveDutsFromDrones", post(handlers::remove_duts_from_drones))
        .route("/DeleteDuts", post(handlers::delete_duts))
        .route("/EnsurePoolHealthy", post(handlers::ensure_pool_healthy))
        .route(
            "/EnsurePoolHealthyForAllModels",
            post(handlers::ensure_pool_healthy_for_all_models),
        )
        .route("/ResizePool", post(handlers::resize_pool))
        .route("/DeployDuts", post(handlers::deploy_duts))
        .route("/RedeployDut", post(handlers::redeploy_dut))
        .route("/GetDeploymentStatus", post(handlers::get_deployment_status))
        .route("/GetDutInfo", post(handlers::get_dut_info))
        .route("/UpdateCachedInventory", post(handlers::update_cached_inventory))
        .route("/ListRemovedDuts", post(handlers::list_removed_duts))
        .route("/GetDroneConfig", post(handlers::get_drone_config))
        .with_state(ApiState { service });

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
