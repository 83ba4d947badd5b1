//! REST handlers, one per RPC.
//!
//! Every handler decodes its JSON body, calls [`InventoryService`] and
//! wraps the answer in the `{success, data, error}` envelope.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, error};

use crate::ApiState;
use crate::api::*;
use crate::error::ServiceResult;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(rpc: &'static str, result: ServiceResult<T>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                error!(rpc, error = %e, "rpc failed");
            } else {
                debug!(rpc, error = %e, %status, "rpc rejected");
            }
            error_response(&e.to_string(), status)
        }
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(req)| req)
        .map_err(|e| error_response(&format!("invalid argument: {}", e.body_text()), StatusCode::BAD_REQUEST))
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({ "status": "ok" }))
}

/// POST /api/v1/AssignDutsToDrones
pub async fn assign_duts_to_drones(
    State(state): State<ApiState>,
    payload: Result<Json<AssignDutsRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("AssignDutsToDrones", state.service.assign_duts_to_drones(&req).await),
        Err(resp) => resp,
    }
}

/// POST /api/v1/RemoveDutsFromDrones
pub async fn remove_duts_from_drones(
    State(state): State<ApiState>,
    payload: Result<Json<RemoveDutsRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("RemoveDutsFromDrones", state.service.remove_duts_from_drones(&req).await),
        Err(resp) => resp,
    }
}

/// POST /api/v1/DeleteDuts
pub async fn delete_duts(
    State(state): State<ApiState>,
    payload: Result<Json<DeleteDutsRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("DeleteDuts", state.service.delete_duts(&req).await),
        Err(resp) => resp,
    }
}

/// POST /api/v1/EnsurePoolHealthy
pub async fn ensure_pool_healthy(
    State(state): State<ApiState>,
    payload: Result<Json<EnsurePoolHealthyRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("EnsurePoolHealthy", state.service.ensure_pool_healthy(&req).await),
        Err(resp) => resp,
    }
}

/// POST /api/v1/EnsurePoolHealthyForAllModels
pub async fn ensure_pool_healthy_for_all_models(
    State(state): State<ApiState>,
    payload: Result<Json<EnsurePoolHealthyForAllModelsRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond(
            "EnsurePoolHealthyForAllModels",
            state.service.ensure_pool_healthy_for_all_models(&req).await,
        ),
        Err(resp) => resp,
    }
}

/// POST /api/v1/ResizePool
pub async fn resize_pool(
    State(state): State<ApiState>,
    payload: Result<Json<ResizePoolRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("ResizePool", state.service.resize_pool(&req).await),
        Err(resp) => resp,
    }
}

/// POST /api/v1/DeployDuts
pub async fn deploy_duts(
    State(state): State<ApiState>,
    payload: Result<Json<DeployDutsRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("DeployDuts", state.service.deploy_duts(&req).await),
        Err(resp) => resp,
    }
}

/// POST /api/v1/RedeployDut
pub async fn redeploy_dut(
    State(state): State<ApiState>,
    payload: Result<Json<RedeployDutRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("RedeployDut", state.service.redeploy_dut(&req).await),
        Err(resp) => resp,
    }
}

/// POST /api/v1/GetDeploymentStatus
pub async fn get_deployment_status(
    State(state): State<ApiState>,
    payload: Result<Json<GetDeploymentStatusRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("GetDeploymentStatus", state.service.get_deployment_status(&req).await),
        Err(resp) => resp,
    }
}

/// POST /api/v1/GetDutInfo
pub async fn get_dut_info(
    State(state): State<ApiState>,
    payload: Result<Json<GetDutInfoRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("GetDutInfo", state.service.get_dut_info(&req)),
        Err(resp) => resp,
    }
}

/// POST /api/v1/UpdateCachedInventory
pub async fn update_cached_inventory(State(state): State<ApiState>) -> Response {
    respond("UpdateCachedInventory", state.service.update_cached_inventory().await)
}

/// POST /api/v1/ListRemovedDuts
pub async fn list_removed_duts(State(state): State<ApiState>) -> Response {
    respond("ListRemovedDuts", state.service.list_removed_duts())
}

/// POST /api/v1/GetDroneConfig
pub async fn get_drone_config(
    State(state): State<ApiState>,
    payload: Result<Json<GetDroneConfigRequest>, JsonRejection>,
) -> Response {
    match body(payload) {
        Ok(req) => respond("GetDroneConfig", state.service.get_drone_config(&req)),
        Err(resp) => resp,
    }
}
