//! Environment API handlers.

use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

use crate::models::{EnvironmentCorrelation, EnvironmentDetail, EnvironmentList};
use crate::services::EnvironmentError;
use crate::utils::{ApiError, ApiResult};
use crate::AppState;

fn map_env_error(err: EnvironmentError) -> ApiError {
    match err {
        EnvironmentError::NotFound(env_id) => {
            ApiError::NotFound(format!("env_id {} not found in ingested data", env_id))
        },
        EnvironmentError::Other(e) => ApiError::Internal(e),
    }
}

/// GET /environments
#[utoipa::path(
    get,
    path = "/environments",
    responses((status = 200, description = "Discovered environments", body = EnvironmentList)),
    tag = "Environments"
)]
pub async fn list_environments(State(state): State<Arc<AppState>>) -> Json<EnvironmentList> {
    Json(state.environment_service.list_environments().await)
}

/// GET /environments/:env_id
#[utoipa::path(
    get,
    path = "/environments/{env_id}",
    params(("env_id" = String, Path, description = "Environment id")),
    responses(
        (status = 200, description = "Environment topology", body = EnvironmentDetail),
        (status = 404, description = "Unknown environment")
    ),
    tag = "Environments"
)]
pub async fn environment_detail(
    State(state): State<Arc<AppState>>,
    Path(env_id): Path<String>,
) -> ApiResult<Json<EnvironmentDetail>> {
    let detail = state
        .environment_service
        .environment_detail(&env_id)
        .await
        .map_err(map_env_error)?;
    Ok(Json(detail))
}

/// GET /environments/:env_id/correlation
#[utoipa::path(
    get,
    path = "/environments/{env_id}/correlation",
    params(("env_id" = String, Path, description = "Environment id")),
    responses(
        (status = 200, description = "Topology with correlation overlays", body = EnvironmentCorrelation),
        (status = 404, description = "Unknown environment")
    ),
    tag = "Environments"
)]
pub async fn environment_correlation(
    State(state): State<Arc<AppState>>,
    Path(env_id): Path<String>,
) -> ApiResult<Json<EnvironmentCorrelation>> {
    let payload = state
        .environment_service
        .environment_correlation(&env_id)
        .await
        .map_err(map_env_error)?;
    Ok(Json(payload))
}
