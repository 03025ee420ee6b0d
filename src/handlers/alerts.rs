//! Alert API handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{AlertListItem, AlertOpResponse, FeedbackKind};
use crate::services::AlertStoreError;
use crate::utils::{ApiError, ApiResult};
use crate::AppState;

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListAlertsParams {
    /// Max alerts to return (1-1000).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Filter alerts to a specific environment id (or leave empty for all).
    pub env_id: Option<String>,
}

fn map_store_error(err: AlertStoreError) -> ApiError {
    match err {
        AlertStoreError::NotFound => ApiError::NotFound("alert not found".to_string()),
        AlertStoreError::Redis(e) => ApiError::Internal(e.into()),
    }
}

/// List alerts from the stream window plus any persisted ones.
/// GET /alerts
#[utoipa::path(
    get,
    path = "/alerts",
    params(ListAlertsParams),
    responses((status = 200, description = "Alerts newest first", body = [AlertListItem])),
    tag = "Alerts"
)]
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListAlertsParams>,
) -> ApiResult<Json<Vec<AlertListItem>>> {
    let limit = params.limit.clamp(1, 1000);
    let alerts = state
        .alert_store
        .list_alerts(limit, params.env_id.as_deref())
        .await
        .map_err(map_store_error)?;
    Ok(Json(alerts))
}

/// Persist an alert beyond TTL.
/// POST /alerts/:entry_id/persist
#[utoipa::path(
    post,
    path = "/alerts/{entry_id}/persist",
    params(("entry_id" = String, Path, description = "Alert stream entry id")),
    responses(
        (status = 200, description = "Alert persisted", body = AlertOpResponse),
        (status = 404, description = "Alert not found")
    ),
    tag = "Alerts"
)]
pub async fn persist_alert(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> ApiResult<Json<AlertOpResponse>> {
    state
        .alert_store
        .persist_alert(&entry_id)
        .await
        .map_err(map_store_error)?;
    Ok(Json(AlertOpResponse { status: "ok".to_string(), id: entry_id, feedback: None }))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeedbackParams {
    pub feedback: FeedbackKind,
}

/// Record operator feedback on an alert.
/// POST /alerts/:entry_id/feedback?feedback=correct|incorrect
#[utoipa::path(
    post,
    path = "/alerts/{entry_id}/feedback",
    params(
        ("entry_id" = String, Path, description = "Alert stream entry id"),
        FeedbackParams
    ),
    responses(
        (status = 200, description = "Feedback recorded", body = AlertOpResponse),
        (status = 404, description = "Alert not found")
    ),
    tag = "Alerts"
)]
pub async fn add_feedback(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
    Query(params): Query<FeedbackParams>,
) -> ApiResult<Json<AlertOpResponse>> {
    state
        .alert_store
        .add_feedback(&entry_id, params.feedback)
        .await
        .map_err(map_store_error)?;
    Ok(Json(AlertOpResponse {
        status: "ok".to_string(),
        id: entry_id,
        feedback: Some(params.feedback.as_str().to_string()),
    }))
}
