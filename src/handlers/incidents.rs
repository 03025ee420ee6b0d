//! Incidents API: env-scoped correlation clusters projected into incidents
//! with evidence logs.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Incident, IncidentLog};
use crate::services::cross_correlation::severity_from_medoid;
use crate::services::GlobalClusterParams;
use crate::AppState;

const COMPUTE_TIMEOUT: Duration = Duration::from_secs(30);

fn default_limit() -> usize {
    100
}
fn default_include_logs() -> usize {
    8
}
fn default_limit_per_source() -> usize {
    50
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListIncidentsParams {
    /// Max incidents to return (1-1000).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Filter incidents to a specific environment id (or leave empty for all).
    pub env_id: Option<String>,
    /// How many evidence logs to include per incident (0-50).
    #[serde(default = "default_include_logs")]
    pub include_logs: usize,
    /// Cap logs per source before clustering (1-500).
    #[serde(default = "default_limit_per_source")]
    pub limit_per_source: usize,
}

/// GET /incidents
#[utoipa::path(
    get,
    path = "/incidents",
    params(ListIncidentsParams),
    responses((status = 200, description = "Incidents with evidence logs", body = [Incident])),
    tag = "Incidents"
)]
pub async fn list_incidents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListIncidentsParams>,
) -> Json<Vec<Incident>> {
    let limit = params.limit.clamp(1, 1000);
    let include_logs = params.include_logs.min(50);
    let limit_per_source = params.limit_per_source.clamp(1, 500);

    let cache_key = format!(
        "{}|{}|{}|{}",
        params.env_id.as_deref().unwrap_or("__all__"),
        limit,
        include_logs,
        limit_per_source
    );
    if let Some(cached) = state.incidents_cache.get(&cache_key) {
        return Json(cached);
    }

    if state.config.correlation.disable_global_clustering {
        state.incidents_cache.insert(cache_key, Vec::new());
        return Json(Vec::new());
    }

    let request = GlobalClusterParams {
        limit_per_source,
        include_logs_per_cluster: include_logs,
        env_id: params.env_id.clone(),
        max_items_per_os: 600,
        ..Default::default()
    };
    let payload = match tokio::time::timeout(
        COMPUTE_TIMEOUT,
        state.correlation.global_clusters(request),
    )
    .await
    {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            tracing::info!("incidents clustering failed err={:#}", e);
            state.incidents_cache.insert(cache_key, Vec::new());
            return Json(Vec::new());
        },
        Err(_) => {
            tracing::info!("incidents clustering timed out after {:?}", COMPUTE_TIMEOUT);
            state.incidents_cache.insert(cache_key, Vec::new());
            return Json(Vec::new());
        },
    };

    let incidents: Vec<Incident> = payload
        .clusters
        .iter()
        .take(limit)
        .map(|cluster| {
            let mut env_ids: Vec<String> = Vec::new();
            for sample in &cluster.sample_logs {
                if let Some(env) = &sample.env_id {
                    if !env.is_empty() && !env_ids.contains(env) {
                        env_ids.push(env.clone());
                    }
                }
            }
            Incident {
                id: cluster.id.clone(),
                env_id: if env_ids.len() == 1 { Some(env_ids[0].clone()) } else { None },
                env_ids,
                summary: cluster.medoid_document.clone(),
                severity: severity_from_medoid(&cluster.medoid_document).to_string(),
                size: cluster.size,
                logs: cluster
                    .sample_logs
                    .iter()
                    .map(|sample| IncidentLog {
                        id: sample.id.clone(),
                        raw: sample.raw.clone(),
                        source: sample.source.clone(),
                        os: sample.os.clone(),
                        env_id: sample.env_id.clone(),
                    })
                    .collect(),
                params: payload.params.clone(),
            }
        })
        .collect();

    state.incidents_cache.insert(cache_key, incidents.clone());
    Json(incidents)
}
