//! Global correlation API: cross-source clusters and their graph projection.
//!
//! Compute failures never surface as 5xx here; they degrade to an empty
//! payload with `params.error = "clustering_failed"` so dashboards keep
//! rendering.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{ClustersPayload, GraphPayload};
use crate::services::{build_graph, GlobalClusterParams};
use crate::AppState;

fn default_limit_per_source() -> usize {
    200
}
fn default_min_cluster_size() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CorrelationParams {
    /// Max logs per distinct source (for logs basis).
    #[serde(default = "default_limit_per_source")]
    pub limit_per_source: usize,
    /// Override cluster distance threshold (for single-pass logs).
    pub threshold: Option<f64>,
    /// Override minimum cluster size (for single-pass logs).
    pub min_size: Option<usize>,
    /// Sample logs per cluster in response.
    pub include_logs_per_cluster: Option<usize>,
    /// Clustering algorithm: "hdbscan" | "single_pass".
    pub algorithm: Option<String>,
    /// Clustering basis: "prototypes" | "logs".
    pub basis: Option<String>,
    /// HDBSCAN min_cluster_size when algorithm=hdbscan.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// HDBSCAN min_samples when algorithm=hdbscan (default=min_cluster_size).
    pub min_samples: Option<usize>,
}

struct ResolvedParams {
    limit_per_source: usize,
    threshold: Option<f64>,
    min_size: Option<usize>,
    include_logs_per_cluster: usize,
    algorithm: String,
    basis: String,
    min_cluster_size: usize,
    min_samples: Option<usize>,
}

impl ResolvedParams {
    /// Apply defaults plus the DISABLE_HDBSCAN safe mode, which forces the
    /// lightweight single-pass path with reduced caps.
    fn resolve(
        params: &CorrelationParams,
        hdbscan_disabled: bool,
        default_include: usize,
        safe_mode_include_cap: usize,
    ) -> Self {
        let mut algorithm = params
            .algorithm
            .clone()
            .unwrap_or_else(|| "hdbscan".to_string());
        let mut basis = params.basis.clone().unwrap_or_else(|| "prototypes".to_string());
        let mut limit_per_source = params.limit_per_source.clamp(1, 2000);
        let mut include_logs_per_cluster =
            params.include_logs_per_cluster.unwrap_or(default_include).min(200);

        if hdbscan_disabled {
            algorithm = "single_pass".to_string();
            basis = "logs".to_string();
            limit_per_source = limit_per_source.min(20);
            include_logs_per_cluster = include_logs_per_cluster.min(safe_mode_include_cap);
        }

        Self {
            limit_per_source,
            threshold: params.threshold,
            min_size: params.min_size,
            include_logs_per_cluster,
            algorithm,
            basis,
            min_cluster_size: params.min_cluster_size.clamp(2, 1000),
            min_samples: params.min_samples,
        }
    }

    fn cache_key(&self, route: &str) -> String {
        format!(
            "{}|{}|{:?}|{:?}|{}|{}|{}|{}|{:?}",
            route,
            self.limit_per_source,
            self.threshold,
            self.min_size,
            self.include_logs_per_cluster,
            self.algorithm,
            self.basis,
            self.min_cluster_size,
            self.min_samples,
        )
    }
}

/// Shared compute with mode dispatch and the demo-friendly fallback: an empty
/// HDBSCAN result falls through to single-pass over logs so the UI still has
/// something to show.
async fn compute_clusters(state: &AppState, resolved: &ResolvedParams) -> ClustersPayload {
    if state.config.correlation.disable_global_clustering {
        return ClustersPayload::empty(serde_json::json!({ "disabled": true }));
    }

    if state.config.correlation.fallback_redis {
        return match state
            .correlation
            .redis_grouped_clusters(
                300,
                resolved.min_cluster_size.max(2),
                resolved.include_logs_per_cluster,
            )
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                tracing::info!("grouped fallback failed err={:#}", e);
                ClustersPayload::empty(serde_json::json!({ "error": "clustering_failed" }))
            },
        };
    }

    if resolved.basis == "prototypes" && resolved.algorithm == "hdbscan" {
        let proto_result = state
            .correlation
            .prototype_clusters_hdbscan(
                resolved.min_cluster_size,
                resolved.min_samples,
                resolved.include_logs_per_cluster,
            )
            .await;
        let proto_result = match proto_result {
            Ok(payload) => payload,
            Err(e) => {
                tracing::info!("global correlation clustering failed err={:#}", e);
                return ClustersPayload::empty(
                    serde_json::json!({ "error": "clustering_failed" }),
                );
            },
        };
        if !proto_result.clusters.is_empty() {
            return proto_result;
        }

        // Be slightly more permissive than the default to encourage forming
        // clusters on the fallback path.
        let fallback_min_size = resolved
            .min_size
            .unwrap_or_else(|| (state.correlation.default_min_size() / 2).max(2));
        let request = GlobalClusterParams {
            limit_per_source: resolved.limit_per_source,
            threshold: resolved.threshold,
            min_size: Some(fallback_min_size),
            include_logs_per_cluster: resolved.include_logs_per_cluster,
            env_id: None,
            max_items_per_os: 200,
        };
        return match state.correlation.global_clusters(request).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::info!("global correlation logs fallback failed err={:#}", e);
                ClustersPayload::empty(serde_json::json!({ "error": "clustering_failed" }))
            },
        };
    }

    // Explicit logs-based path (or non-HDBSCAN algorithm)
    let request = GlobalClusterParams {
        limit_per_source: resolved.limit_per_source,
        threshold: resolved.threshold,
        min_size: resolved.min_size,
        include_logs_per_cluster: resolved.include_logs_per_cluster,
        env_id: None,
        max_items_per_os: 200,
    };
    match state.correlation.global_clusters(request).await {
        Ok(payload) => payload,
        Err(e) => {
            tracing::info!("global correlation logs failed err={:#}", e);
            ClustersPayload::empty(serde_json::json!({ "error": "clustering_failed" }))
        },
    }
}

/// GET /correlation/global
#[utoipa::path(
    get,
    path = "/correlation/global",
    params(CorrelationParams),
    responses((status = 200, description = "Cross-source clusters", body = ClustersPayload)),
    tag = "Correlation"
)]
pub async fn global_correlation(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CorrelationParams>,
) -> Json<ClustersPayload> {
    let resolved = ResolvedParams::resolve(
        &params,
        state.config.correlation.disable_hdbscan,
        20,
        10,
    );
    let cache_key = resolved.cache_key("global");
    if let Some(cached) = state.correlation_cache.get(&cache_key) {
        return Json(cached);
    }

    let payload = compute_clusters(&state, &resolved).await;
    state.correlation_cache.insert(cache_key, payload.clone());
    Json(payload)
}

/// GET /correlation/graph
#[utoipa::path(
    get,
    path = "/correlation/graph",
    params(CorrelationParams),
    responses((status = 200, description = "Cluster graph projection", body = GraphPayload)),
    tag = "Correlation"
)]
pub async fn correlation_graph(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CorrelationParams>,
) -> Json<GraphPayload> {
    let resolved = ResolvedParams::resolve(
        &params,
        state.config.correlation.disable_hdbscan,
        5,
        5,
    );
    let cache_key = resolved.cache_key("graph");
    if let Some(cached) = state.graph_cache.get(&cache_key) {
        return Json(cached);
    }

    if state.config.correlation.disable_global_clustering {
        let payload = GraphPayload::empty(serde_json::json!({ "disabled": true }));
        state.graph_cache.insert(cache_key, payload.clone());
        return Json(payload);
    }

    let base = compute_clusters(&state, &resolved).await;
    let payload = build_graph(&base);
    state.graph_cache.insert(cache_key, payload.clone());
    Json(payload)
}
