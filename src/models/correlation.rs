//! Cross-source correlation payloads
//!
//! Shared shapes for the global clustering endpoints, the graph projection
//! and the incidents view derived from env-scoped clusters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// One cross-source cluster, produced either by HDBSCAN over prototypes or
/// by the single-pass scan over logs. Both paths emit this same shape.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GlobalCluster {
    pub id: String,
    pub size: i64,
    #[serde(default)]
    pub centroid: Vec<f32>,
    pub medoid_document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub source_breakdown: HashMap<String, i64>,
    #[serde(default)]
    pub os_breakdown: HashMap<String, i64>,
    #[serde(default)]
    pub sample_logs: Vec<CorrelationSample>,
}

/// Evidence log carried inside a correlation cluster.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CorrelationSample {
    pub id: String,
    pub document: String,
    pub os: String,
    pub source: String,
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_id: Option<String>,
}

/// `GET /correlation/global` response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClustersPayload {
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
    pub clusters: Vec<GlobalCluster>,
}

impl ClustersPayload {
    pub fn empty(params: serde_json::Value) -> Self {
        Self { params, clusters: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medoid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub shared_hosts: Vec<String>,
}

/// `GET /correlation/graph` response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GraphPayload {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
}

impl GraphPayload {
    pub fn empty(params: serde_json::Value) -> Self {
        Self { nodes: Vec::new(), edges: Vec::new(), params }
    }
}

/// Incident view of an env-scoped cluster.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Incident {
    pub id: String,
    pub env_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_id: Option<String>,
    pub summary: String,
    pub severity: String,
    pub size: i64,
    pub logs: Vec<IncidentLog>,
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IncidentLog {
    pub id: String,
    pub raw: String,
    pub source: String,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_id: Option<String>,
}
