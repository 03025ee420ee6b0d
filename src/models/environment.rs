//! Environment (per-tenant) views: discovery, topology and overlays.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentSummary {
    pub id: String,
    pub name: String,
    pub region: String,
    pub status: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
    pub clusters: i64,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentList {
    pub items: Vec<EnvironmentSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopologyNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopologyEdge {
    pub from: String,
    pub to: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Topology {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentDetail {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub status: String,
    pub topology: Topology,
    #[schema(value_type = Vec<Object>)]
    pub incidents: Vec<serde_json::Value>,
    pub clusters: Vec<ClusterOverlay>,
    pub node_impacts: HashMap<String, NodeImpact>,
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
}

/// Correlation cluster restricted to one environment, with host counts so the
/// UI can paint impacted topology nodes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClusterOverlay {
    pub id: String,
    pub size: i64,
    pub severity: String,
    pub medoid: String,
    pub host_breakdown: HashMap<String, i64>,
    pub os_breakdown: HashMap<String, i64>,
    pub source_breakdown: HashMap<String, i64>,
    pub sample_logs: Vec<crate::models::CorrelationSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeImpact {
    pub severity: String,
    pub clusters: Vec<NodeImpactCluster>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeImpactCluster {
    pub id: String,
    pub weight: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentCorrelation {
    pub environment_id: String,
    pub topology: Topology,
    pub clusters: Vec<ClusterOverlay>,
    pub node_impacts: HashMap<String, NodeImpact>,
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
}
