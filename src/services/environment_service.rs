//! Environment views
//!
//! Environments are discovered from log metadata rather than configured: any
//! `env_id` seen in an ingested log is an environment. Discovery is bounded
//! by a wall-clock timeout with a static fallback so the list endpoint stays
//! fast even when the vector store is slow or down.

use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    ClusterOverlay, Coordinates, EnvironmentCorrelation, EnvironmentDetail, EnvironmentList,
    EnvironmentSummary, NodeImpact, NodeImpactCluster, OsKind, Topology, TopologyEdge,
    TopologyNode,
};
use crate::services::cross_correlation::{
    extract_host_identifiers, severity_from_medoid, CrossCorrelation, GlobalClusterParams,
};
use crate::services::vector_store::{CollectionNames, GetOptions, VectorStore};
use crate::utils::TtlCache;

const DISCOVERY_LIMIT_PER_COLLECTION: usize = 500;
const ENV_LOGS_LIMIT_PER_COLLECTION: usize = 300;
const CORRELATION_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("env_id {0} not found in ingested data")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct EnvironmentService {
    store: Arc<dyn VectorStore>,
    names: CollectionNames,
    correlation: Arc<CrossCorrelation>,
    fallback_env_ids: Vec<String>,
    discovery_timeout: Duration,
    clustering_disabled: bool,
    correlation_cache: TtlCache<String, EnvironmentCorrelation>,
}

impl EnvironmentService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        names: CollectionNames,
        correlation: Arc<CrossCorrelation>,
        fallback_env_ids: Vec<String>,
        discovery_timeout: Duration,
        clustering_disabled: bool,
    ) -> Self {
        Self {
            store,
            names,
            correlation,
            fallback_env_ids,
            discovery_timeout,
            clustering_disabled,
            correlation_cache: TtlCache::new(CORRELATION_CACHE_TTL),
        }
    }

    /// Scan log metadatas to discover env_ids present in ingested logs.
    async fn discover_env_ids(&self) -> HashSet<String> {
        let mut env_ids: HashSet<String> = HashSet::new();
        for os in OsKind::ALL {
            let rows = match self
                .store
                .get(&self.names.logs(os), GetOptions::recent(DISCOVERY_LIMIT_PER_COLLECTION))
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::info!("env discover: failed for os={} err={}", os, e);
                    continue;
                },
            };
            for row in rows {
                if let Some(env) = row.metadata.get("env_id").and_then(|v| v.as_str()) {
                    let trimmed = env.trim();
                    if !trimmed.is_empty() {
                        env_ids.insert(trimmed.to_string());
                    }
                }
            }
        }
        env_ids
    }

    /// Discovery bounded by the configured timeout; degrades to the static
    /// fallback set.
    pub async fn known_env_ids(&self) -> HashSet<String> {
        if self.clustering_disabled {
            return self.fallback_env_ids.iter().cloned().collect();
        }
        match tokio::time::timeout(self.discovery_timeout, self.discover_env_ids()).await {
            Ok(ids) => ids,
            Err(_) => {
                tracing::info!(
                    "env list: discovery timed out after {:?}, using fallback",
                    self.discovery_timeout
                );
                self.fallback_env_ids.iter().cloned().collect()
            },
        }
    }

    pub async fn list_environments(&self) -> EnvironmentList {
        let env_ids: BTreeSet<String> = self.known_env_ids().await.into_iter().collect();
        let now = Utc::now().to_rfc3339();
        let items = env_ids
            .into_iter()
            .map(|env_id| {
                let coordinates = region_coordinates(&env_id);
                EnvironmentSummary {
                    name: display_name(&env_id),
                    region: env_id.clone(),
                    status: "healthy".to_string(),
                    last_updated: now.clone(),
                    clusters: 0,
                    coordinates,
                    id: env_id,
                }
            })
            .collect();
        EnvironmentList { items }
    }

    pub async fn environment_detail(
        &self,
        env_id: &str,
    ) -> Result<EnvironmentDetail, EnvironmentError> {
        let known = self.known_env_ids().await;
        if !known.contains(env_id) {
            return Err(EnvironmentError::NotFound(env_id.to_string()));
        }

        // Keep detail fast: correlation overlays are computed separately.
        let topology = if self.clustering_disabled {
            Topology::default()
        } else {
            self.build_topology(env_id).await
        };

        Ok(EnvironmentDetail {
            id: env_id.to_string(),
            name: display_name(env_id),
            region: None,
            status: "healthy".to_string(),
            topology,
            incidents: Vec::new(),
            clusters: Vec::new(),
            node_impacts: HashMap::new(),
            params: json!({ "timestamp": Utc::now().to_rfc3339() }),
        })
    }

    pub async fn environment_correlation(
        &self,
        env_id: &str,
    ) -> Result<EnvironmentCorrelation, EnvironmentError> {
        let known = self.known_env_ids().await;
        if !known.contains(env_id) {
            return Err(EnvironmentError::NotFound(env_id.to_string()));
        }

        if let Some(cached) = self.correlation_cache.get(&env_id.to_string()) {
            return Ok(cached);
        }

        let payload = if self.clustering_disabled {
            EnvironmentCorrelation {
                environment_id: env_id.to_string(),
                topology: Topology::default(),
                clusters: Vec::new(),
                node_impacts: HashMap::new(),
                params: json!({ "disabled": true }),
            }
        } else {
            let topology = self.build_topology(env_id).await;
            let (clusters, node_impacts, params) = self.build_overlays(env_id).await;
            EnvironmentCorrelation {
                environment_id: env_id.to_string(),
                topology,
                clusters,
                node_impacts,
                params,
            }
        };

        self.correlation_cache.insert(env_id.to_string(), payload.clone());
        Ok(payload)
    }

    /// Topology nodes from host identifiers, edges from explicit from/to and
    /// depends_on fields in the raw JSON payloads.
    async fn build_topology(&self, env_id: &str) -> Topology {
        let mut nodes: HashMap<String, TopologyNode> = HashMap::new();
        let mut node_order: Vec<String> = Vec::new();
        let mut edges: Vec<TopologyEdge> = Vec::new();

        for os in OsKind::ALL {
            let rows = match self
                .store
                .get(
                    &self.names.logs(os),
                    GetOptions::by_meta("env_id", env_id, ENV_LOGS_LIMIT_PER_COLLECTION),
                )
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::info!("env logs: failed for os={} err={}", os, e);
                    continue;
                },
            };

            for row in rows {
                let raw = row
                    .metadata
                    .get("raw")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| row.document.clone());

                for host in extract_host_identifiers(&raw) {
                    if !nodes.contains_key(&host) {
                        node_order.push(host.clone());
                        nodes.insert(
                            host.clone(),
                            TopologyNode {
                                id: host.clone(),
                                label: host.clone(),
                                kind: "server".to_string(),
                                status: "healthy".to_string(),
                            },
                        );
                    }
                }

                if let Ok(serde_json::Value::Object(obj)) =
                    serde_json::from_str::<serde_json::Value>(&raw)
                {
                    if let (Some(from), Some(to)) = (
                        obj.get("from").and_then(|v| v.as_str()),
                        obj.get("to").and_then(|v| v.as_str()),
                    ) {
                        edges.push(TopologyEdge {
                            from: from.to_string(),
                            to: to.to_string(),
                            status: "healthy".to_string(),
                        });
                    }
                    if let Some(serde_json::Value::Array(deps)) = obj.get("depends_on") {
                        let target = obj
                            .get("id")
                            .or_else(|| obj.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        for dep in deps {
                            if let Some(dep) = dep.as_str() {
                                edges.push(TopologyEdge {
                                    from: dep.to_string(),
                                    to: target.to_string(),
                                    status: "healthy".to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        Topology {
            nodes: node_order.into_iter().filter_map(|id| nodes.remove(&id)).collect(),
            edges,
        }
    }

    /// Env-scoped clusters projected into overlays plus per-node impact
    /// severities.
    async fn build_overlays(
        &self,
        env_id: &str,
    ) -> (Vec<ClusterOverlay>, HashMap<String, NodeImpact>, serde_json::Value) {
        // Keep env correlation responsive: cap the total work. This endpoint
        // is hit on navigation, so it must not monopolize the API.
        let request = GlobalClusterParams {
            limit_per_source: 80,
            include_logs_per_cluster: 12,
            env_id: Some(env_id.to_string()),
            max_items_per_os: 400,
            ..Default::default()
        };
        let payload = match self.correlation.global_clusters(request).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::info!("env correlation clustering failed env={} err={}", env_id, e);
                return (Vec::new(), HashMap::new(), json!({ "error": "clustering_failed" }));
            },
        };

        let mut overlays: Vec<ClusterOverlay> = Vec::new();
        let mut node_impacts: HashMap<String, NodeImpact> = HashMap::new();

        for cluster in &payload.clusters {
            if cluster.id.is_empty() {
                continue;
            }
            let mut host_counts: HashMap<String, i64> = HashMap::new();
            for sample in &cluster.sample_logs {
                for host in extract_host_identifiers(&sample.raw) {
                    *host_counts.entry(host).or_default() += 1;
                }
            }
            if host_counts.is_empty() {
                continue;
            }

            let severity = severity_from_medoid(&cluster.medoid_document);

            for (node_id, count) in &host_counts {
                let impact = node_impacts.entry(node_id.clone()).or_insert(NodeImpact {
                    severity: "healthy".to_string(),
                    clusters: Vec::new(),
                });
                impact
                    .clusters
                    .push(NodeImpactCluster { id: cluster.id.clone(), weight: *count });
                if severity == "critical" {
                    impact.severity = "critical".to_string();
                } else if severity == "warning" && impact.severity != "critical" {
                    impact.severity = "warning".to_string();
                }
            }

            overlays.push(ClusterOverlay {
                id: cluster.id.clone(),
                size: cluster.size,
                severity: severity.to_string(),
                medoid: cluster.medoid_document.clone(),
                host_breakdown: host_counts,
                os_breakdown: cluster.os_breakdown.clone(),
                source_breakdown: cluster.source_breakdown.clone(),
                sample_logs: cluster.sample_logs.iter().take(10).cloned().collect(),
            });
        }

        overlays.sort_by(|a, b| b.size.cmp(&a.size));
        (overlays, node_impacts, payload.params)
    }
}

fn display_name(env_id: &str) -> String {
    env_id
        .split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic demo coordinates. Generic env-NNN ids rotate through widely
/// separated cities so every environment renders as a distinct map point;
/// region-style ids map to their datacenter metro.
fn region_coordinates(env_id: &str) -> Coordinates {
    let lowered = env_id.to_lowercase();

    if lowered.starts_with("env-") {
        let number: usize = env_id
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .unwrap_or(1);
        let locations = [
            Coordinates { lat: 61.2181, lng: -149.9003 }, // Anchorage
            Coordinates { lat: 25.7617, lng: -80.1918 },  // Miami
            Coordinates { lat: 21.3069, lng: -157.8583 }, // Honolulu
            Coordinates { lat: 44.8113, lng: -91.4985 },  // Eau Claire
            Coordinates { lat: 32.7157, lng: -117.1611 }, // San Diego
            Coordinates { lat: 42.3601, lng: -71.0589 },  // Boston
        ];
        return locations[(number.max(1) - 1) % locations.len()];
    }

    if lowered.contains("us-east-1") || lowered.contains("virginia") {
        return Coordinates { lat: 39.0438, lng: -77.4878 };
    }
    if lowered.contains("us-east") || lowered.contains("east") {
        return Coordinates { lat: 35.2271, lng: -80.8431 };
    }
    if lowered.contains("us-west-2") || lowered.contains("oregon") {
        return Coordinates { lat: 45.5152, lng: -122.6784 };
    }
    if lowered.contains("us-west") || lowered.contains("west") {
        return Coordinates { lat: 37.4419, lng: -122.143 };
    }
    if lowered.contains("eu-west-1") || lowered.contains("ireland") {
        return Coordinates { lat: 53.3498, lng: -6.2603 };
    }
    if lowered.contains("eu-west-2") || lowered.contains("london") {
        return Coordinates { lat: 51.5074, lng: -0.1278 };
    }
    if lowered.contains("eu-central-1") || lowered.contains("frankfurt") {
        return Coordinates { lat: 50.1109, lng: 8.6821 };
    }
    if lowered.contains("ap-southeast-1") || lowered.contains("singapore") {
        return Coordinates { lat: 1.3521, lng: 103.8198 };
    }
    if lowered.contains("ap-southeast-2") || lowered.contains("sydney") {
        return Coordinates { lat: -33.8688, lng: 151.2093 };
    }
    if lowered.contains("ap-northeast-1") || lowered.contains("tokyo") {
        return Coordinates { lat: 35.6762, lng: 139.6503 };
    }
    if lowered.contains("sa-east-1") || lowered.contains("sao") {
        return Coordinates { lat: -23.5505, lng: -46.6333 };
    }

    Coordinates { lat: 39.0438, lng: -77.4878 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::HashingEmbedder;
    use crate::services::vector_store::{metadata, MemoryVectorStore, NewRecord};

    fn service(clustering_disabled: bool) -> (EnvironmentService, Arc<MemoryVectorStore>) {
        let store = Arc::new(MemoryVectorStore::new(Arc::new(HashingEmbedder::new(256))));
        let names = CollectionNames::new("logs_", "prototypes_", "templates_", "feature-hash::256");
        let correlation = Arc::new(CrossCorrelation::new(
            store.clone(),
            names.clone(),
            None,
            0.45,
            2,
        ));
        let service = EnvironmentService::new(
            store.clone(),
            names,
            correlation,
            vec!["env-001".to_string(), "env-002".to_string(), "env-003".to_string()],
            Duration::from_secs(2),
            clustering_disabled,
        );
        (service, store)
    }

    fn env_record(id: &str, env: &str, raw: &str) -> NewRecord {
        NewRecord {
            id: id.to_string(),
            document: raw.to_string(),
            metadata: metadata(&[
                ("raw", raw.into()),
                ("source", "scom:host".into()),
                ("env_id", env.into()),
            ]),
        }
    }

    #[tokio::test]
    async fn discovery_finds_env_ids_in_metadata() {
        let (service, store) = service(false);
        store
            .add(
                "logs_windows__feature-hash_256",
                vec![env_record("1-0", "env-007", r#"{"host":"w1"}"#)],
            )
            .await
            .unwrap();
        let ids = service.known_env_ids().await;
        assert!(ids.contains("env-007"));
    }

    #[tokio::test]
    async fn disabled_clustering_uses_fallback_envs() {
        let (service, _) = service(true);
        let list = service.list_environments().await;
        let ids: Vec<&str> = list.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["env-001", "env-002", "env-003"]);
        assert_eq!(list.items[0].name, "Env 001");
    }

    #[tokio::test]
    async fn unknown_env_detail_is_not_found() {
        let (service, _) = service(true);
        let err = service.environment_detail("env-404").await.unwrap_err();
        assert!(matches!(err, EnvironmentError::NotFound(_)));
    }

    #[tokio::test]
    async fn correlation_counts_hosts_across_logs() {
        let (service, store) = service(false);
        let line = |host: &str| {
            format!(r#"{{"host":"{}","Message":"disk failed with i/o error"}}"#, host)
        };
        store
            .add(
                "logs_windows__feature-hash_256",
                vec![
                    env_record("1-0", "env-002", &line("host-a")),
                    env_record("1-1", "env-002", &line("host-b")),
                    env_record("1-2", "env-002", &line("host-c")),
                ],
            )
            .await
            .unwrap();

        let payload = service.environment_correlation("env-002").await.unwrap();
        assert_eq!(payload.clusters.len(), 1);
        let overlay = &payload.clusters[0];
        assert_eq!(overlay.host_breakdown.len(), 3);
        assert_eq!(overlay.severity, "critical");
        for host in ["host-a", "host-b", "host-c"] {
            assert_eq!(payload.node_impacts.get(host).unwrap().severity, "critical");
        }
    }

    #[test]
    fn env_number_rotation_is_stable() {
        let a = region_coordinates("env-001");
        let b = region_coordinates("env-002");
        assert_ne!(a.lat.to_bits(), b.lat.to_bits());
        let again = region_coordinates("env-001");
        assert_eq!(a.lat.to_bits(), again.lat.to_bits());
    }

    #[test]
    fn region_keywords_map_to_metros() {
        let frankfurt = region_coordinates("prod-eu-central-1");
        assert!((frankfurt.lat - 50.1109).abs() < 1e-6);
    }
}
