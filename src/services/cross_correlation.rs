//! Cross-source correlation
//!
//! Offline clustering across everything the pipeline has stored. Two modes:
//! HDBSCAN over the per-OS prototype collections (default), and a single-pass
//! running-mean scan over recent log documents (fallback, also used for
//! env-scoped views). A third grouped-by-text mode reads the raw stream for
//! constrained deployments with no usable vector store.

use hdbscan::{DistanceMetric, Hdbscan, HdbscanHyperParams};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::models::{ClustersPayload, CorrelationSample, GlobalCluster, GraphEdge, GraphNode,
    GraphPayload, OsKind};
use crate::services::redis_client::{RedisClient, LOGS_STREAM};
use crate::services::vector_store::{CollectionNames, GetOptions, StoredRecord, VectorStore};

/// Keywords promoting a cluster to critical severity.
const CRITICAL_KEYWORDS: [&str; 7] =
    ["failed", "error", "critical", "i/o error", "out of memory", "servfail", "timeout"];

pub fn severity_from_medoid(medoid: &str) -> &'static str {
    let lowered = medoid.to_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        "critical"
    } else {
        "warning"
    }
}

/// Extract likely host/device identifiers from a JSON log line. The priority
/// order is fixed so graphs stay reproducible across runs.
pub fn extract_host_identifiers(raw: &str) -> Vec<String> {
    let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(raw)
    else {
        return Vec::new();
    };

    let mut out: Vec<String> = Vec::new();

    for key in
        ["ComputerName", "computerName", "host", "device_name", "device", "hostname", "name", "testName"]
    {
        if let Some(serde_json::Value::String(v)) = obj.get(key) {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
                break;
            }
        }
    }

    if let Some(serde_json::Value::Object(affected)) = obj.get("affectedComponent") {
        let name = affected.get("name").or_else(|| affected.get("id"));
        if let Some(serde_json::Value::String(v)) = name {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
    }

    for key in ["ip", "device_ip", "deviceIp", "managementIpAddr", "dst_ip", "src_ip"] {
        if let Some(serde_json::Value::String(v)) = obj.get(key) {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut deduped: Vec<String> = Vec::new();
    for value in &out {
        if seen.insert(value.as_str()) {
            deduped.push(value.clone());
        }
    }
    deduped
}

/// Parameters for the single-pass logs clustering.
#[derive(Debug, Clone)]
pub struct GlobalClusterParams {
    pub limit_per_source: usize,
    pub threshold: Option<f64>,
    pub min_size: Option<usize>,
    pub include_logs_per_cluster: usize,
    pub env_id: Option<String>,
    pub max_items_per_os: usize,
}

impl Default for GlobalClusterParams {
    fn default() -> Self {
        Self {
            limit_per_source: 200,
            threshold: None,
            min_size: None,
            include_logs_per_cluster: 20,
            env_id: None,
            max_items_per_os: 200,
        }
    }
}

pub struct CrossCorrelation {
    store: Arc<dyn VectorStore>,
    names: CollectionNames,
    /// Only needed for the grouped raw-stream fallback.
    redis: Option<RedisClient>,
    default_threshold: f64,
    default_min_size: usize,
}

impl CrossCorrelation {
    pub fn new(
        store: Arc<dyn VectorStore>,
        names: CollectionNames,
        redis: Option<RedisClient>,
        default_threshold: f64,
        default_min_size: usize,
    ) -> Self {
        Self { store, names, redis, default_threshold, default_min_size }
    }

    pub fn default_min_size(&self) -> usize {
        self.default_min_size
    }

    // ------------------------------------------------------------------
    // HDBSCAN over prototypes
    // ------------------------------------------------------------------

    pub async fn prototype_clusters_hdbscan(
        &self,
        min_cluster_size: usize,
        min_samples: Option<usize>,
        include_logs_per_cluster: usize,
    ) -> Result<ClustersPayload, anyhow::Error> {
        let mut records: Vec<(OsKind, StoredRecord)> = Vec::new();
        for os in OsKind::ALL {
            let rows = self
                .store
                .get(&self.names.prototypes(os), GetOptions::recent(5000))
                .await?;
            records.extend(rows.into_iter().map(|r| (os, r)));
        }

        let params = json!({
            "algorithm": "hdbscan",
            "basis": "prototypes",
            "min_cluster_size": min_cluster_size,
            "min_samples": min_samples,
            "include_logs_per_cluster": include_logs_per_cluster,
            "prototype_count": records.len(),
        });

        let data: Vec<Vec<f32>> = records
            .iter()
            .map(|(_, r)| r.embedding.clone())
            .filter(|e| !e.is_empty())
            .collect();
        if data.len() < min_cluster_size.max(2) || data.len() != records.len() {
            return Ok(ClustersPayload::empty(params));
        }

        // The density scan is CPU-bound; keep it off the async runtime.
        let labels = tokio::task::spawn_blocking(move || {
            let hyper_params = HdbscanHyperParams::builder()
                .min_cluster_size(min_cluster_size)
                .min_samples(min_samples.unwrap_or(min_cluster_size))
                .dist_metric(DistanceMetric::Euclidean)
                .build();
            Hdbscan::new(&data, hyper_params).cluster()
        })
        .await?
        .map_err(|e| anyhow::anyhow!("hdbscan failed: {:?}", e))?;

        let mut grouped: HashMap<i32, Vec<usize>> = HashMap::new();
        for (index, label) in labels.iter().enumerate() {
            if *label >= 0 {
                grouped.entry(*label).or_default().push(index);
            }
        }

        let mut clusters: Vec<GlobalCluster> = Vec::new();
        let mut ordered: Vec<(i32, Vec<usize>)> = grouped.into_iter().collect();
        ordered.sort_by_key(|(label, _)| *label);

        for (position, (_, member_indices)) in ordered.into_iter().enumerate() {
            let members: Vec<&(OsKind, StoredRecord)> =
                member_indices.iter().map(|i| &records[*i]).collect();

            let centroid = mean_vector(members.iter().map(|(_, r)| r.embedding.as_slice()));
            let medoid = members
                .iter()
                .min_by(|a, b| {
                    cosine_distance(&centroid, &a.1.embedding)
                        .total_cmp(&cosine_distance(&centroid, &b.1.embedding))
                })
                .map(|(_, r)| r);

            let medoid_document =
                medoid.map(|r| r.document.clone()).unwrap_or_default();

            let mut os_breakdown: HashMap<String, i64> = HashMap::new();
            let mut size: i64 = 0;
            let mut label_votes: HashMap<String, i64> = HashMap::new();
            for (os, record) in &members {
                *os_breakdown.entry(os.as_str().to_string()).or_default() += 1;
                size += record
                    .metadata
                    .get("size")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(1);
                if let Some(label) = record.metadata.get("label").and_then(|v| v.as_str()) {
                    if label != "unknown" {
                        *label_votes.entry(label.to_string()).or_default() += 1;
                    }
                }
            }
            let label = label_votes
                .into_iter()
                .max_by_key(|(_, votes)| *votes)
                .map(|(label, _)| label);

            // Evidence: logs assigned to the member prototypes.
            let mut sample_logs: Vec<CorrelationSample> = Vec::new();
            let mut source_breakdown: HashMap<String, i64> = HashMap::new();
            'members: for (os, record) in &members {
                let remaining = include_logs_per_cluster.saturating_sub(sample_logs.len());
                if remaining == 0 {
                    break 'members;
                }
                let logs = self
                    .store
                    .get(
                        &self.names.logs(*os),
                        GetOptions::by_meta("cluster_id", record.id.as_str(), remaining),
                    )
                    .await
                    .unwrap_or_default();
                for log in logs {
                    let sample = sample_from_log(*os, &log);
                    *source_breakdown.entry(sample.source.clone()).or_default() += 1;
                    sample_logs.push(sample);
                }
            }

            clusters.push(GlobalCluster {
                id: format!("pcluster_{}", position),
                size,
                centroid,
                medoid_document,
                label,
                source_breakdown,
                os_breakdown,
                sample_logs,
            });
        }

        clusters.sort_by(|a, b| b.size.cmp(&a.size));
        Ok(ClustersPayload { params, clusters })
    }

    // ------------------------------------------------------------------
    // Single pass over logs
    // ------------------------------------------------------------------

    pub async fn global_clusters(
        &self,
        request: GlobalClusterParams,
    ) -> Result<ClustersPayload, anyhow::Error> {
        let threshold = request.threshold.unwrap_or(self.default_threshold);
        let min_size = request.min_size.unwrap_or(self.default_min_size).max(1);
        let per_os_limit = request.limit_per_source.min(request.max_items_per_os).max(1);

        let mut items: Vec<(OsKind, StoredRecord)> = Vec::new();
        for os in OsKind::ALL {
            let options = match &request.env_id {
                Some(env_id) => {
                    GetOptions::by_meta("env_id", env_id.as_str(), per_os_limit)
                },
                None => GetOptions::recent(per_os_limit),
            };
            match self.store.get(&self.names.logs(os), options).await {
                Ok(rows) => items.extend(rows.into_iter().map(|r| (os, r))),
                Err(e) => {
                    tracing::info!("single-pass: scan failed os={} err={}", os, e);
                },
            }
        }

        let params = json!({
            "algorithm": "single_pass",
            "basis": "logs",
            "limit_per_source": request.limit_per_source,
            "threshold": threshold,
            "min_size": min_size,
            "include_logs_per_cluster": request.include_logs_per_cluster,
            "env_id": request.env_id,
            "scanned": items.len(),
        });

        // Running-mean centroids: each doc joins the first centroid within
        // the threshold or seeds a new one.
        struct Draft {
            centroid: Vec<f32>,
            members: Vec<usize>,
        }
        let mut drafts: Vec<Draft> = Vec::new();
        for (index, (_, record)) in items.iter().enumerate() {
            if record.embedding.is_empty() {
                continue;
            }
            let mut assigned = false;
            for draft in drafts.iter_mut() {
                if f64::from(cosine_distance(&draft.centroid, &record.embedding)) <= threshold {
                    let n = draft.members.len() as f32;
                    for (c, v) in draft.centroid.iter_mut().zip(&record.embedding) {
                        *c = (*c * n + v) / (n + 1.0);
                    }
                    draft.members.push(index);
                    assigned = true;
                    break;
                }
            }
            if !assigned {
                drafts.push(Draft { centroid: record.embedding.clone(), members: vec![index] });
            }
        }

        let mut clusters: Vec<GlobalCluster> = Vec::new();
        for (position, draft) in drafts.iter().enumerate() {
            if draft.members.len() < min_size {
                continue;
            }

            let medoid_index = draft
                .members
                .iter()
                .min_by(|a, b| {
                    cosine_distance(&draft.centroid, &items[**a].1.embedding)
                        .total_cmp(&cosine_distance(&draft.centroid, &items[**b].1.embedding))
                })
                .copied()
                .unwrap_or(draft.members[0]);

            let mut os_breakdown: HashMap<String, i64> = HashMap::new();
            let mut source_breakdown: HashMap<String, i64> = HashMap::new();
            let mut sample_logs: Vec<CorrelationSample> = Vec::new();
            for member in &draft.members {
                let (os, record) = &items[*member];
                *os_breakdown.entry(os.as_str().to_string()).or_default() += 1;
                let source = record
                    .metadata
                    .get("source")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                *source_breakdown.entry(source).or_default() += 1;
                if sample_logs.len() < request.include_logs_per_cluster {
                    sample_logs.push(sample_from_log(*os, record));
                }
            }

            clusters.push(GlobalCluster {
                id: format!("gcluster_{}", position),
                size: draft.members.len() as i64,
                centroid: draft.centroid.clone(),
                medoid_document: items[medoid_index].1.document.clone(),
                label: None,
                source_breakdown,
                os_breakdown,
                sample_logs,
            });
        }

        clusters.sort_by(|a, b| b.size.cmp(&a.size));
        Ok(ClustersPayload { params, clusters })
    }

    // ------------------------------------------------------------------
    // Grouped fallback straight off the raw stream
    // ------------------------------------------------------------------

    pub async fn redis_grouped_clusters(
        &self,
        limit: usize,
        min_size: usize,
        include_logs_per_cluster: usize,
    ) -> Result<ClustersPayload, anyhow::Error> {
        let Some(redis) = &self.redis else {
            anyhow::bail!("redis fallback requested but no redis handle configured");
        };
        let entries = redis.xrevrange_count(LOGS_STREAM, limit).await?;

        let mut groups: HashMap<String, Vec<(String, String, String)>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for entry in entries {
            let line = entry.field("line").unwrap_or_default().to_string();
            let source = entry.field("source").unwrap_or_default().to_string();
            let key = grouping_key_from_line(&line);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push((entry.id, source, line));
        }

        let mut clusters: Vec<GlobalCluster> = Vec::new();
        for (position, key) in order.iter().enumerate() {
            let items = &groups[key];
            if items.len() < min_size {
                continue;
            }
            let mut source_breakdown: HashMap<String, i64> = HashMap::new();
            let mut os_breakdown: HashMap<String, i64> = HashMap::new();
            let mut sample_logs: Vec<CorrelationSample> = Vec::new();
            for (id, source, line) in items.iter().take(include_logs_per_cluster) {
                let os_hint = source
                    .split_once(':')
                    .map(|(_, rest)| rest.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                *source_breakdown.entry(source.clone()).or_default() += 1;
                *os_breakdown.entry(os_hint.clone()).or_default() += 1;
                sample_logs.push(CorrelationSample {
                    id: id.clone(),
                    document: line.clone(),
                    os: os_hint,
                    source: source.clone(),
                    raw: line.clone(),
                    env_id: None,
                });
            }
            clusters.push(GlobalCluster {
                id: format!("gcluster_{}", position),
                size: items.len() as i64,
                centroid: Vec::new(),
                medoid_document: key.clone(),
                label: None,
                source_breakdown,
                os_breakdown,
                sample_logs,
            });
        }

        Ok(ClustersPayload {
            params: json!({
                "algorithm": "grouped",
                "basis": "redis",
                "limit": limit,
                "min_size": min_size,
                "include_logs_per_cluster": include_logs_per_cluster,
            }),
            clusters,
        })
    }
}

// ============================================================================
// Graph projection
// ============================================================================

/// Project a clusters payload into a node/edge graph. Clusters sharing at
/// least one host identifier (from their sample logs) get an edge; each
/// distinct source becomes its own node linked to the clusters it feeds.
pub fn build_graph(payload: &ClustersPayload) -> GraphPayload {
    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut edges: Vec<GraphEdge> = Vec::new();

    let mut cluster_hosts: Vec<(String, HashSet<String>)> = Vec::new();
    let mut source_counts: HashMap<String, i64> = HashMap::new();
    let mut source_links: Vec<(String, String)> = Vec::new();

    for cluster in &payload.clusters {
        let label = cluster
            .label
            .clone()
            .unwrap_or_else(|| truncate_chars(&cluster.medoid_document, 80));
        nodes.push(GraphNode {
            id: cluster.id.clone(),
            label,
            kind: "cluster".to_string(),
            size: cluster.size,
            medoid: Some(cluster.medoid_document.clone()),
        });

        let mut hosts: HashSet<String> = HashSet::new();
        for sample in &cluster.sample_logs {
            for host in extract_host_identifiers(&sample.raw) {
                hosts.insert(host);
            }
        }
        cluster_hosts.push((cluster.id.clone(), hosts));

        let mut seen_sources: HashSet<&str> = HashSet::new();
        for (source, count) in &cluster.source_breakdown {
            if source.is_empty() {
                continue;
            }
            *source_counts.entry(source.clone()).or_default() += count;
            if seen_sources.insert(source.as_str()) {
                source_links.push((cluster.id.clone(), format!("source:{}", source)));
            }
        }
    }

    let mut sources: Vec<(String, i64)> = source_counts.into_iter().collect();
    sources.sort_by(|a, b| a.0.cmp(&b.0));
    for (source, count) in sources {
        nodes.push(GraphNode {
            id: format!("source:{}", source),
            label: source,
            kind: "source".to_string(),
            size: count,
            medoid: None,
        });
    }

    for i in 0..cluster_hosts.len() {
        for j in (i + 1)..cluster_hosts.len() {
            let shared: Vec<String> = cluster_hosts[i]
                .1
                .intersection(&cluster_hosts[j].1)
                .cloned()
                .collect();
            if !shared.is_empty() {
                let mut shared = shared;
                shared.sort();
                edges.push(GraphEdge {
                    from: cluster_hosts[i].0.clone(),
                    to: cluster_hosts[j].0.clone(),
                    shared_hosts: shared,
                });
            }
        }
    }

    for (cluster_id, source_id) in source_links {
        edges.push(GraphEdge { from: cluster_id, to: source_id, shared_hosts: Vec::new() });
    }

    GraphPayload { nodes, edges, params: payload.params.clone() }
}

// ============================================================================
// Helpers
// ============================================================================

fn sample_from_log(os: OsKind, record: &StoredRecord) -> CorrelationSample {
    let meta_str = |key: &str| {
        record
            .metadata
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let env_id = record
        .metadata
        .get("env_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    CorrelationSample {
        id: record.id.clone(),
        document: record.document.clone(),
        os: os.as_str().to_string(),
        source: meta_str("source"),
        raw: {
            let raw = meta_str("raw");
            if raw.is_empty() { record.document.clone() } else { raw }
        },
        env_id,
    }
}

fn mean_vector<'a>(vectors: impl Iterator<Item = &'a [f32]>) -> Vec<f32> {
    let mut sum: Vec<f32> = Vec::new();
    let mut count = 0usize;
    for vector in vectors {
        if sum.is_empty() {
            sum = vector.to_vec();
        } else {
            for (s, v) in sum.iter_mut().zip(vector) {
                *s += v;
            }
        }
        count += 1;
    }
    if count > 1 {
        for s in sum.iter_mut() {
            *s /= count as f32;
        }
    }
    sum
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return f32::MAX;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return f32::MAX;
    }
    1.0 - dot / (na.sqrt() * nb.sqrt())
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Stable grouping key for the raw-stream fallback: JSON identity fields when
/// present, normalized text otherwise.
fn grouping_key_from_line(line: &str) -> String {
    if line.is_empty() {
        return "empty".to_string();
    }
    if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(line) {
        let mut parts: Vec<String> = Vec::new();
        for key in ["type", "ruleName", "testName", "summary", "Message", "Name"] {
            if let Some(serde_json::Value::String(v)) = obj.get(key) {
                let trimmed = v.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
        }
        if !parts.is_empty() {
            return normalize_grouping_key(&parts.join(" | "));
        }
    }
    normalize_grouping_key(line)
}

fn normalize_grouping_key(text: &str) -> String {
    use once_cell::sync::Lazy;
    use regex::Regex;
    static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digits regex"));
    static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

    let lowered = text.trim().to_lowercase();
    let replaced = DIGITS_RE.replace_all(&lowered, "<n>");
    let collapsed = WS_RE.replace_all(&replaced, " ");
    truncate_chars(&collapsed, 180)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::HashingEmbedder;
    use crate::services::vector_store::{metadata, MemoryVectorStore, NewRecord};

    fn correlation() -> (CrossCorrelation, Arc<MemoryVectorStore>) {
        let store = Arc::new(MemoryVectorStore::new(Arc::new(HashingEmbedder::new(256))));
        let names = CollectionNames::new("logs_", "prototypes_", "templates_", "feature-hash::256");
        let correlation = CrossCorrelation::new(store.clone(), names, None, 0.45, 2);
        (correlation, store)
    }

    #[test]
    fn severity_keywords() {
        assert_eq!(severity_from_medoid("kernel: I/O error on sda"), "critical");
        assert_eq!(severity_from_medoid("request timed out... timeout"), "critical");
        assert_eq!(severity_from_medoid("disk usage at 70%"), "warning");
    }

    #[test]
    fn host_extraction_priority_and_dedup() {
        let raw = r#"{"ComputerName":"WIN-01","hostname":"ignored","ip":"10.0.0.1","affectedComponent":{"name":"db-core"},"src_ip":"10.0.0.1"}"#;
        assert_eq!(extract_host_identifiers(raw), vec!["WIN-01", "db-core", "10.0.0.1"]);
        assert!(extract_host_identifiers("plain text").is_empty());
    }

    #[test]
    fn grouping_key_normalizes_digits_and_case() {
        assert_eq!(
            grouping_key_from_line("Request 12345 FAILED for host 10"),
            "request <n> failed for host <n>"
        );
        let json_line = r#"{"type":"alert","testName":"dns-probe-7"}"#;
        assert_eq!(grouping_key_from_line(json_line), "alert | dns-probe-<n>");
        assert_eq!(grouping_key_from_line(""), "empty");
    }

    #[test]
    fn graph_links_clusters_sharing_hosts() {
        let sample = |id: &str, raw: &str, source: &str| CorrelationSample {
            id: id.into(),
            document: raw.into(),
            os: "windows".into(),
            source: source.into(),
            raw: raw.into(),
            env_id: None,
        };
        let cluster = |id: &str, samples: Vec<CorrelationSample>| {
            let mut source_breakdown = HashMap::new();
            for s in &samples {
                *source_breakdown.entry(s.source.clone()).or_insert(0i64) += 1;
            }
            GlobalCluster {
                id: id.into(),
                size: samples.len() as i64,
                centroid: Vec::new(),
                medoid_document: "medoid".into(),
                label: None,
                source_breakdown,
                os_breakdown: HashMap::new(),
                sample_logs: samples,
            }
        };

        let payload = ClustersPayload {
            params: json!({}),
            clusters: vec![
                cluster("c1", vec![sample("1", r#"{"host":"db-01"}"#, "scom:a")]),
                cluster("c2", vec![sample("2", r#"{"host":"db-01"}"#, "catalyst:b")]),
                cluster("c3", vec![sample("3", r#"{"host":"web-09"}"#, "scom:a")]),
            ],
        };
        let graph = build_graph(&payload);

        let cluster_edges: Vec<&GraphEdge> =
            graph.edges.iter().filter(|e| !e.shared_hosts.is_empty()).collect();
        assert_eq!(cluster_edges.len(), 1);
        assert_eq!(cluster_edges[0].from, "c1");
        assert_eq!(cluster_edges[0].to, "c2");
        assert_eq!(cluster_edges[0].shared_hosts, vec!["db-01"]);

        // every shared host appears among the linked clusters' sample hosts
        let source_nodes: Vec<&GraphNode> =
            graph.nodes.iter().filter(|n| n.kind == "source").collect();
        assert_eq!(source_nodes.len(), 2);
    }

    #[tokio::test]
    async fn hdbscan_with_no_prototypes_returns_empty() {
        let (correlation, _store) = correlation();
        let payload = correlation.prototype_clusters_hdbscan(5, None, 10).await.unwrap();
        assert!(payload.clusters.is_empty());
        assert_eq!(payload.params["algorithm"], "hdbscan");
        assert_eq!(payload.params["basis"], "prototypes");
    }

    #[tokio::test]
    async fn single_pass_respects_min_size() {
        let (correlation, store) = correlation_no_redis();
        let mut records = Vec::new();
        for i in 0..4 {
            records.push(NewRecord {
                id: format!("1-{}", i),
                document: "kernel: nic eth0 link down".to_string(),
                metadata: metadata(&[
                    ("raw", "kernel: nic eth0 link down".into()),
                    ("source", "linux.log".into()),
                    ("os", "linux".into()),
                ]),
            });
        }
        records.push(NewRecord {
            id: "1-99".to_string(),
            document: "completely different singleton line".to_string(),
            metadata: metadata(&[("source", "linux.log".into())]),
        });
        store.add("logs_linux__feature-hash_256", records).await.unwrap();

        let payload = correlation
            .global_clusters(GlobalClusterParams {
                min_size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(payload.clusters.len(), 1);
        assert!(payload.clusters[0].size >= 2);
        assert_eq!(payload.params["algorithm"], "single_pass");
        assert_eq!(payload.params["basis"], "logs");
        assert_eq!(payload.clusters[0].os_breakdown.get("linux"), Some(&4));
    }

    #[tokio::test]
    async fn single_pass_env_scope_filters_logs() {
        let (correlation, store) = correlation_no_redis();
        let record = |id: &str, env: &str| NewRecord {
            id: id.to_string(),
            document: "disk io error on sda".to_string(),
            metadata: metadata(&[
                ("raw", "disk io error on sda".into()),
                ("source", "linux.log".into()),
                ("env_id", env.into()),
            ]),
        };
        store
            .add(
                "logs_linux__feature-hash_256",
                vec![
                    record("1-0", "env-001"),
                    record("1-1", "env-001"),
                    record("1-2", "env-002"),
                ],
            )
            .await
            .unwrap();

        let payload = correlation
            .global_clusters(GlobalClusterParams {
                min_size: Some(2),
                env_id: Some("env-001".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(payload.clusters.len(), 1);
        assert_eq!(payload.clusters[0].size, 2);
    }

    fn correlation_no_redis() -> (CrossCorrelation, Arc<MemoryVectorStore>) {
        correlation()
    }
}
