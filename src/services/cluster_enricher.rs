//! Cluster enricher
//!
//! Consumes cluster candidates, assembles classification context (prototype
//! centroid/medoid, nearby templates, up to 30 evidence logs), calls the LLM
//! and publishes the enriched alert. Candidates are acked even when
//! enrichment fails: retrying the same candidate would produce duplicate
//! alerts, which is worse than a lost enrichment.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{ClusterCandidate, OsKind, SampleLog};
use crate::services::alert_store::AlertStore;
use crate::services::cluster_metrics::ClusterMetrics;
use crate::services::llm::service::{EvidenceForLlm, NeighborForLlm};
use crate::services::llm::LlmService;
use crate::services::redis_client::{RedisClient, StreamMessage, CLUSTERS_CANDIDATES_STREAM};
use crate::services::vector_store::{CollectionNames, GetOptions, VectorStore};
use crate::utils::SupervisedWorker;

const GROUP: &str = "clusters_enrichers";
const CONSUMER: &str = "cluster_enricher_1";
const READ_COUNT: usize = 5;
const BLOCK_MS: usize = 1000;
const NEIGHBOR_COUNT: usize = 8;
const EVIDENCE_LIMIT: usize = 30;

/// ANN error substrings that indicate a corrupted index rather than a
/// transient failure; neighbor lookup degrades to empty for these.
const CORRUPTED_INDEX_MARKERS: [&str; 2] = ["Nothing found on disk", "hnsw segment reader"];

pub struct ClusterEnricher {
    redis_url: String,
    store: Arc<dyn VectorStore>,
    names: CollectionNames,
    llm: Arc<LlmService>,
    alerts_ttl_sec: i64,
    metrics: Option<Arc<ClusterMetrics>>,
}

impl ClusterEnricher {
    pub fn new(
        redis_url: String,
        store: Arc<dyn VectorStore>,
        names: CollectionNames,
        llm: Arc<LlmService>,
        alerts_ttl_sec: i64,
        metrics: Option<Arc<ClusterMetrics>>,
    ) -> Self {
        Self { redis_url, store, names, llm, alerts_ttl_sec, metrics }
    }

    async fn run_loop(&self) -> Result<(), anyhow::Error> {
        let redis = RedisClient::connect(&self.redis_url).await?;
        redis.ensure_group(CLUSTERS_CANDIDATES_STREAM, GROUP).await?;
        let alert_store = AlertStore::new(redis.clone(), self.alerts_ttl_sec);

        tracing::info!(
            "starting cluster enricher stream={} group={} consumer={}",
            CLUSTERS_CANDIDATES_STREAM,
            GROUP,
            CONSUMER
        );

        loop {
            let messages = match redis
                .read_group(CLUSTERS_CANDIDATES_STREAM, GROUP, CONSUMER, READ_COUNT, BLOCK_MS)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::info!("cluster enricher read failed err={}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                },
            };

            for message in messages {
                if let Err(e) = self.process_candidate(&alert_store, &message).await {
                    tracing::info!(
                        "cluster enricher processing failed id={} err={:#}",
                        message.id,
                        e
                    );
                }
                // Ack regardless of outcome; see module docs.
                if let Err(e) = redis
                    .xack(CLUSTERS_CANDIDATES_STREAM, GROUP, &[message.id.clone()])
                    .await
                {
                    tracing::info!("candidate ack failed id={} err={}", message.id, e);
                }
            }
        }
    }

    fn parse_candidate(message: &StreamMessage) -> ClusterCandidate {
        let env_ids: Vec<String> = message
            .field("env_ids")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        let sample_logs: Vec<SampleLog> = message
            .field("sample_logs")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        ClusterCandidate {
            os: message.field("os").unwrap_or("unknown").to_string(),
            cluster_id: message.field("cluster_id").unwrap_or_default().to_string(),
            env_ids,
            sample_logs,
        }
    }

    async fn process_candidate(
        &self,
        alert_store: &AlertStore,
        message: &StreamMessage,
    ) -> Result<(), anyhow::Error> {
        let candidate = Self::parse_candidate(message);
        let os = OsKind::parse(&candidate.os);
        let cluster_id = candidate.cluster_id.clone();
        if cluster_id.is_empty() {
            anyhow::bail!("candidate without cluster_id");
        }

        // Prototype centroid/medoid/metadata
        let prototype = self
            .store
            .get(&self.names.prototypes(os), GetOptions::by_ids(vec![cluster_id.clone()]))
            .await?
            .into_iter()
            .next();
        let (centroid, medoid_doc, proto_meta) = match prototype {
            Some(row) => (row.embedding, row.document, row.metadata),
            None => (Vec::new(), String::new(), Default::default()),
        };

        let neighbors = self.neighbor_templates(os, &cluster_id, &centroid).await?;

        // Evidence logs from the same cluster; candidate samples as fallback
        let mut env_ids: BTreeSet<String> =
            candidate.env_ids.iter().filter(|e| !e.is_empty()).cloned().collect();
        let mut evidence: Vec<EvidenceForLlm> = Vec::new();
        let retrieved = self
            .store
            .get(
                &self.names.logs(os),
                GetOptions::by_meta("cluster_id", cluster_id.as_str(), EVIDENCE_LIMIT),
            )
            .await
            .unwrap_or_default();
        for row in retrieved {
            if let Some(env) = row.metadata.get("env_id").and_then(|v| v.as_str()) {
                if !env.is_empty() {
                    env_ids.insert(env.to_string());
                }
            }
            let raw = row
                .metadata
                .get("raw")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            evidence.push(EvidenceForLlm { id: row.id, templated: row.document, raw });
        }
        if evidence.is_empty() {
            for sample in &candidate.sample_logs {
                if let Some(env) = &sample.env_id {
                    if !env.is_empty() {
                        env_ids.insert(env.clone());
                    }
                }
                evidence.push(EvidenceForLlm {
                    id: String::new(),
                    templated: sample.templated.clone(),
                    raw: sample.raw.clone(),
                });
            }
        }

        let enriched = self
            .llm
            .classify_cluster(os, &cluster_id, &medoid_doc, &neighbors, &evidence)
            .await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_llm_call(
                os.as_str(),
                &cluster_id,
                "classify_cluster",
                enriched.classification.confidence,
                enriched.metadata.tokens,
                enriched.metadata.latency_ms,
                enriched.metadata.success,
            );
        }

        // Publish the alert: stream entry plus TTL'd hash
        let classification = &enriched.classification;
        let result_json = enriched.to_result_json();
        let env_ids: Vec<String> = env_ids.into_iter().collect();
        let evidence_json: Vec<serde_json::Value> = evidence
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.id,
                    "templated": e.templated,
                    "raw": e.raw,
                })
            })
            .collect();

        let mut fields = vec![
            ("type".to_string(), "cluster".to_string()),
            ("os".to_string(), os.as_str().to_string()),
            ("cluster_id".to_string(), cluster_id.clone()),
            ("failure_type".to_string(), classification.failure_type.clone()),
            (
                "confidence".to_string(),
                classification.confidence.map(|c| c.to_string()).unwrap_or_default(),
            ),
            ("result".to_string(), result_json.to_string()),
            ("env_ids".to_string(), serde_json::to_string(&env_ids)?),
            ("evidence_logs".to_string(), serde_json::to_string(&evidence_json)?),
        ];
        if let Some(summary) = &classification.summary {
            fields.push(("summary".to_string(), summary.clone()));
        }
        if let Some(recommendation) = &classification.recommendation {
            fields.push(("solution".to_string(), recommendation.clone()));
        }
        if env_ids.len() == 1 {
            fields.push(("env_id".to_string(), env_ids[0].clone()));
        }

        let entry_id = alert_store.publish_alert(fields).await?;
        tracing::info!(
            "alert_published id={} os={} type=cluster cluster_id={}",
            entry_id,
            os,
            cluster_id
        );

        // Prototype learns the label/solution
        let mut meta = proto_meta;
        meta.insert("label".to_string(), classification.failure_type.clone().into());
        meta.insert("rationale".to_string(), "llm_cluster".into());
        if let Some(recommendation) = &classification.recommendation {
            meta.insert("solution".to_string(), recommendation.as_str().into());
        }
        if let Err(e) = self
            .store
            .update_metadata(&self.names.prototypes(os), &cluster_id, meta)
            .await
        {
            tracing::debug!(
                "prototype metadata update failed os={} cluster={} err={}",
                os,
                cluster_id,
                e
            );
        }

        Ok(())
    }

    /// Nearest templates by prototype centroid. A corrupted index degrades to
    /// neighbor-less enrichment; other errors propagate.
    async fn neighbor_templates(
        &self,
        os: OsKind,
        cluster_id: &str,
        centroid: &[f32],
    ) -> Result<Vec<NeighborForLlm>, anyhow::Error> {
        if centroid.is_empty() {
            return Ok(Vec::new());
        }
        match self
            .store
            .query(&self.names.templates(os), centroid, NEIGHBOR_COUNT)
            .await
        {
            Ok(hits) => Ok(hits
                .into_iter()
                .map(|hit| NeighborForLlm {
                    label: hit.metadata.get("label").and_then(|v| v.as_str()).map(String::from),
                    id: hit.id,
                    document: hit.document,
                    distance: Some(hit.distance),
                })
                .collect()),
            Err(e) => {
                let text = e.to_string();
                if CORRUPTED_INDEX_MARKERS.iter().any(|marker| text.contains(marker)) {
                    tracing::info!(
                        "cluster enricher: template index corrupted, skipping neighbor lookup id={} os={} err={}",
                        cluster_id,
                        os,
                        text
                    );
                    Ok(Vec::new())
                } else {
                    Err(e.into())
                }
            },
        }
    }
}

impl SupervisedWorker for ClusterEnricher {
    fn name(&self) -> &str {
        "cluster-enricher"
    }

    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move { self.run_loop().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn message(fields: &[(&str, &str)]) -> StreamMessage {
        let fields: HashMap<String, String> =
            fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        StreamMessage { id: "1-0".to_string(), fields }
    }

    #[test]
    fn candidate_parsing_defensive_defaults() {
        let msg = message(&[("os", "linux"), ("cluster_id", "cluster_abc")]);
        let candidate = ClusterEnricher::parse_candidate(&msg);
        assert_eq!(candidate.os, "linux");
        assert_eq!(candidate.cluster_id, "cluster_abc");
        assert!(candidate.env_ids.is_empty());
        assert!(candidate.sample_logs.is_empty());
    }

    #[test]
    fn candidate_parsing_reads_json_lists() {
        let msg = message(&[
            ("os", "windows"),
            ("cluster_id", "cluster_def"),
            ("env_ids", r#"["env-002"]"#),
            (
                "sample_logs",
                r#"[{"raw":"r","templated":"t","os":"windows","source":"scom:h","env_id":"env-002"}]"#,
            ),
        ]);
        let candidate = ClusterEnricher::parse_candidate(&msg);
        assert_eq!(candidate.env_ids, vec!["env-002"]);
        assert_eq!(candidate.sample_logs.len(), 1);
        assert_eq!(candidate.sample_logs[0].source, "scom:h");
    }

    #[test]
    fn candidate_parsing_ignores_malformed_json() {
        let msg = message(&[
            ("os", "linux"),
            ("cluster_id", "cluster_xyz"),
            ("env_ids", "not json"),
            ("sample_logs", "{broken"),
        ]);
        let candidate = ClusterEnricher::parse_candidate(&msg);
        assert!(candidate.env_ids.is_empty());
        assert!(candidate.sample_logs.is_empty());
    }
}
