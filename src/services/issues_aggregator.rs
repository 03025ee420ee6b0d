//! Issues aggregator
//!
//! Consumes raw log lines from the `logs` stream through a consumer group,
//! normalizes and clusters each line online, groups lines into in-memory
//! issues keyed by (os, component, pid) and publishes an issue once it has
//! been idle long enough. Cluster sizes are counted in Redis; the first
//! crossing of the classification threshold emits a cluster candidate for the
//! enricher (with an optional rate-limited republish cadence after that).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{ClusteringConfig, IssuesConfig};
use crate::models::{IssueLogEntry, OsKind, ParsedLog, SampleLog};
use crate::services::online_clustering::OnlineClusterer;
use crate::services::redis_client::{
    cluster_count_key, cluster_last_candidate_key, RedisClient, StreamMessage,
    CLUSTERS_CANDIDATES_STREAM, ISSUES_CANDIDATES_STREAM, LOGS_STREAM,
};
use crate::services::templating::{issue_key, normalize, os_from_source};
use crate::services::vector_store::{metadata, CollectionNames, GetOptions, NewRecord, VectorStore};
use crate::utils::SupervisedWorker;

const GROUP: &str = "issues_aggregator";
const CONSUMER: &str = "aggregator_1";
const READ_COUNT: usize = 100;
const BLOCK_MS: usize = 1000;
const ACK_CHUNK: usize = 500;
const LAST_CANDIDATE_TTL_SEC: u64 = 60 * 60;

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Aggregator-local grouping of logs, closed on idleness.
#[derive(Debug)]
pub struct Issue {
    pub os: OsKind,
    pub key: String,
    pub created_at: f64,
    pub last_seen_at: f64,
    pub logs: Vec<IssueLogEntry>,
}

impl Issue {
    fn new(os: OsKind, key: String, now: f64) -> Self {
        Self { os, key, created_at: now, last_seen_at: now, logs: Vec::new() }
    }

    fn add_log(&mut self, raw: &str, templated: &str, parsed: ParsedLog, now: f64) {
        self.logs.push(IssueLogEntry {
            raw: raw.to_string(),
            templated: templated.to_string(),
            parsed,
            ts: now,
        });
        self.last_seen_at = now;
    }

    fn top_logs(&self, limit: usize) -> &[IssueLogEntry] {
        &self.logs[..self.logs.len().min(limit)]
    }
}

/// Republish cadence after the first threshold crossing. Zero disables
/// republishing entirely.
pub(crate) fn republish_due(count: i64, min_count: i64, every: i64) -> bool {
    every > 0 && count > min_count && count % every == 0
}

/// Stream fields for a closed issue.
pub(crate) fn issue_candidate_fields(issue: &Issue, max_logs: usize) -> Vec<(String, String)> {
    let top = issue.top_logs(max_logs);
    let logs_list: Vec<serde_json::Value> = top
        .iter()
        .map(|log| {
            serde_json::json!({
                "templated": log.templated,
                "raw": log.raw,
                "component": log.parsed.component,
                "pid": log.parsed.pid.clone().unwrap_or_default(),
                "time": log.ts,
            })
        })
        .collect();
    let templated_summary: Vec<&str> = top.iter().map(|log| log.templated.as_str()).collect();

    vec![
        ("os".to_string(), issue.os.as_str().to_string()),
        ("issue_key".to_string(), issue.key.clone()),
        ("templated_summary".to_string(), templated_summary.join(" \n")),
        (
            "logs".to_string(),
            serde_json::to_string(&logs_list).unwrap_or_else(|_| "[]".to_string()),
        ),
    ]
}

fn template_doc_id(templated: &str) -> String {
    let mut hasher = DefaultHasher::new();
    templated.hash(&mut hasher);
    format!("tpl_{:016x}", hasher.finish())
}

pub struct IssuesAggregator {
    redis_url: String,
    store: Arc<dyn VectorStore>,
    names: CollectionNames,
    clusterer: Arc<OnlineClusterer>,
    clustering: ClusteringConfig,
    issues_config: IssuesConfig,
    issues: Mutex<HashMap<String, Issue>>,
}

impl IssuesAggregator {
    pub fn new(
        redis_url: String,
        store: Arc<dyn VectorStore>,
        names: CollectionNames,
        clusterer: Arc<OnlineClusterer>,
        clustering: ClusteringConfig,
        issues_config: IssuesConfig,
    ) -> Self {
        Self {
            redis_url,
            store,
            names,
            clusterer,
            clustering,
            issues_config,
            issues: Mutex::new(HashMap::new()),
        }
    }

    async fn run_loop(&self) -> Result<(), anyhow::Error> {
        // The worker owns its connection: XREADGROUP blocks, so it must never
        // share the query layer's multiplexed handle.
        let redis = RedisClient::connect(&self.redis_url).await?;
        redis.ensure_group(LOGS_STREAM, GROUP).await?;

        tracing::info!(
            "starting issues aggregator stream={} group={} consumer={}",
            LOGS_STREAM,
            GROUP,
            CONSUMER
        );

        loop {
            let messages = match redis
                .read_group(LOGS_STREAM, GROUP, CONSUMER, READ_COUNT, BLOCK_MS)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::info!(
                        "xreadgroup failed stream={} group={} err={}",
                        LOGS_STREAM,
                        GROUP,
                        e
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                },
            };

            let now = unix_now();
            if !messages.is_empty() {
                let mut ack_ids: Vec<String> = Vec::new();
                let processed = messages.len();
                for message in messages {
                    match self.process_message(&redis, &message, now).await {
                        Ok(()) => ack_ids.push(message.id.clone()),
                        Err(e) => {
                            tracing::info!(
                                "issues aggregator failed message id={} err={:#}",
                                message.id,
                                e
                            );
                        },
                    }
                }

                // Ack so the pending entries list doesn't grow unbounded.
                for chunk in ack_ids.chunks(ACK_CHUNK) {
                    if let Err(e) = redis.xack(LOGS_STREAM, GROUP, chunk).await {
                        tracing::info!("xack failed group={} err={}", GROUP, e);
                    }
                }

                let open_issues = self.issues.lock().map(|m| m.len()).unwrap_or(0);
                tracing::debug!("aggregated messages={} open_issues={}", processed, open_issues);
            }

            self.sweep_idle_issues(&redis, now).await;
        }
    }

    async fn process_message(
        &self,
        redis: &RedisClient,
        message: &StreamMessage,
        now: f64,
    ) -> Result<(), anyhow::Error> {
        let source = message.field("source").unwrap_or_default().to_string();
        let raw = message.field("line").unwrap_or_default().to_string();

        let os = os_from_source(&source);
        let (templated, parsed) = normalize(os, &source, &raw);

        let cluster_id = self.clusterer.assign_or_create(os, &templated, None).await;

        self.record_log_document(message, os, &source, &raw, &templated, &parsed, &cluster_id)
            .await;

        {
            let mut issues = self
                .issues
                .lock()
                .map_err(|e| anyhow::anyhow!("issue map lock poisoned: {}", e))?;
            let key = issue_key(os, &parsed);
            let issue = issues
                .entry(key.clone())
                .or_insert_with(|| Issue::new(os, key, now));
            issue.add_log(&raw, &templated, parsed.clone(), now);
        }

        if !cluster_id.is_empty() {
            if let Err(e) = self
                .track_cluster_and_publish(redis, os, &cluster_id, &source, &raw, &templated, &parsed, now)
                .await
            {
                tracing::debug!(
                    "candidate tracking failed os={} cluster={} err={:#}",
                    os,
                    cluster_id,
                    e
                );
            }
        }

        Ok(())
    }

    /// Best-effort: make the log line visible to evidence retrieval and env
    /// discovery. Update-else-insert keeps the stream id as the document id.
    #[allow(clippy::too_many_arguments)]
    async fn record_log_document(
        &self,
        message: &StreamMessage,
        os: OsKind,
        source: &str,
        raw: &str,
        templated: &str,
        parsed: &ParsedLog,
        cluster_id: &str,
    ) {
        let collection = self.names.logs(os);

        let existing = self
            .store
            .get(&collection, GetOptions::by_ids(vec![message.id.clone()]))
            .await
            .ok()
            .and_then(|rows| rows.into_iter().next());

        let result = match existing {
            Some(row) => {
                let mut meta = row.metadata;
                meta.insert("cluster_id".to_string(), cluster_id.into());
                self.store
                    .update_metadata(&collection, &message.id, meta)
                    .await
                    .map(|_| ())
            },
            None => {
                let mut meta = metadata(&[
                    ("raw", raw.into()),
                    ("source", source.into()),
                    ("os", os.as_str().into()),
                    ("cluster_id", cluster_id.into()),
                ]);
                if let Some(env_id) = &parsed.env_id {
                    meta.insert("env_id".to_string(), env_id.as_str().into());
                }
                self.store
                    .add(
                        &collection,
                        vec![NewRecord {
                            id: message.id.clone(),
                            document: templated.to_string(),
                            metadata: meta,
                        }],
                    )
                    .await
            },
        };
        if let Err(e) = result {
            tracing::debug!("log doc upsert failed id={} os={} err={}", message.id, os, e);
        }

        // Deduplicated template corpus feeding the enricher's neighbor lookup.
        let template_collection = self.names.templates(os);
        let template_record = NewRecord {
            id: template_doc_id(templated),
            document: templated.to_string(),
            metadata: metadata(&[("os", os.as_str().into())]),
        };
        if let Err(e) = self.store.add(&template_collection, vec![template_record]).await {
            tracing::debug!("template upsert failed os={} err={}", os, e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn track_cluster_and_publish(
        &self,
        redis: &RedisClient,
        os: OsKind,
        cluster_id: &str,
        source: &str,
        raw: &str,
        templated: &str,
        parsed: &ParsedLog,
        now: f64,
    ) -> Result<(), anyhow::Error> {
        let counter_key = cluster_count_key(os.as_str(), cluster_id);
        let count = redis.incr(&counter_key).await?;

        let min_count = self.clustering.min_logs_for_classification;
        let mut should_publish = count == min_count;

        if !should_publish
            && republish_due(count, min_count, self.clustering.republish_every)
        {
            let last_key = cluster_last_candidate_key(os.as_str(), cluster_id);
            let last_ts = redis
                .get(&last_key)
                .await
                .ok()
                .flatten()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);
            if now - last_ts >= self.clustering.republish_min_interval_sec {
                should_publish = true;
                if let Err(e) = redis
                    .set_ex(&last_key, &format!("{}", now), LAST_CANDIDATE_TTL_SEC)
                    .await
                {
                    tracing::debug!("rate limiter update failed key={} err={}", last_key, e);
                }
            }
        }

        if should_publish {
            let sample = SampleLog {
                raw: raw.to_string(),
                templated: templated.to_string(),
                os: os.as_str().to_string(),
                source: source.to_string(),
                env_id: parsed.env_id.clone(),
            };
            let env_ids: Vec<&String> = parsed.env_id.iter().collect();
            let fields = vec![
                ("os".to_string(), os.as_str().to_string()),
                ("cluster_id".to_string(), cluster_id.to_string()),
                ("env_ids".to_string(), serde_json::to_string(&env_ids)?),
                ("sample_logs".to_string(), serde_json::to_string(&[sample])?),
            ];
            redis.xadd(CLUSTERS_CANDIDATES_STREAM, &fields).await?;
            tracing::info!(
                "cluster candidate published os={} cluster={} count={}",
                os,
                cluster_id,
                count
            );
        }

        Ok(())
    }

    async fn sweep_idle_issues(&self, redis: &RedisClient, now: f64) {
        let inactivity = self.issues_config.inactivity_sec;
        let idle: Vec<Issue> = {
            let Ok(mut issues) = self.issues.lock() else {
                return;
            };
            let keys: Vec<String> = issues
                .iter()
                .filter(|(_, issue)| now - issue.last_seen_at >= inactivity)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter().filter_map(|key| issues.remove(&key)).collect()
        };

        for issue in idle {
            let fields = issue_candidate_fields(&issue, self.issues_config.max_logs_for_llm);
            match redis.xadd(ISSUES_CANDIDATES_STREAM, &fields).await {
                Ok(_) => {
                    tracing::info!(
                        "published issue os={} key={} logs={}",
                        issue.os,
                        issue.key,
                        issue.logs.len()
                    );
                },
                Err(e) => {
                    tracing::warn!(
                        "issue publish failed key={} err={}; dropping entry",
                        issue.key,
                        e
                    );
                },
            }
        }
    }
}

impl SupervisedWorker for IssuesAggregator {
    fn name(&self) -> &str {
        "issues-aggregator"
    }

    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move { self.run_loop().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn republish_cadence() {
        // threshold crossing itself is handled separately
        assert!(!republish_due(10, 10, 50));
        // disabled when every = 0
        assert!(!republish_due(100, 10, 0));
        // multiples past the threshold
        assert!(republish_due(50, 10, 50));
        assert!(republish_due(100, 10, 50));
        assert!(!republish_due(60, 10, 50));
        // below or at the threshold never republishes
        assert!(!republish_due(50, 50, 50));
    }

    #[test]
    fn candidate_emission_counts() {
        // Candidates fire at the threshold crossing and then at multiples of
        // the republish cadence (interval gate aside).
        let emitted = |total: i64, min_count: i64, every: i64| {
            (1..=total)
                .filter(|count| *count == min_count || republish_due(*count, min_count, every))
                .count()
        };

        assert_eq!(emitted(9, 10, 50), 0);
        assert_eq!(emitted(10, 10, 50), 1);
        assert_eq!(emitted(49, 10, 50), 1);
        assert_eq!(emitted(50, 10, 50), 2);
        assert_eq!(emitted(110, 10, 50), 3); // at 10, 50 and 100
        // republish disabled: only the threshold crossing fires
        assert_eq!(emitted(500, 10, 0), 1);
    }

    #[test]
    fn idle_issue_payload_caps_logs() {
        let mut issue = Issue::new(OsKind::Linux, "linux|sshd|nopid".to_string(), 1000.0);
        for i in 0..30 {
            issue.add_log(
                &format!("raw {}", i),
                &format!("sshd: templated {}", i),
                ParsedLog {
                    component: "sshd".into(),
                    pid: None,
                    content: format!("templated {}", i),
                    env_id: None,
                },
                1000.0 + i as f64,
            );
        }

        let fields = issue_candidate_fields(&issue, 20);
        let map: HashMap<_, _> = fields.into_iter().collect();
        assert_eq!(map["os"], "linux");
        assert_eq!(map["issue_key"], "linux|sshd|nopid");
        let logs: Vec<serde_json::Value> = serde_json::from_str(&map["logs"]).unwrap();
        assert_eq!(logs.len(), 20);
        assert_eq!(logs[0]["raw"], "raw 0");
        assert!(map["templated_summary"].contains("sshd: templated 0"));
    }

    #[test]
    fn issue_tracks_last_seen() {
        let mut issue = Issue::new(OsKind::Macos, "macos|kernel|nopid".to_string(), 5.0);
        issue.add_log(
            "raw",
            "kernel: templated",
            ParsedLog::default(),
            42.0,
        );
        assert_eq!(issue.last_seen_at, 42.0);
        assert_eq!(issue.created_at, 5.0);
    }

    #[test]
    fn template_ids_are_stable_per_content() {
        let a = template_doc_id("sshd: authentication failure");
        let b = template_doc_id("sshd: authentication failure");
        let c = template_doc_id("kernel: link down");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("tpl_"));
    }
}
