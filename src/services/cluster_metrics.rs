//! Best-effort clustering metrics.
//!
//! Counters live in Redis hashes so they survive restarts and are visible to
//! operators with plain redis-cli. Recording is fire-and-forget: a metrics
//! failure must never block or fail the pipeline.

use std::sync::Arc;

use crate::services::redis_client::RedisClient;

pub struct ClusterMetrics {
    redis: RedisClient,
}

impl ClusterMetrics {
    pub fn new(redis: RedisClient) -> Arc<Self> {
        Arc::new(Self { redis })
    }

    fn assignment_key(os: &str) -> String {
        format!("cluster:metrics:online:{}", os)
    }

    fn llm_key(os: &str) -> String {
        format!("cluster:metrics:llm:{}", os)
    }

    /// Record one online assignment (or prototype creation).
    pub fn record_online_assignment(
        self: &Arc<Self>,
        os: &str,
        cluster_id: &str,
        distance: f64,
        is_new_cluster: bool,
    ) {
        let this = Arc::clone(self);
        let os = os.to_string();
        let cluster_id = cluster_id.to_string();
        tokio::spawn(async move {
            let key = Self::assignment_key(&os);
            let field = if is_new_cluster { "created" } else { "assigned" };
            if let Err(e) = this.redis.hincr(&key, field, 1).await {
                tracing::debug!(
                    "cluster metrics skipped os={} cluster={} err={}",
                    os,
                    cluster_id,
                    e
                );
                return;
            }
            // Store the last observed distance as a coarse drift signal.
            let _ = this
                .redis
                .hset(&key, "last_distance", &format!("{:.4}", distance))
                .await;
        });
    }

    /// Record one LLM classification call.
    pub fn record_llm_call(
        self: &Arc<Self>,
        os: &str,
        cluster_id: &str,
        operation: &str,
        confidence: Option<f64>,
        tokens: i64,
        latency_ms: i64,
        success: bool,
    ) {
        let this = Arc::clone(self);
        let os = os.to_string();
        let cluster_id = cluster_id.to_string();
        let operation = operation.to_string();
        tokio::spawn(async move {
            let key = Self::llm_key(&os);
            let calls_field = format!("{}:{}", operation, if success { "ok" } else { "failed" });
            if let Err(e) = this.redis.hincr(&key, &calls_field, 1).await {
                tracing::debug!(
                    "llm metrics skipped os={} cluster={} err={}",
                    os,
                    cluster_id,
                    e
                );
                return;
            }
            let _ = this.redis.hincr(&key, "tokens", tokens).await;
            let _ = this.redis.hincr(&key, "latency_ms_total", latency_ms).await;
            if let Some(confidence) = confidence {
                let _ = this
                    .redis
                    .hset(&key, "last_confidence", &format!("{:.3}", confidence))
                    .await;
            }
        });
    }
}
