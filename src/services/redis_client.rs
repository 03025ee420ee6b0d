//! Typed Redis access
//!
//! Thin wrapper over a multiplexed connection exposing exactly the stream,
//! hash, set and counter operations the pipeline needs. The query layer
//! shares one manager; each stream consumer worker owns its own connection so
//! a blocking XREADGROUP never stalls anyone else.

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use std::collections::HashMap;

pub const LOGS_STREAM: &str = "logs";
pub const CLUSTERS_CANDIDATES_STREAM: &str = "clusters:candidates";
pub const ISSUES_CANDIDATES_STREAM: &str = "issues:candidates";
pub const ALERTS_STREAM: &str = "alerts";

pub const ALERTS_PERSISTED_SET: &str = "alerts:persisted";
pub const ALERTS_FEEDBACK_CORRECT_SET: &str = "alerts:feedback:correct";
pub const ALERTS_FEEDBACK_INCORRECT_SET: &str = "alerts:feedback:incorrect";

pub fn alert_hash_key(entry_id: &str) -> String {
    format!("alert:{}", entry_id)
}

pub fn cluster_count_key(os: &str, cluster_id: &str) -> String {
    format!("cluster:count:{}:{}", os, cluster_id)
}

pub fn cluster_last_candidate_key(os: &str, cluster_id: &str) -> String {
    format!("cluster:last_candidate_ts:{}:{}", os, cluster_id)
}

/// One stream entry with its fields decoded to strings.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamMessage {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }
}

#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    fn con(&self) -> ConnectionManager {
        self.manager.clone()
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    pub async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> RedisResult<String> {
        self.con().xadd(stream, "*", fields).await
    }

    pub async fn xack(&self, stream: &str, group: &str, ids: &[String]) -> RedisResult<i64> {
        self.con().xack(stream, group, ids).await
    }

    /// Create the consumer group at the stream tail; tolerates it existing.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> RedisResult<()> {
        let created: RedisResult<String> =
            self.con().xgroup_create_mkstream(stream, group, "$").await;
        match created {
            Ok(_) => {
                tracing::info!("group created stream={} group={}", stream, group);
                Ok(())
            },
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Read new messages for a consumer group, blocking up to `block_ms`.
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> RedisResult<Vec<StreamMessage>> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);
        let reply: StreamReadReply =
            self.con().xread_options(&[stream], &[">"], &options).await?;

        let mut out = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let mut fields = HashMap::with_capacity(entry.map.len());
                for (name, value) in entry.map {
                    let decoded: String = redis::from_redis_value(&value).unwrap_or_default();
                    fields.insert(name, decoded);
                }
                out.push(StreamMessage { id: entry.id, fields });
            }
        }
        Ok(out)
    }

    /// Most-recent `count` entries, newest first.
    pub async fn xrevrange_count(
        &self,
        stream: &str,
        count: usize,
    ) -> RedisResult<Vec<StreamMessage>> {
        let reply: redis::streams::StreamRangeReply =
            self.con().xrevrange_count(stream, "+", "-", count).await?;
        Ok(reply
            .ids
            .into_iter()
            .map(|entry| {
                let mut fields = HashMap::with_capacity(entry.map.len());
                for (name, value) in entry.map {
                    let decoded: String = redis::from_redis_value(&value).unwrap_or_default();
                    fields.insert(name, decoded);
                }
                StreamMessage { id: entry.id, fields }
            })
            .collect())
    }

    /// Fetch one stream entry by exact id.
    pub async fn xrange_entry(
        &self,
        stream: &str,
        entry_id: &str,
    ) -> RedisResult<Option<StreamMessage>> {
        let reply: redis::streams::StreamRangeReply =
            self.con().xrange_count(stream, entry_id, entry_id, 1).await?;
        Ok(reply.ids.into_iter().next().map(|entry| {
            let mut fields = HashMap::with_capacity(entry.map.len());
            for (name, value) in entry.map {
                let decoded: String = redis::from_redis_value(&value).unwrap_or_default();
                fields.insert(name, decoded);
            }
            StreamMessage { id: entry.id, fields }
        }))
    }

    // ------------------------------------------------------------------
    // Hashes
    // ------------------------------------------------------------------

    pub async fn hgetall(&self, key: &str) -> RedisResult<HashMap<String, String>> {
        self.con().hgetall(key).await
    }

    /// Pipelined HGETALL over many keys, results in input order.
    pub async fn hgetall_many(
        &self,
        keys: &[String],
    ) -> RedisResult<Vec<HashMap<String, String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hgetall(key);
        }
        pipe.query_async(&mut self.con()).await
    }

    pub async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> RedisResult<()> {
        self.con().hset_multiple(key, fields).await
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> RedisResult<bool> {
        self.con().expire(key, seconds.max(0)).await
    }

    pub async fn persist(&self, key: &str) -> RedisResult<bool> {
        self.con().persist(key).await
    }

    pub async fn ttl(&self, key: &str) -> RedisResult<i64> {
        self.con().ttl(key).await
    }

    pub async fn exists(&self, key: &str) -> RedisResult<bool> {
        self.con().exists(key).await
    }

    // ------------------------------------------------------------------
    // Sets / counters / strings
    // ------------------------------------------------------------------

    pub async fn sadd(&self, key: &str, member: &str) -> RedisResult<i64> {
        self.con().sadd(key, member).await
    }

    pub async fn smembers(&self, key: &str) -> RedisResult<Vec<String>> {
        self.con().smembers(key).await
    }

    pub async fn sismember(&self, key: &str, member: &str) -> RedisResult<bool> {
        self.con().sismember(key, member).await
    }

    pub async fn incr(&self, key: &str) -> RedisResult<i64> {
        self.con().incr(key, 1i64).await
    }

    pub async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        self.con().get(key).await
    }

    pub async fn set_ex(&self, key: &str, value: &str, seconds: u64) -> RedisResult<()> {
        self.con().set_ex(key, value, seconds).await
    }

    pub async fn hincr(&self, key: &str, field: &str, delta: i64) -> RedisResult<i64> {
        self.con().hincr(key, field, delta).await
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> RedisResult<()> {
        self.con().hset(key, field, value).await
    }

    /// Atomic feedback flip: set the hash field and move the id between the
    /// two mutually exclusive feedback sets in one transaction.
    pub async fn flip_feedback(
        &self,
        alert_key: &str,
        entry_id: &str,
        feedback: &str,
        add_set: &str,
        remove_set: &str,
    ) -> RedisResult<()> {
        redis::pipe()
            .atomic()
            .hset(alert_key, "feedback", feedback)
            .ignore()
            .sadd(add_set, entry_id)
            .ignore()
            .srem(remove_set, entry_id)
            .ignore()
            .query_async(&mut self.con())
            .await
    }
}
