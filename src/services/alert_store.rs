//! Alert store
//!
//! Alerts live twice: as entries on the time-ordered `alerts` stream (the
//! canonical order) and as `alert:<id>` hashes carrying the full field set
//! with a TTL. Persisting an alert removes the TTL and records the id in the
//! persisted set so it survives past the window; feedback flips the id
//! between two mutually exclusive sets.

use std::collections::{HashMap, HashSet};

use crate::models::{AlertListItem, FeedbackKind};
use crate::services::redis_client::{
    alert_hash_key, RedisClient, StreamMessage, ALERTS_FEEDBACK_CORRECT_SET,
    ALERTS_FEEDBACK_INCORRECT_SET, ALERTS_PERSISTED_SET, ALERTS_STREAM,
};

#[derive(Debug, thiserror::Error)]
pub enum AlertStoreError {
    #[error("alert not found")]
    NotFound,

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub struct AlertStore {
    redis: RedisClient,
    ttl_sec: i64,
}

impl AlertStore {
    pub fn new(redis: RedisClient, ttl_sec: i64) -> Self {
        Self { redis, ttl_sec }
    }

    /// Append an alert to the stream and mirror it into a TTL'd hash keyed by
    /// the stream entry id. Returns the entry id.
    pub async fn publish_alert(
        &self,
        fields: Vec<(String, String)>,
    ) -> Result<String, AlertStoreError> {
        let entry_id = self.redis.xadd(ALERTS_STREAM, &fields).await?;

        let key = alert_hash_key(&entry_id);
        let mut hash_fields = fields;
        hash_fields.push(("id".to_string(), entry_id.clone()));
        self.redis.hset_all(&key, &hash_fields).await?;
        self.redis.expire(&key, self.ttl_sec).await?;

        Ok(entry_id)
    }

    /// List alerts newest-first: recent stream entries merged with their
    /// hashes (hash fields win), backfilled with older persisted alerts when
    /// the stream window comes up short.
    pub async fn list_alerts(
        &self,
        limit: usize,
        env_id: Option<&str>,
    ) -> Result<Vec<AlertListItem>, AlertStoreError> {
        let persisted: HashSet<String> = self
            .redis
            .smembers(ALERTS_PERSISTED_SET)
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();

        let entries = self.redis.xrevrange_count(ALERTS_STREAM, limit).await?;
        let hash_keys: Vec<String> = entries.iter().map(|e| alert_hash_key(&e.id)).collect();
        let hashes = self.redis.hgetall_many(&hash_keys).await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut out: Vec<AlertListItem> = Vec::new();
        for (entry, hash) in entries.into_iter().zip(hashes) {
            seen.insert(entry.id.clone());
            // Prefer hash data if available (more complete), fall back to
            // the stream fields.
            let fields = if hash.is_empty() { entry.fields } else { hash };
            out.push(build_alert_item(&entry.id, &fields, persisted.contains(&entry.id)));
        }

        // If we still need more, include older persisted alerts (outside TTL)
        let remaining = limit.saturating_sub(out.len());
        if remaining > 0 && !persisted.is_empty() {
            let mut candidates: Vec<String> =
                persisted.iter().filter(|id| !seen.contains(*id)).cloned().collect();
            candidates.sort_by(|a, b| b.cmp(a));
            candidates.truncate(remaining);
            if !candidates.is_empty() {
                let keys: Vec<String> = candidates.iter().map(|id| alert_hash_key(id)).collect();
                let fetched = self.redis.hgetall_many(&keys).await?;
                for (id, data) in candidates.into_iter().zip(fetched) {
                    if data.is_empty() {
                        continue;
                    }
                    out.push(build_alert_item(&id, &data, true));
                }
            }
        }

        out.sort_by(|a, b| b.id.cmp(&a.id));
        if let Some(env) = env_id {
            out.retain(|a| {
                a.env_ids.iter().any(|e| e == env) || a.env_id.as_deref() == Some(env)
            });
        }
        out.truncate(limit);
        Ok(out)
    }

    /// Persist an alert beyond TTL: remove hash expiry and mark it persisted.
    /// Reconstructs the hash from the stream entry when it already expired.
    pub async fn persist_alert(&self, entry_id: &str) -> Result<(), AlertStoreError> {
        let key = alert_hash_key(entry_id);
        if !self.redis.exists(&key).await? {
            let entry: Option<StreamMessage> =
                self.redis.xrange_entry(ALERTS_STREAM, entry_id).await?;
            let Some(entry) = entry else {
                return Err(AlertStoreError::NotFound);
            };
            let mut fields: Vec<(String, String)> = entry.fields.into_iter().collect();
            fields.push(("id".to_string(), entry_id.to_string()));
            self.redis.hset_all(&key, &fields).await?;
        }
        self.redis.persist(&key).await?;
        self.redis.sadd(ALERTS_PERSISTED_SET, entry_id).await?;
        Ok(())
    }

    /// Record operator feedback; the correct/incorrect sets stay disjoint.
    pub async fn add_feedback(
        &self,
        entry_id: &str,
        kind: FeedbackKind,
    ) -> Result<(), AlertStoreError> {
        let key = alert_hash_key(entry_id);
        if !self.redis.exists(&key).await? {
            return Err(AlertStoreError::NotFound);
        }

        let (add_set, remove_set) = match kind {
            FeedbackKind::Correct => (ALERTS_FEEDBACK_CORRECT_SET, ALERTS_FEEDBACK_INCORRECT_SET),
            FeedbackKind::Incorrect => (ALERTS_FEEDBACK_INCORRECT_SET, ALERTS_FEEDBACK_CORRECT_SET),
        };
        self.redis
            .flip_feedback(&key, entry_id, kind.as_str(), add_set, remove_set)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Field parsing (defensive: LLM output and historical entries vary)
// ============================================================================

fn parse_result(raw: Option<&String>) -> serde_json::Value {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return serde_json::json!({});
    };
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        if value.is_object() {
            return value;
        }
    }
    // Fallback: attempt to coerce single quotes -> double quotes
    let cleaned = raw.replace('\'', "\"");
    match serde_json::from_str::<serde_json::Value>(&cleaned) {
        Ok(value) if value.is_object() => value,
        _ => serde_json::json!({ "raw": raw }),
    }
}

fn parse_env_ids(raw: Option<&String>) -> Vec<String> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_logs(raw: Option<&String>) -> Vec<serde_json::Value> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn field_str(fields: &HashMap<String, String>, name: &str) -> String {
    fields.get(name).cloned().unwrap_or_default()
}

/// Project stream/hash fields into the list item. Pure so the merge behavior
/// is testable without Redis.
pub(crate) fn build_alert_item(
    id: &str,
    fields: &HashMap<String, String>,
    persisted: bool,
) -> AlertListItem {
    let result = parse_result(fields.get("result"));
    let env_ids = parse_env_ids(fields.get("env_ids"));
    let logs = parse_logs(fields.get("evidence_logs"));

    let summary = {
        let direct = field_str(fields, "summary");
        if direct.is_empty() {
            result.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string()
        } else {
            direct
        }
    };
    let solution = {
        let direct = field_str(fields, "solution");
        if direct.is_empty() {
            result
                .get("recommendation")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        } else {
            direct
        }
    };
    let env_id = {
        let direct = field_str(fields, "env_id");
        if !direct.is_empty() {
            Some(direct)
        } else if env_ids.len() == 1 {
            Some(env_ids[0].clone())
        } else {
            None
        }
    };

    AlertListItem {
        id: id.to_string(),
        kind: field_str(fields, "type"),
        os: field_str(fields, "os"),
        issue_key: field_str(fields, "issue_key"),
        summary,
        solution,
        result,
        persisted,
        env_id,
        env_ids,
        logs,
        cluster_id: field_str(fields, "cluster_id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn result_parsing_tolerates_single_quotes() {
        let raw = "{'failure_type': 'disk_failure'}".to_string();
        let value = parse_result(Some(&raw));
        assert_eq!(value["failure_type"], "disk_failure");
    }

    #[test]
    fn result_parsing_keeps_garbage_as_raw() {
        let raw = "not json at all".to_string();
        let value = parse_result(Some(&raw));
        assert_eq!(value["raw"], "not json at all");
    }

    #[test]
    fn env_ids_drop_nulls() {
        let raw = r#"["env-001", null, "env-002"]"#.to_string();
        assert_eq!(parse_env_ids(Some(&raw)), vec!["env-001", "env-002"]);
        assert!(parse_env_ids(Some(&"oops".to_string())).is_empty());
    }

    #[test]
    fn item_prefers_explicit_summary_over_result() {
        let f = fields(&[
            ("type", "cluster"),
            ("os", "linux"),
            ("summary", "explicit"),
            ("result", r#"{"summary": "from result", "recommendation": "restart"}"#),
        ]);
        let item = build_alert_item("1-0", &f, false);
        assert_eq!(item.summary, "explicit");
        assert_eq!(item.solution, "restart");
    }

    #[test]
    fn single_env_in_list_becomes_env_id() {
        let f = fields(&[("env_ids", r#"["env-002"]"#)]);
        let item = build_alert_item("1-0", &f, false);
        assert_eq!(item.env_id.as_deref(), Some("env-002"));

        let f = fields(&[("env_ids", r#"["env-001", "env-002"]"#)]);
        let item = build_alert_item("1-0", &f, false);
        assert_eq!(item.env_id, None);
    }

    #[test]
    fn evidence_logs_parse_into_values() {
        let f = fields(&[("evidence_logs", r#"[{"raw": "boom", "id": "9-0"}]"#)]);
        let item = build_alert_item("1-0", &f, true);
        assert_eq!(item.logs.len(), 1);
        assert_eq!(item.logs[0]["raw"], "boom");
        assert!(item.persisted);
    }
}
