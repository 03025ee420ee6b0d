//! Vector store facade
//!
//! The pipeline talks to an abstract KV+ANN interface: per-OS collections of
//! `{id, document, embedding, metadata}` rows with upsert/get/query/count.
//! The reference backend is an in-process exact-kNN store; a remote store
//! (Chroma, Qdrant, ...) slots in behind the same trait.
//!
//! Collections are namespaced `<prefix><os>__<embed_id>` so that switching
//! embedding functions can never mix vector dimensions.

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use crate::models::OsKind;
use crate::services::embedding::{EmbeddingError, EmbeddingFunction};

pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("vector store backend error: {0}")]
    Backend(String),
}

/// Row to insert: the store computes the embedding from the document.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: String,
    pub document: String,
    pub distance: f32,
    pub metadata: Metadata,
}

/// Filters for `get`. `where_meta` is an equality filter on one metadata key,
/// which is all the pipeline ever needs (cluster_id / env_id scoping).
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub ids: Option<Vec<String>>,
    pub where_meta: Option<(String, serde_json::Value)>,
    pub limit: Option<usize>,
}

impl GetOptions {
    pub fn by_ids(ids: Vec<String>) -> Self {
        Self { ids: Some(ids), ..Default::default() }
    }

    pub fn by_meta(key: &str, value: impl Into<serde_json::Value>, limit: usize) -> Self {
        Self {
            ids: None,
            where_meta: Some((key.to_string(), value.into())),
            limit: Some(limit),
        }
    }

    pub fn recent(limit: usize) -> Self {
        Self { limit: Some(limit), ..Default::default() }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert documents; embeddings are computed by the store's embedding
    /// function.
    async fn add(&self, collection: &str, records: Vec<NewRecord>) -> Result<(), VectorStoreError>;

    /// Replace the metadata of an existing row. Returns false when the id is
    /// unknown.
    async fn update_metadata(
        &self,
        collection: &str,
        id: &str,
        metadata: Metadata,
    ) -> Result<bool, VectorStoreError>;

    async fn get(
        &self,
        collection: &str,
        options: GetOptions,
    ) -> Result<Vec<StoredRecord>, VectorStoreError>;

    /// k-NN by raw vector; distances are cosine distances (1 - cosine
    /// similarity) in [0, 2].
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, VectorStoreError>;

    /// k-NN by text: embed then query.
    async fn query_text(
        &self,
        collection: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<Neighbor>, VectorStoreError>;

    async fn count(&self, collection: &str) -> Result<usize, VectorStoreError>;

    /// Embed a batch of texts with the store's embedding function.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VectorStoreError>;
}

// ============================================================================
// Collection naming
// ============================================================================

static EMBED_ID_SANITIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_-]+").expect("embed id sanitizer regex"));

/// Resolves collection names for the three per-OS collection families.
#[derive(Debug, Clone)]
pub struct CollectionNames {
    log_prefix: String,
    proto_prefix: String,
    template_prefix: String,
    embed_suffix: String,
}

impl CollectionNames {
    pub fn new(
        log_prefix: &str,
        proto_prefix: &str,
        template_prefix: &str,
        embed_id: &str,
    ) -> Self {
        let embed_suffix = EMBED_ID_SANITIZER
            .replace_all(embed_id, "_")
            .trim_matches('_')
            .to_string();
        Self {
            log_prefix: log_prefix.to_string(),
            proto_prefix: proto_prefix.to_string(),
            template_prefix: template_prefix.to_string(),
            embed_suffix,
        }
    }

    fn scoped(&self, prefix: &str, os: OsKind) -> String {
        if self.embed_suffix.is_empty() {
            format!("{}{}", prefix, os.as_str())
        } else {
            format!("{}{}__{}", prefix, os.as_str(), self.embed_suffix)
        }
    }

    pub fn logs(&self, os: OsKind) -> String {
        self.scoped(&self.log_prefix, os)
    }

    pub fn prototypes(&self, os: OsKind) -> String {
        self.scoped(&self.proto_prefix, os)
    }

    pub fn templates(&self, os: OsKind) -> String {
        self.scoped(&self.template_prefix, os)
    }
}

// ============================================================================
// In-memory exact-kNN backend
// ============================================================================

#[derive(Default)]
struct CollectionData {
    index: HashMap<String, usize>,
    records: Vec<StoredRecord>,
}

pub struct MemoryVectorStore {
    embedding: Arc<dyn EmbeddingFunction>,
    collections: DashMap<String, Arc<RwLock<CollectionData>>>,
}

impl MemoryVectorStore {
    pub fn new(embedding: Arc<dyn EmbeddingFunction>) -> Self {
        Self { embedding, collections: DashMap::new() }
    }

    fn collection(&self, name: &str) -> Arc<RwLock<CollectionData>> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(CollectionData::default())))
            .clone()
    }

    fn lock_err(e: impl std::fmt::Display) -> VectorStoreError {
        VectorStoreError::Backend(format!("collection lock poisoned: {}", e))
    }
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

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(&self, collection: &str, records: Vec<NewRecord>) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let documents: Vec<String> = records.iter().map(|r| r.document.clone()).collect();
        let embeddings = self.embedding.embed(&documents).await?;

        let data = self.collection(collection);
        let mut guard = data.write().map_err(Self::lock_err)?;
        for (record, embedding) in records.into_iter().zip(embeddings) {
            let stored = StoredRecord {
                id: record.id.clone(),
                document: record.document,
                embedding,
                metadata: record.metadata,
            };
            match guard.index.get(&record.id).copied() {
                Some(pos) => guard.records[pos] = stored,
                None => {
                    let pos = guard.records.len();
                    guard.records.push(stored);
                    guard.index.insert(record.id, pos);
                },
            }
        }
        Ok(())
    }

    async fn update_metadata(
        &self,
        collection: &str,
        id: &str,
        metadata: Metadata,
    ) -> Result<bool, VectorStoreError> {
        let data = self.collection(collection);
        let mut guard = data.write().map_err(Self::lock_err)?;
        let Some(&pos) = guard.index.get(id) else {
            return Ok(false);
        };
        guard.records[pos].metadata = metadata;
        Ok(true)
    }

    async fn get(
        &self,
        collection: &str,
        options: GetOptions,
    ) -> Result<Vec<StoredRecord>, VectorStoreError> {
        let data = self.collection(collection);
        let guard = data.read().map_err(Self::lock_err)?;

        let mut out = Vec::new();
        if let Some(ids) = &options.ids {
            for id in ids {
                if let Some(&pos) = guard.index.get(id) {
                    out.push(guard.records[pos].clone());
                }
            }
            return Ok(out);
        }

        // Newest-first so bounded scans see recent data.
        for record in guard.records.iter().rev() {
            if let Some((key, value)) = &options.where_meta {
                if record.metadata.get(key) != Some(value) {
                    continue;
                }
            }
            out.push(record.clone());
            if let Some(limit) = options.limit {
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, VectorStoreError> {
        if vector.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let data = self.collection(collection);
        let guard = data.read().map_err(Self::lock_err)?;

        let mut scored: Vec<Neighbor> = guard
            .records
            .iter()
            .map(|record| Neighbor {
                id: record.id.clone(),
                document: record.document.clone(),
                distance: cosine_distance(vector, &record.embedding),
                metadata: record.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }

    async fn query_text(
        &self,
        collection: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<Neighbor>, VectorStoreError> {
        let embeddings = self.embedding.embed(&[text.to_string()]).await?;
        // Never rely on truthiness of vector results; size-check explicitly.
        let Some(vector) = embeddings.first().filter(|v| !v.is_empty()) else {
            return Ok(Vec::new());
        };
        self.query(collection, vector, k).await
    }

    async fn count(&self, collection: &str) -> Result<usize, VectorStoreError> {
        let data = self.collection(collection);
        let guard = data.read().map_err(Self::lock_err)?;
        Ok(guard.records.len())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VectorStoreError> {
        Ok(self.embedding.embed(texts).await?)
    }
}

pub fn metadata(pairs: &[(&str, serde_json::Value)]) -> Metadata {
    let mut map = Metadata::new();
    for (key, value) in pairs {
        map.insert(key.to_string(), value.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::HashingEmbedder;
    use serde_json::json;

    fn store() -> MemoryVectorStore {
        MemoryVectorStore::new(Arc::new(HashingEmbedder::new(128)))
    }

    fn record(id: &str, document: &str, cluster_id: Option<&str>) -> NewRecord {
        let mut meta = Metadata::new();
        meta.insert("raw".into(), json!(document));
        if let Some(cid) = cluster_id {
            meta.insert("cluster_id".into(), json!(cid));
        }
        NewRecord { id: id.into(), document: document.into(), metadata: meta }
    }

    #[tokio::test]
    async fn upsert_replaces_existing_id() {
        let store = store();
        store.add("c", vec![record("1", "first", None)]).await.unwrap();
        store.add("c", vec![record("1", "second", None)]).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 1);
        let rows = store.get("c", GetOptions::by_ids(vec!["1".into()])).await.unwrap();
        assert_eq!(rows[0].document, "second");
    }

    #[tokio::test]
    async fn query_returns_nearest_first() {
        let store = store();
        store
            .add(
                "c",
                vec![
                    record("a", "sshd authentication failure for root", None),
                    record("b", "kernel nic eth0 link down", None),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .query_text("c", "sshd authentication failure for admin", 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn where_filter_and_limit() {
        let store = store();
        store
            .add(
                "c",
                vec![
                    record("1", "disk io error", Some("cluster_x")),
                    record("2", "disk io error again", Some("cluster_x")),
                    record("3", "dns servfail", Some("cluster_y")),
                ],
            )
            .await
            .unwrap();
        let rows = store
            .get("c", GetOptions::by_meta("cluster_id", "cluster_x", 10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let capped = store
            .get("c", GetOptions::by_meta("cluster_id", "cluster_x", 1))
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn update_metadata_reports_missing_ids() {
        let store = store();
        store.add("c", vec![record("1", "doc", None)]).await.unwrap();
        let mut meta = Metadata::new();
        meta.insert("label".into(), json!("disk_failure"));
        assert!(store.update_metadata("c", "1", meta.clone()).await.unwrap());
        assert!(!store.update_metadata("c", "missing", meta).await.unwrap());
        let rows = store.get("c", GetOptions::by_ids(vec!["1".into()])).await.unwrap();
        assert_eq!(rows[0].metadata.get("label"), Some(&json!("disk_failure")));
    }

    #[test]
    fn collection_names_are_namespaced_by_embedding() {
        let names = CollectionNames::new("logs_", "prototypes_", "templates_", "feature-hash::256");
        assert_eq!(names.logs(OsKind::Linux), "logs_linux__feature-hash_256");
        assert_eq!(names.prototypes(OsKind::Macos), "prototypes_macos__feature-hash_256");
        assert_eq!(names.templates(OsKind::Network), "templates_network__feature-hash_256");
    }
}
