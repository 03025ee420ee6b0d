//! Online clustering
//!
//! Nearest-prototype assignment with lazy prototype creation. Each OS bucket
//! has one prototype collection; a templated line either joins the nearest
//! prototype within the distance threshold or seeds a new one.

use std::sync::Arc;

use crate::models::OsKind;
use crate::services::cluster_metrics::ClusterMetrics;
use crate::services::vector_store::{metadata, CollectionNames, NewRecord, VectorStore};

pub struct OnlineClusterer {
    store: Arc<dyn VectorStore>,
    names: CollectionNames,
    threshold: f64,
    metrics: Option<Arc<ClusterMetrics>>,
}

impl OnlineClusterer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        names: CollectionNames,
        threshold: f64,
        metrics: Option<Arc<ClusterMetrics>>,
    ) -> Self {
        Self { store, names, threshold, metrics }
    }

    /// Assign templated text to the nearest prototype within the threshold or
    /// create a new cluster. Always returns a cluster id; persistence
    /// failures are logged and surfaced through downstream counters instead
    /// of failing ingest.
    pub async fn assign_or_create(
        &self,
        os: OsKind,
        templated: &str,
        threshold: Option<f64>,
    ) -> String {
        let threshold = threshold.unwrap_or(self.threshold);
        let collection = self.names.prototypes(os);

        let nearest = match self.store.query_text(&collection, templated, 1).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(
                    "online clustering: prototype lookup failed os={} err={}",
                    os,
                    e
                );
                Vec::new()
            },
        };

        if let Some(hit) = nearest.first() {
            if !hit.id.is_empty() && f64::from(hit.distance) <= threshold {
                if let Some(metrics) = &self.metrics {
                    metrics.record_online_assignment(
                        os.as_str(),
                        &hit.id,
                        f64::from(hit.distance),
                        false,
                    );
                }
                return hit.id.clone();
            }
        }

        // Seed a new prototype with this templated line as its medoid/centroid
        let cluster_id = new_cluster_id();
        let record = NewRecord {
            id: cluster_id.clone(),
            document: templated.to_string(),
            metadata: metadata(&[
                ("os", os.as_str().into()),
                ("label", "unknown".into()),
                ("rationale", "online".into()),
                ("size", 1.into()),
                ("exemplar_count", 0.into()),
                ("created_by", "online".into()),
            ]),
        };

        if let Err(e) = self.store.add(&collection, vec![record]).await {
            tracing::error!(
                "online clustering: failed to persist prototype os={} cluster={} collection={} err={}",
                os,
                cluster_id,
                collection,
                e
            );
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_online_assignment(os.as_str(), &cluster_id, 0.0, true);
        }

        cluster_id
    }
}

fn new_cluster_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("cluster_{}", &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::HashingEmbedder;
    use crate::services::vector_store::MemoryVectorStore;

    fn clusterer(threshold: f64) -> OnlineClusterer {
        let store = Arc::new(MemoryVectorStore::new(Arc::new(HashingEmbedder::new(256))));
        let names = CollectionNames::new("logs_", "prototypes_", "templates_", "feature-hash::256");
        OnlineClusterer::new(store, names, threshold, None)
    }

    #[test]
    fn cluster_ids_have_twelve_hex_chars() {
        let id = new_cluster_id();
        assert!(id.starts_with("cluster_"));
        assert_eq!(id.len(), "cluster_".len() + 12);
        assert!(id["cluster_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn identical_lines_share_a_prototype() {
        let clusterer = clusterer(0.4);
        let first = clusterer
            .assign_or_create(OsKind::Linux, "kernel: nic eth0 link down", None)
            .await;
        let second = clusterer
            .assign_or_create(OsKind::Linux, "kernel: nic eth0 link down", None)
            .await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn distant_lines_create_new_prototypes() {
        let clusterer = clusterer(0.1);
        let a = clusterer
            .assign_or_create(OsKind::Linux, "kernel: nic eth0 link down", None)
            .await;
        let b = clusterer
            .assign_or_create(OsKind::Linux, "sshd: authentication failure for root", None)
            .await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn collections_are_scoped_per_os() {
        let clusterer = clusterer(0.4);
        let linux = clusterer
            .assign_or_create(OsKind::Linux, "kernel: nic eth0 link down", None)
            .await;
        let macos = clusterer
            .assign_or_create(OsKind::Macos, "kernel: nic eth0 link down", None)
            .await;
        assert_ne!(linux, macos);
    }

    #[tokio::test]
    async fn explicit_threshold_overrides_default() {
        let clusterer = clusterer(2.0);
        let a = clusterer
            .assign_or_create(OsKind::Linux, "kernel: nic eth0 link down", None)
            .await;
        // With a zero threshold even a near-identical line seeds a new cluster.
        let b = clusterer
            .assign_or_create(OsKind::Linux, "kernel: nic eth1 link down", Some(0.0))
            .await;
        assert_ne!(a, b);
    }
}
