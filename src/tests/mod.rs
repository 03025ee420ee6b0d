//! Cross-module pipeline tests over the in-process backends.

use std::sync::Arc;

use crate::models::OsKind;
use crate::services::cross_correlation::{CrossCorrelation, GlobalClusterParams};
use crate::services::embedding::HashingEmbedder;
use crate::services::online_clustering::OnlineClusterer;
use crate::services::templating::normalize;
use crate::services::vector_store::{
    metadata, CollectionNames, GetOptions, MemoryVectorStore, NewRecord, VectorStore,
};

fn test_names() -> CollectionNames {
    CollectionNames::new("logs_", "prototypes_", "templates_", "feature-hash::256")
}

fn test_store() -> Arc<MemoryVectorStore> {
    Arc::new(MemoryVectorStore::new(Arc::new(HashingEmbedder::new(256))))
}

/// Ingest-shaped walk-through: normalize repeated lines, assign them online,
/// record the log documents, then check that evidence retrieval and the
/// single-pass correlation see one coherent cluster.
#[tokio::test]
async fn repeated_symptom_forms_one_cluster_with_evidence() {
    let store = test_store();
    let names = test_names();
    let clusterer = OnlineClusterer::new(store.clone(), names.clone(), 0.4, None);

    let line = "Jun 14 15:16:01 combo kernel: nic eth0 link down";
    let mut cluster_ids = Vec::new();
    for i in 0..10 {
        let (templated, parsed) = normalize(OsKind::Linux, "linux.log", line);
        assert_eq!(parsed.component, "kernel");
        let cluster_id = clusterer.assign_or_create(OsKind::Linux, &templated, None).await;

        store
            .add(
                &names.logs(OsKind::Linux),
                vec![NewRecord {
                    id: format!("17000000000{}-0", i),
                    document: templated,
                    metadata: metadata(&[
                        ("raw", line.into()),
                        ("source", "linux.log".into()),
                        ("os", "linux".into()),
                        ("cluster_id", cluster_id.as_str().into()),
                    ]),
                }],
            )
            .await
            .unwrap();
        cluster_ids.push(cluster_id);
    }

    // Exactly one prototype was created and every line joined it.
    assert!(cluster_ids.iter().all(|id| id == &cluster_ids[0]));
    assert_eq!(store.count(&names.prototypes(OsKind::Linux)).await.unwrap(), 1);

    // Evidence retrieval by cluster id, as the enricher does it.
    let evidence = store
        .get(
            &names.logs(OsKind::Linux),
            GetOptions::by_meta("cluster_id", cluster_ids[0].as_str(), 30),
        )
        .await
        .unwrap();
    assert_eq!(evidence.len(), 10);
    assert!(evidence
        .iter()
        .all(|row| row.metadata.get("raw").and_then(|v| v.as_str()) == Some(line)));

    // Single-pass correlation over the same store groups the lines.
    let correlation = CrossCorrelation::new(store.clone(), names, None, 0.45, 2);
    let payload = correlation
        .global_clusters(GlobalClusterParams::default())
        .await
        .unwrap();
    assert_eq!(payload.clusters.len(), 1);
    assert_eq!(payload.clusters[0].size, 10);
    assert_eq!(payload.clusters[0].os_breakdown.get("linux"), Some(&10));
}

/// Distinct symptoms stay in distinct clusters end to end.
#[tokio::test]
async fn distinct_symptoms_stay_separate() {
    let store = test_store();
    let names = test_names();
    let clusterer = OnlineClusterer::new(store.clone(), names.clone(), 0.3, None);

    let lines = [
        "Jun 14 15:16:01 combo sshd[19939]: authentication failure; rhost=10.0.0.1",
        "Jun 14 15:16:02 combo kernel: nic eth0 link down",
        "Jun 14 15:16:03 combo named[420]: query SERVFAIL for example.com",
    ];
    let mut ids = Vec::new();
    for line in lines {
        let (templated, _) = normalize(OsKind::Linux, "linux.log", line);
        ids.push(clusterer.assign_or_create(OsKind::Linux, &templated, None).await);
    }
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_ne!(ids[0], ids[2]);
    assert_eq!(store.count(&names.prototypes(OsKind::Linux)).await.unwrap(), 3);
}
