pub mod alert_store;
pub mod cluster_enricher;
pub mod cluster_metrics;
pub mod cross_correlation;
pub mod embedding;
pub mod environment_service;
pub mod issues_aggregator;
pub mod llm;
pub mod online_clustering;
pub mod redis_client;
pub mod templating;
pub mod vector_store;

pub use alert_store::{AlertStore, AlertStoreError};
pub use cluster_enricher::ClusterEnricher;
pub use cluster_metrics::ClusterMetrics;
pub use cross_correlation::{build_graph, CrossCorrelation, GlobalClusterParams};
pub use embedding::{build_embedding_function, EmbeddingFunction};
pub use environment_service::{EnvironmentError, EnvironmentService};
pub use issues_aggregator::IssuesAggregator;
pub use llm::LlmService;
pub use online_clustering::OnlineClusterer;
pub use redis_client::RedisClient;
pub use vector_store::{CollectionNames, MemoryVectorStore, VectorStore};
