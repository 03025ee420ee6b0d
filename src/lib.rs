//! Lighthouse Library
//!
//! Streaming log analytics: ingest -> template -> online cluster -> enrich ->
//! query. This library contains all the core modules for the Lighthouse
//! application.

use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::llm::{LLMError, LlmService};
pub use services::{
    AlertStore, ClusterEnricher, ClusterMetrics, CrossCorrelation, EnvironmentService,
    IssuesAggregator, MemoryVectorStore, OnlineClusterer, RedisClient, VectorStore,
};

use crate::models::{ClustersPayload, GraphPayload, Incident};
use crate::utils::TtlCache;

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All services are wrapped in Arc for cheap cloning and thread safety; the
/// stream workers live outside this state on their own threads.
pub struct AppState {
    pub config: Config,

    pub redis: RedisClient,
    pub alert_store: Arc<AlertStore>,
    pub correlation: Arc<CrossCorrelation>,
    pub environment_service: Arc<EnvironmentService>,

    pub incidents_cache: TtlCache<String, Vec<Incident>>,
    pub correlation_cache: TtlCache<String, ClustersPayload>,
    pub graph_cache: TtlCache<String, GraphPayload>,
}
