use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use lighthouse::config::Config;
use lighthouse::models;
use lighthouse::services::{
    build_embedding_function, AlertStore, ClusterEnricher, ClusterMetrics, CollectionNames,
    CrossCorrelation, EmbeddingFunction, EnvironmentService, IssuesAggregator, LlmService,
    MemoryVectorStore, OnlineClusterer, RedisClient, VectorStore,
};
use lighthouse::utils::{spawn_worker_thread, TtlCache};
use lighthouse::{handlers, AppState};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::alerts::list_alerts,
        handlers::alerts::persist_alert,
        handlers::alerts::add_feedback,

        handlers::incidents::list_incidents,

        handlers::environments::list_environments,
        handlers::environments::environment_detail,
        handlers::environments::environment_correlation,

        handlers::correlation::global_correlation,
        handlers::correlation::correlation_graph,
    ),
    components(
        schemas(
            models::AlertListItem,
            models::AlertOpResponse,
            models::FeedbackKind,
            models::Incident,
            models::IncidentLog,
            models::GlobalCluster,
            models::CorrelationSample,
            models::ClustersPayload,
            models::GraphNode,
            models::GraphEdge,
            models::GraphPayload,
            models::EnvironmentList,
            models::EnvironmentSummary,
            models::Coordinates,
            models::Topology,
            models::TopologyNode,
            models::TopologyEdge,
            models::EnvironmentDetail,
            models::EnvironmentCorrelation,
            models::ClusterOverlay,
            models::NodeImpact,
            models::NodeImpactCluster,
        )
    ),
    tags(
        (name = "Alerts", description = "Enriched cluster alerts"),
        (name = "Incidents", description = "Env-scoped incident clusters"),
        (name = "Environments", description = "Environment discovery and topology"),
        (name = "Correlation", description = "Cross-source correlation"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    // Keep the appender guard alive for the process lifetime.
    let mut _log_guard = None;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("lighthouse.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _log_guard = Some(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Lighthouse starting up");
    tracing::info!("Configuration loaded successfully");

    let redis = RedisClient::connect(&config.redis.url).await?;
    tracing::info!("Redis connection established");

    let embedding = build_embedding_function(&config.embedding);
    let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new(Arc::clone(&embedding)));
    let names = CollectionNames::new(
        &config.vector.log_prefix,
        &config.vector.proto_prefix,
        &config.vector.template_prefix,
        &embedding.id(),
    );
    tracing::info!("Vector store ready (embedding: {})", embedding.id());

    let metrics = if config.workers.enable_cluster_metrics {
        Some(ClusterMetrics::new(redis.clone()))
    } else {
        None
    };

    let clusterer = Arc::new(OnlineClusterer::new(
        Arc::clone(&store),
        names.clone(),
        config.clustering.online_distance_threshold,
        metrics.clone(),
    ));

    let llm_service = Arc::new(LlmService::new(config.llm.clone()));
    if llm_service.is_available() {
        tracing::info!("LLM service initialized (model: {})", config.llm.model);
    } else {
        tracing::warn!("LLM provider not configured, classification uses the keyword heuristic");
    }

    let correlation = Arc::new(CrossCorrelation::new(
        Arc::clone(&store),
        names.clone(),
        Some(redis.clone()),
        config.clustering.distance_threshold,
        config.clustering.min_size,
    ));

    let environment_service = Arc::new(EnvironmentService::new(
        Arc::clone(&store),
        names.clone(),
        Arc::clone(&correlation),
        config.fallback_env_ids(),
        Duration::from_secs_f64(config.correlation.env_discovery_timeout_sec.max(0.1)),
        config.correlation.disable_global_clustering,
    ));

    let alert_store = Arc::new(AlertStore::new(redis.clone(), config.alerts.ttl_sec));

    // Stream workers: one dedicated thread + runtime each, so LLM/ANN latency
    // in one never stalls ingest or the request path.
    let mut _worker_handles = Vec::new();
    if config.workers.enable_issues_aggregator {
        let aggregator = Arc::new(IssuesAggregator::new(
            config.redis.url.clone(),
            Arc::clone(&store),
            names.clone(),
            Arc::clone(&clusterer),
            config.clustering.clone(),
            config.issues.clone(),
        ));
        _worker_handles.push(spawn_worker_thread(aggregator));
        tracing::info!("Issues aggregator started");
    } else {
        tracing::warn!("Issues aggregator disabled by configuration");
    }

    if config.workers.enable_cluster_enricher {
        let enricher = Arc::new(ClusterEnricher::new(
            config.redis.url.clone(),
            Arc::clone(&store),
            names.clone(),
            Arc::clone(&llm_service),
            config.alerts.ttl_sec,
            metrics.clone(),
        ));
        _worker_handles.push(spawn_worker_thread(enricher));
        tracing::info!("Cluster enricher started");
    } else {
        tracing::warn!("Cluster enricher disabled by configuration");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app_state = Arc::new(AppState {
        config,
        redis,
        alert_store,
        correlation,
        environment_service,
        incidents_cache: TtlCache::new(Duration::from_secs(30)),
        correlation_cache: TtlCache::new(Duration::from_secs(30)),
        graph_cache: TtlCache::new(Duration::from_secs(30)),
    });

    let api_routes = Router::new()
        .route("/alerts", get(handlers::alerts::list_alerts))
        .route("/alerts/:entry_id/persist", post(handlers::alerts::persist_alert))
        .route("/alerts/:entry_id/feedback", post(handlers::alerts::add_feedback))
        .route("/incidents", get(handlers::incidents::list_incidents))
        .route("/environments", get(handlers::environments::list_environments))
        .route("/environments/:env_id", get(handlers::environments::environment_detail))
        .route(
            "/environments/:env_id/correlation",
            get(handlers::environments::environment_correlation),
        )
        .route("/correlation/global", get(handlers::correlation::global_correlation))
        .route("/correlation/graph", get(handlers::correlation::correlation_graph))
        .with_state(Arc::clone(&app_state));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let app = Router::new()
        .route("/api-docs/openapi.json", get(openapi_json))
        .merge(api_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);
    tracing::info!("Lighthouse is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
