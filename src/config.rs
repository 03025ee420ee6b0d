use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    pub llm: LlmConfig,
    pub clustering: ClusteringConfig,
    pub issues: IssuesConfig,
    pub alerts: AlertsConfig,
    pub correlation: CorrelationConfig,
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Embedding backend selection. The "hash" provider is fully local and
/// deterministic; "openai" talks to any OpenAI-compatible /embeddings server
/// (TEI, Ollama's shim, an actual OpenAI deployment).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub dimension: usize,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

/// Collection name prefixes. Collections are additionally namespaced with the
/// embedding function id so switching models never mixes vector dimensions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub log_prefix: String,
    pub proto_prefix: String,
    pub template_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Online clustering: max prototype distance for reuse.
    pub online_distance_threshold: f64,
    /// Cluster size at which the first candidate is emitted.
    pub min_logs_for_classification: i64,
    /// Re-emit a candidate every N further hits (0 = never republish).
    pub republish_every: i64,
    /// Minimum seconds between republished candidates per cluster.
    pub republish_min_interval_sec: f64,
    /// Single-pass correlation: centroid assignment threshold.
    pub distance_threshold: f64,
    /// Single-pass correlation: minimum cluster size to report.
    pub min_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IssuesConfig {
    pub inactivity_sec: f64,
    pub max_logs_for_llm: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub ttl_sec: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub disable_hdbscan: bool,
    pub disable_global_clustering: bool,
    pub fallback_redis: bool,
    pub env_discovery_timeout_sec: f64,
    /// Comma-separated fallback environment ids when discovery times out.
    pub sim_env_ids: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub enable_issues_aggregator: bool,
    pub enable_cluster_enricher: bool,
    pub enable_cluster_metrics: bool,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "lighthouse")]
#[command(version, about = "Lighthouse - streaming log analytics and incident correlation")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Redis URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub redis_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,lighthouse=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Enable/disable the cluster enricher worker (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub enable_cluster_enricher: Option<bool>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(&cli_args)
    }

    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Pipeline knobs keep the flat names operators already know
    /// (ONLINE_CLUSTER_DISTANCE_THRESHOLD, ISSUE_INACTIVITY_SEC, ...);
    /// server basics use the APP_ prefix.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("APP_SERVER_PORT") {
            match port.parse::<u16>() {
                Ok(val) => self.server.port = val,
                Err(e) => tracing::warn!("Invalid APP_SERVER_PORT '{}': {}", port, e),
            }
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
        }

        env_f64(
            "ONLINE_CLUSTER_DISTANCE_THRESHOLD",
            &mut self.clustering.online_distance_threshold,
        );
        env_i64(
            "CLUSTER_MIN_LOGS_FOR_CLASSIFICATION",
            &mut self.clustering.min_logs_for_classification,
        );
        env_i64("CLUSTER_CANDIDATE_REPUBLISH_EVERY", &mut self.clustering.republish_every);
        env_f64(
            "CLUSTER_CANDIDATE_REPUBLISH_MIN_INTERVAL_SEC",
            &mut self.clustering.republish_min_interval_sec,
        );
        env_f64("CLUSTER_DISTANCE_THRESHOLD", &mut self.clustering.distance_threshold);
        env_usize("CLUSTER_MIN_SIZE", &mut self.clustering.min_size);

        env_f64("ISSUE_INACTIVITY_SEC", &mut self.issues.inactivity_sec);
        env_usize("ISSUE_MAX_LOGS_FOR_LLM", &mut self.issues.max_logs_for_llm);

        env_i64("ALERTS_TTL_SEC", &mut self.alerts.ttl_sec);

        if let Ok(prefix) = std::env::var("CHROMA_LOG_COLLECTION_PREFIX") {
            self.vector.log_prefix = prefix;
        }
        if let Ok(prefix) = std::env::var("CHROMA_PROTO_COLLECTION_PREFIX") {
            self.vector.proto_prefix = prefix;
        }
        if let Ok(prefix) = std::env::var("CHROMA_TEMPLATE_COLLECTION_PREFIX") {
            self.vector.template_prefix = prefix;
        }

        env_bool("DISABLE_HDBSCAN", &mut self.correlation.disable_hdbscan);
        env_bool("DISABLE_GLOBAL_CLUSTERING", &mut self.correlation.disable_global_clustering);
        env_bool("CORRELATION_FALLBACK_REDIS", &mut self.correlation.fallback_redis);
        env_f64("ENV_DISCOVERY_TIMEOUT_SEC", &mut self.correlation.env_discovery_timeout_sec);
        if let Ok(ids) = std::env::var("SIM_ENV_IDS") {
            self.correlation.sim_env_ids = ids;
        }

        env_bool("ENABLE_ISSUES_AGGREGATOR", &mut self.workers.enable_issues_aggregator);
        env_bool("ENABLE_CLUSTER_ENRICHER", &mut self.workers.enable_cluster_enricher);
        env_bool("ENABLE_CLUSTER_METRICS", &mut self.workers.enable_cluster_metrics);

        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Ok(base) = std::env::var("EMBEDDING_API_BASE") {
            self.embedding.api_base = base;
        }
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
            self.embedding.api_key = key;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }

        env_bool("LLM_ENABLED", &mut self.llm.enabled);
        if let Ok(base) = std::env::var("LLM_API_BASE") {
            self.llm.api_base = base;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }
        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }
        if let Some(url) = &args.redis_url {
            self.redis.url = url.clone();
            tracing::info!("Override redis.url from CLI");
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }
        if let Some(enabled) = args.enable_cluster_enricher {
            self.workers.enable_cluster_enricher = enabled;
            tracing::info!("Override workers.enable_cluster_enricher from CLI: {}", enabled);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        if self.redis.url.is_empty() {
            anyhow::bail!("Redis URL cannot be empty");
        }
        if self.embedding.dimension == 0 {
            anyhow::bail!("embedding.dimension must be > 0");
        }
        if self.clustering.min_logs_for_classification <= 0 {
            anyhow::bail!("clustering.min_logs_for_classification must be > 0");
        }
        if self.clustering.online_distance_threshold <= 0.0 {
            anyhow::bail!("clustering.online_distance_threshold must be > 0");
        }
        if self.alerts.ttl_sec <= 0 {
            anyhow::bail!("alerts.ttl_sec must be > 0");
        }
        Ok(())
    }

    pub fn fallback_env_ids(&self) -> Vec<String> {
        self.correlation
            .sim_env_ids
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect()
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

// =========================
// Helpers for parsing values
// =========================

fn env_f64(name: &str, target: &mut f64) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse::<f64>() {
            Ok(val) => *target = val,
            Err(e) => tracing::warn!("Invalid {} '{}': {} (keep {})", name, raw, e, target),
        }
    }
}

fn env_i64(name: &str, target: &mut i64) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse::<i64>() {
            Ok(val) => *target = val,
            Err(e) => tracing::warn!("Invalid {} '{}': {} (keep {})", name, raw, e, target),
        }
    }
}

fn env_usize(name: &str, target: &mut usize) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse::<usize>() {
            Ok(val) => *target = val,
            Err(e) => tracing::warn!("Invalid {} '{}': {} (keep {})", name, raw, e, target),
        }
    }
}

fn env_bool(name: &str, target: &mut bool) {
    if let Ok(raw) = std::env::var(name) {
        *target = matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes");
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: "redis://127.0.0.1:6379".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,lighthouse=debug".to_string(),
            file: Some("logs/lighthouse.log".to_string()),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            dimension: 256,
            api_base: "http://localhost:8081/v1".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            log_prefix: "logs_".to_string(),
            proto_prefix: "prototypes_".to_string(),
            template_prefix: "templates_".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            timeout_seconds: 60,
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            online_distance_threshold: 0.4,
            min_logs_for_classification: 10,
            republish_every: 50,
            republish_min_interval_sec: 60.0,
            distance_threshold: 0.45,
            min_size: 5,
        }
    }
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self { inactivity_sec: 60.0, max_logs_for_llm: 20 }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { ttl_sec: 3600 }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            disable_hdbscan: false,
            disable_global_clustering: false,
            fallback_redis: false,
            env_discovery_timeout_sec: 2.0,
            sim_env_ids: "env-001,env-002,env-003".to_string(),
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            enable_issues_aggregator: true,
            enable_cluster_enricher: true,
            enable_cluster_metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fallback_env_ids_split_and_trimmed() {
        let mut config = Config::default();
        config.correlation.sim_env_ids = " env-001, env-002 ,,env-003".to_string();
        assert_eq!(config.fallback_env_ids(), vec!["env-001", "env-002", "env-003"]);
    }

    #[test]
    fn zero_port_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
