//! Configuration management for ConvoForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration (gateway and ingestor endpoints)
    #[serde(default)]
    pub server: ServerConfig,

    /// Relational store configuration
    pub database: DatabaseConfig,

    /// Vector store configuration
    #[serde(default)]
    pub vector: VectorConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Job broker configuration
    #[serde(default)]
    pub jobs: JobConfig,

    /// Sessionizer configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Attachment processing configuration
    #[serde(default)]
    pub attachments: AttachmentConfig,

    /// Reconciler configuration
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorConfig {
    /// Vector store URL; falls back to the primary database URL
    pub url: Option<String>,

    /// Statement timeout for vector operations, seconds
    #[serde(default = "default_vector_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension. Required: forms the embedder identity together
    /// with the model name, and a mismatch against the vector namespace is
    /// a fatal startup error.
    pub dimension: usize,

    /// Bumped by operators when the embedder identity changes; the
    /// reconciler treats every indexed record as stale on the next cycle.
    #[serde(default = "default_identity_version")]
    pub identity_version: u32,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Batch size for embedding requests
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobConfig {
    /// Maximum delivery attempts before dead-lettering
    #[serde(default = "default_job_max_attempts")]
    pub max_attempts: i32,

    /// Backoff base in seconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Backoff cap in seconds
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Deduplication window in seconds
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,

    /// Number of concurrent job executors per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Queue depth above which low-priority enqueues are shed
    #[serde(default = "default_backpressure_hi")]
    pub backpressure_hi: i64,

    /// Poll interval when the queue is empty, milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lease sweeper interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Execution time that triggers a slow-job warning, seconds
    #[serde(default = "default_soft_timeout")]
    pub soft_timeout_secs: u64,

    /// Execution time after which the job is aborted, seconds
    #[serde(default = "default_hard_timeout")]
    pub hard_timeout_secs: u64,

    /// Backfill page size
    #[serde(default = "default_backfill_page_size")]
    pub backfill_page_size: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Temporal gap that breaks a session, seconds
    #[serde(default = "default_session_gap")]
    pub time_gap_secs: i64,

    /// Token budget per session (post-enrichment estimate)
    #[serde(default = "default_session_max_tokens")]
    pub max_tokens: usize,

    /// Minimum messages per session
    #[serde(default = "default_session_min_messages")]
    pub min_messages: usize,

    /// Enable semantic refinement of large sessions
    #[serde(default = "default_semantic_refine_enabled")]
    pub semantic_refine_enabled: bool,

    /// Session size that triggers semantic refinement
    #[serde(default = "default_semantic_refine_threshold")]
    pub semantic_refine_threshold_messages: usize,

    /// Percentile of consecutive-similarity drops that become breakpoints
    #[serde(default = "default_semantic_percentile")]
    pub semantic_percentile: f64,

    /// Messages loaded before the anchor when sessionizing
    #[serde(default = "default_window_before")]
    pub window_before: u64,

    /// Messages loaded after the anchor when sessionizing
    #[serde(default = "default_window_after")]
    pub window_after: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttachmentConfig {
    /// Maximum size for text/markdown attachments, bytes
    #[serde(default = "default_max_size_text")]
    pub max_size_text: u64,

    /// Maximum size for PDF attachments, bytes
    #[serde(default = "default_max_size_pdf")]
    pub max_size_pdf: u64,

    /// Maximum size for image attachments, bytes
    #[serde(default = "default_max_size_image")]
    pub max_size_image: u64,

    /// Attachment fetch timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Vision collaborator timeout in seconds
    #[serde(default = "default_vision_timeout")]
    pub vision_timeout_secs: u64,

    /// Extensions rejected before any byte is fetched
    #[serde(default = "default_blocked_extensions")]
    pub blocked_extensions: Vec<String>,

    /// Minimum tokens per document chunk
    #[serde(default = "default_chunk_min_tokens")]
    pub chunk_min_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    /// Cycle interval per guild, seconds
    #[serde(default = "default_reconciler_interval")]
    pub interval_secs: u64,

    /// Bounded batch size per drift class per cycle
    #[serde(default = "default_reconciler_batch")]
    pub batch_limit: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 16 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_vector_timeout() -> u64 { 10 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_identity_version() -> u32 { 1 }
fn default_embedding_timeout() -> u64 { 10 }
fn default_embedding_batch_size() -> usize { 32 }
fn default_job_max_attempts() -> i32 { 5 }
fn default_backoff_base() -> u64 { 1 }
fn default_backoff_cap() -> u64 { 600 }
fn default_visibility_timeout() -> u64 { 300 }
fn default_dedup_window() -> u64 { 300 }
fn default_worker_concurrency() -> usize { 4 }
fn default_backpressure_hi() -> i64 { 10_000 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_sweep_interval() -> u64 { 30 }
fn default_soft_timeout() -> u64 { 300 }
fn default_hard_timeout() -> u64 { 600 }
fn default_backfill_page_size() -> u64 { 500 }
fn default_session_gap() -> i64 { 900 }
fn default_session_max_tokens() -> usize { 480 }
fn default_session_min_messages() -> usize { 2 }
fn default_semantic_refine_enabled() -> bool { true }
fn default_semantic_refine_threshold() -> usize { 20 }
fn default_semantic_percentile() -> f64 { 5.0 }
fn default_window_before() -> u64 { 100 }
fn default_window_after() -> u64 { 50 }
fn default_max_size_text() -> u64 { 2 * 1024 * 1024 }
fn default_max_size_pdf() -> u64 { 20 * 1024 * 1024 }
fn default_max_size_image() -> u64 { 10 * 1024 * 1024 }
fn default_fetch_timeout() -> u64 { 30 }
fn default_vision_timeout() -> u64 { 60 }
fn default_blocked_extensions() -> Vec<String> {
    [".exe", ".bat", ".sh", ".ps1", ".cmd"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_chunk_min_tokens() -> usize { 32 }
fn default_reconciler_interval() -> u64 { 900 }
fn default_reconciler_batch() -> u64 { 200 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "convoforge".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__EMBEDDING__DIMENSION=768
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate cross-field constraints once at startup.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Message(
                "embedding.dimension must be non-zero".to_string(),
            ));
        }
        if self.jobs.max_attempts < 1 {
            return Err(ConfigError::Message(
                "jobs.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.jobs.backoff_base_secs == 0 {
            return Err(ConfigError::Message(
                "jobs.backoff_base_secs must be non-zero".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.session.semantic_percentile) {
            return Err(ConfigError::Message(
                "session.semantic_percentile must be in [0, 100]".to_string(),
            ));
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Get the vector store URL (falls back to primary database)
    pub fn vector_url(&self) -> &str {
        self.vector.url.as_deref().unwrap_or(&self.database.url)
    }

    /// The embedder identity recorded in the runtime manifest at startup.
    pub fn embedder_identity(&self) -> String {
        format!(
            "{}:{}:d{}:v{}",
            self.embedding.provider,
            self.embedding.model,
            self.embedding.dimension,
            self.embedding.identity_version
        )
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/convoforge".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            vector: VectorConfig::default(),
            embedding: EmbeddingConfig {
                provider: default_embedding_provider(),
                api_key: None,
                api_base: None,
                model: default_embedding_model(),
                dimension: 768,
                identity_version: default_identity_version(),
                timeout_secs: default_embedding_timeout(),
                batch_size: default_embedding_batch_size(),
            },
            jobs: JobConfig::default(),
            session: SessionConfig::default(),
            attachments: AttachmentConfig::default(),
            reconciler: ReconcilerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_vector_timeout(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_job_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            visibility_timeout_secs: default_visibility_timeout(),
            dedup_window_secs: default_dedup_window(),
            worker_concurrency: default_worker_concurrency(),
            backpressure_hi: default_backpressure_hi(),
            poll_interval_ms: default_poll_interval_ms(),
            sweep_interval_secs: default_sweep_interval(),
            soft_timeout_secs: default_soft_timeout(),
            hard_timeout_secs: default_hard_timeout(),
            backfill_page_size: default_backfill_page_size(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            time_gap_secs: default_session_gap(),
            max_tokens: default_session_max_tokens(),
            min_messages: default_session_min_messages(),
            semantic_refine_enabled: default_semantic_refine_enabled(),
            semantic_refine_threshold_messages: default_semantic_refine_threshold(),
            semantic_percentile: default_semantic_percentile(),
            window_before: default_window_before(),
            window_after: default_window_after(),
        }
    }
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_size_text: default_max_size_text(),
            max_size_pdf: default_max_size_pdf(),
            max_size_image: default_max_size_image(),
            fetch_timeout_secs: default_fetch_timeout(),
            vision_timeout_secs: default_vision_timeout(),
            blocked_extensions: default_blocked_extensions(),
            chunk_min_tokens: default_chunk_min_tokens(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconciler_interval(),
            batch_limit: default_reconciler_batch(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.jobs.max_attempts, 5);
        assert_eq!(config.session.time_gap_secs, 900);
        assert_eq!(config.session.max_tokens, 480);
        assert_eq!(config.reconciler.interval_secs, 900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/convoforge");
        assert_eq!(config.vector_url(), "postgres://localhost/convoforge");
    }

    #[test]
    fn test_blocked_extension_defaults() {
        let config = AppConfig::default();
        for ext in [".exe", ".bat", ".sh", ".ps1", ".cmd"] {
            assert!(config.attachments.blocked_extensions.iter().any(|e| e == ext));
        }
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut config = AppConfig::default();
        config.embedding.dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_embedder_identity() {
        let config = AppConfig::default();
        assert_eq!(
            config.embedder_identity(),
            "openai:text-embedding-3-small:d768:v1"
        );
    }
}
