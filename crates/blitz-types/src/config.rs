//! Runtime configuration types.
//!
//! `RuntimeConfig` is the typed form of `blitz.toml`. Every section and field
//! has a default, so an empty file (or no file) yields a working local setup.
//! Secrets are held as [`SecretString`] and never serialized back out.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::tool::TransportKind;

/// Top-level configuration for the agent runtime.
#[derive(Debug, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// How to reach the tool backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    /// WebSocket endpoint (`ws://` or `wss://`).
    #[serde(default = "default_transport_url")]
    pub url: String,
    /// Program to spawn for the stdio transport.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Deadline for a single request/response round trip.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_transport_url() -> String {
    "ws://localhost:8000/mcp".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            url: default_transport_url(),
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            request_timeout_secs: default_request_timeout_secs(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff settings shared by every reconnect loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database (direct-mode data store)
// ---------------------------------------------------------------------------

/// Connection parameters for the direct-mode backing store.
///
/// `url` takes precedence over the discrete fields when set; it is also the
/// only way to point direct mode at a SQLite file.
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub database: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "postgres".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_statement_timeout_secs() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_db_host(),
            port: default_db_port(),
            database: default_db_name(),
            user: default_db_user(),
            password: None,
            ssl_mode: default_ssl_mode(),
            pool_size: default_pool_size(),
            statement_timeout_secs: default_statement_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Semantic memory
// ---------------------------------------------------------------------------

/// Semantic memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `sqlite://...` or `postgres://...`. Unset means a SQLite file in the
    /// data directory.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_url: None,
            recall: RecallConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Default recall bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_message_range")]
    pub message_range: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

fn default_top_k() -> usize {
    5
}

fn default_message_range() -> usize {
    3
}

fn default_similarity_threshold() -> f32 {
    0.7
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            message_range: default_message_range(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Vector layout and retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_max_message_age_days")]
    pub max_message_age_days: u32,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u32,
    /// Newest messages scanned per SQLite similarity search. Older messages
    /// are not ranked. Postgres ranks in the index and ignores this.
    #[serde(default = "default_sqlite_search_candidates")]
    pub sqlite_search_candidates: usize,
}

fn default_dimension() -> usize {
    1536
}

fn default_max_message_age_days() -> u32 {
    90
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

fn default_sqlite_search_candidates() -> usize {
    10_000
}

impl StorageConfig {
    pub fn max_message_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.max_message_age_days))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.cleanup_interval_hours) * 3600)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            max_message_age_days: default_max_message_age_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
            sqlite_search_candidates: default_sqlite_search_candidates(),
        }
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// Which embedding API to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
}

/// Embedding provider settings.
#[derive(Debug, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// Azure resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    #[serde(default)]
    pub azure_endpoint: Option<String>,
    #[serde(default)]
    pub azure_deployment: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_version() -> String {
    "2025-03-01-preview".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: default_embedding_model(),
            api_key: None,
            base_url: default_embedding_base_url(),
            azure_endpoint: None,
            azure_deployment: None,
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics + logging
// ---------------------------------------------------------------------------

/// Metrics collector sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of recent samples kept for latency and token windows.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_recent_errors")]
    pub recent_errors: usize,
    #[serde(default = "default_top_tools")]
    pub top_tools: usize,
}

fn default_window_size() -> usize {
    1000
}

fn default_recent_errors() -> usize {
    50
}

fn default_top_tools() -> usize {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: default_window_size(),
            recent_errors: default_recent_errors(),
            top_tools: default_top_tools(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.transport.kind, TransportKind::WebSocket);
        assert_eq!(config.transport.backoff.max_attempts, 3);
        assert_eq!(config.transport.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.pool_size, 10);
        assert_eq!(config.memory.recall.top_k, 5);
        assert_eq!(config.memory.recall.message_range, 3);
        assert!((config.memory.recall.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.memory.storage.dimension, 1536);
        assert_eq!(config.memory.storage.max_message_age_days, 90);
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.metrics.window_size, 1000);
    }

    #[test]
    fn test_runtime_config_deserialize_empty() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert!(config.memory.enabled);
        assert_eq!(config.metrics.top_tools, 10);
    }

    #[test]
    fn test_runtime_config_deserialize_with_values() {
        let toml_str = r#"
[transport]
kind = "stdio"
command = "blitz-mcp"
args = ["--stdio"]
request_timeout_secs = 5

[transport.backoff]
max_attempts = 5
base_delay_ms = 10

[database]
host = "db.internal"
password = "hunter2"

[memory]
database_url = "postgres://localhost/memory"

[memory.recall]
top_k = 8
similarity_threshold = 0.5

[embedding]
provider = "azure_openai"
azure_deployment = "embed-small"
api_key = "sk-test"
"#;
        let config: RuntimeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.transport.kind, TransportKind::Stdio);
        assert_eq!(config.transport.command.as_deref(), Some("blitz-mcp"));
        assert_eq!(config.transport.backoff.max_attempts, 5);
        assert!((config.transport.backoff.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(
            config.database.password.as_ref().map(|p| p.expose_secret()),
            Some("hunter2")
        );
        assert_eq!(config.memory.recall.top_k, 8);
        assert_eq!(config.memory.recall.message_range, 3);
        assert_eq!(config.embedding.provider, EmbeddingProvider::AzureOpenAi);
        assert_eq!(config.embedding.api_version, "2025-03-01-preview");
    }

    #[test]
    fn test_retention_durations() {
        let storage = StorageConfig::default();
        assert_eq!(storage.max_message_age(), chrono::Duration::days(90));
        assert_eq!(storage.cleanup_interval(), Duration::from_secs(24 * 3600));
    }
}
