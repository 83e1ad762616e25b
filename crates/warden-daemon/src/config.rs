//! Configuration for wardend

use serde::{Deserialize, Serialize};
use std::time::Duration;
use warden_cache::CacheConfig;
use warden_reconciler::ReconcilerConfig;
use warden_remediation::RetryPolicy;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Configuration cache
    #[serde(default)]
    pub cache: CacheSettings,

    /// Authoritative configuration store
    #[serde(default)]
    pub store: StoreConfig,

    /// External content classifier
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Remediation calls
    #[serde(default)]
    pub remediation: RemediationConfig,

    /// Hierarchy reconciliation
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Cooldown persistence
    #[serde(default)]
    pub cooldowns: CooldownConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entry lifetime in seconds; also the staleness bound without invalidation
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Store fetch timeout in seconds
    #[serde(default = "default_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub backend: CacheBackendConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            fetch_timeout_secs: default_timeout(),
            backend: CacheBackendConfig::default(),
        }
    }
}

impl CacheSettings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.ttl_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }
}

/// Cache backing store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheBackendConfig {
    /// In-process map
    #[default]
    Memory,

    /// PostgreSQL table, shared across restarts
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Configuration store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Fixture file in the store's wire format
    Memory {
        #[serde(default)]
        fixtures: Option<String>,
    },

    /// Backend HTTP service
    Http {
        base_url: String,

        #[serde(default)]
        api_key: Option<String>,

        #[serde(default = "default_timeout")]
        timeout_secs: u64,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory { fixtures: None }
    }
}

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Call the moderation endpoint; otherwise nothing is ever flagged
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_classifier_endpoint(),
            api_key: None,
            model: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Remediation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// User id the bot acts as
    #[serde(default = "default_bot_user_id")]
    pub bot_user_id: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_timeout(),
            retry: RetryPolicy::default(),
            bot_user_id: default_bot_user_id(),
        }
    }
}

/// Cooldown bookkeeping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Prune and snapshot interval in seconds
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,

    /// Records are dropped this long after their cooldown ends (seconds)
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// JSON snapshot restored at startup and written on prune and shutdown
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            prune_interval_secs: default_prune_interval(),
            retention_secs: default_retention(),
            snapshot_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_cache_ttl() -> u64 {
    15 * 60
}

fn default_timeout() -> u64 {
    10
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_classifier_endpoint() -> String {
    "https://api.openai.com".to_string()
}

fn default_bot_user_id() -> u64 {
    1
}

fn default_prune_interval() -> u64 {
    10 * 60
}

fn default_retention() -> u64 {
    24 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WardenConfig {
    /// Load configuration: defaults, then the optional file, then `WARDEN_*`
    /// environment variables (`__` separates sections, e.g.
    /// `WARDEN_CACHE__TTL_SECS`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&WardenConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with WARDEN_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("WARDEN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
