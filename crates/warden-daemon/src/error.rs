//! Error types for the daemon

use thiserror::Error;

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Daemon errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] warden_cache::StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] warden_cache::CacheError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] warden_rules::ClassifierError),

    #[error("Event source error: {0}")]
    EventSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
