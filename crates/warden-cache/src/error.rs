//! Error types for the configuration cache

use thiserror::Error;
use warden_types::{GuildId, ValidationError};

/// Result type for cache backend operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for store fetches
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend could not be reached or rejected the operation
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Entry exists but does not decode
    #[error("Corrupt cache entry at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Value could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the authoritative configuration store
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Guild has no configuration
    #[error("No configuration for {0}")]
    NotFound(GuildId),

    /// Store unreachable or returned a server error
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Payload did not validate
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        StoreError::Invalid(err.to_string())
    }
}
