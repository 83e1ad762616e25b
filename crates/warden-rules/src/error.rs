//! Error types for rule evaluation

use std::time::Duration;
use thiserror::Error;
use warden_types::CooldownKey;

/// Result type for classifier calls
pub type ClassifierResult<T> = Result<T, ClassifierError>;

/// Errors from the external content classifier
#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),
}

/// Claim refused because the key fired too recently
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cooldown active for {key}, {remaining:?} remaining")]
pub struct CooldownActive {
    pub key: CooldownKey,
    pub remaining: Duration,
}
