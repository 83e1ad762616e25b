//! Error types for remediation calls

use std::time::Duration;
use thiserror::Error;
use warden_types::ActionKind;

/// Result type for remediation API calls
pub type RemediationResult<T> = Result<T, RemediationError>;

/// Failure of a single call against the remediation API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemediationError {
    #[error("Remediation call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Missing permission: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RemediationError {
    /// Worth retrying under the bounded retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemediationError::Timeout(_)
                | RemediationError::RateLimited { .. }
                | RemediationError::Transport(_)
        )
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, RemediationError::Forbidden(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemediationError::NotFound(_))
    }
}

/// Failure to apply a selected action
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("Action needs a {0} but the event carried none")]
    MissingContext(&'static str),

    #[error("{action} failed: {source}")]
    Remote {
        action: ActionKind,
        #[source]
        source: RemediationError,
    },
}

impl ExecutionError {
    pub fn remediation(&self) -> Option<&RemediationError> {
        match self {
            ExecutionError::Remote { source, .. } => Some(source),
            ExecutionError::MissingContext(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemediationError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(RemediationError::RateLimited { retry_after: Duration::ZERO }.is_transient());
        assert!(RemediationError::Transport("reset".into()).is_transient());
        assert!(!RemediationError::Forbidden("manage roles".into()).is_transient());
        assert!(!RemediationError::NotFound("message".into()).is_transient());
        assert!(!RemediationError::Invalid("bad".into()).is_transient());
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::Remote {
            action: ActionKind::Kick,
            source: RemediationError::Forbidden("kick members".into()),
        };
        assert_eq!(err.to_string(), "kick failed: Missing permission: kick members");
        assert!(err.remediation().is_some_and(RemediationError::is_permission));
    }
}
