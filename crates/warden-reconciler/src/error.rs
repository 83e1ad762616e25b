//! Error types for reconciliation

use thiserror::Error;
use warden_remediation::RemediationError;
use warden_types::GuildId;

/// Result type for reconciliation
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// A reconciliation step that could not complete
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("{step} failed: {source}")]
    Remediation {
        step: &'static str,
        #[source]
        source: RemediationError,
    },

    /// The bot left the guild; it is not checked again until it rejoins.
    #[error("guild {0} was left")]
    Departed(GuildId),
}

impl ReconcileError {
    pub(crate) fn at(step: &'static str) -> impl Fn(RemediationError) -> ReconcileError {
        move |source| ReconcileError::Remediation { step, source }
    }

    pub fn step(&self) -> &'static str {
        match self {
            ReconcileError::Remediation { step, .. } => step,
            ReconcileError::Departed(_) => "register",
        }
    }
}
