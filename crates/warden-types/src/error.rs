//! Validation errors raised while turning store payloads into typed values.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown trigger type: {0}")]
    UnknownTrigger(String),

    #[error("unknown action type: {0}")]
    UnknownAction(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
