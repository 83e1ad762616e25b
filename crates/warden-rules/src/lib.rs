//! Warden Rules - event evaluation against a guild's rule set
//!
//! - [`RuleEngine`]: selects at most one action per event
//! - [`CooldownStore`]: atomic per (rule, subject) firing records
//! - [`Classifier`]: external content classifier, consulted as the last rule

#![deny(unsafe_code)]

pub mod classifier;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod mocks;

pub use classifier::{
    Classifier, HttpModerationClassifier, NoopClassifier, Verdict, DEFAULT_MODERATION_MODEL,
};
pub use cooldown::{CooldownClaim, CooldownEntry, CooldownStore, InMemoryCooldownStore};
pub use engine::{trigger_scope, Evaluation, RuleEngine, CONTENT_SCOPE, DEFAULT_CLASSIFIER_TIMEOUT};
pub use error::{ClassifierError, ClassifierResult, CooldownActive};
