//! Warden Remediation - the side-effect boundary of the runtime
//!
//! - [`RemediationApi`]: every operation the runtime performs against a guild
//! - [`RemediationClient`]: per-call timeout plus bounded retry of transient failures
//! - [`ActionExecutor`]: applies the engine's selection, claiming cooldowns atomically
//! - [`SandboxRemediationApi`]: in-memory guild model for tests and dry runs

#![deny(unsafe_code)]

pub mod api;
pub mod client;
pub mod error;
pub mod executor;
pub mod sandbox;

pub use api::{
    ChannelInfo, ChannelKind, MessageInfo, NewRole, OverwriteTarget, PermissionOverwrite,
    Permissions, Presence, PresenceStatus, RemediationApi, RoleInfo,
};
pub use client::{RemediationClient, RetryPolicy, DEFAULT_CALL_TIMEOUT};
pub use error::{ExecutionError, RemediationError, RemediationResult};
pub use executor::{render_notice, ActionExecutor, ExecutionOutcome, PermissionIssue};
pub use sandbox::{LaggingRemediationApi, SandboxCall, SandboxRemediationApi};
