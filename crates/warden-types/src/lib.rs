//! Warden Types - shared domain model for the moderation runtime
//!
//! Everything that crosses a crate boundary lives here:
//!
//! - **ids**: snowflake newtypes for guilds, users, channels, messages, roles
//! - **config**: `GuildConfig` snapshots with typed per-module settings
//! - **rule**: ordered, cooldown-gated trigger/action pairs
//! - **event**: gateway events as delivered to the runtime
//! - **action**: the engine's selection and the context it is applied in
//! - **wire**: validation of the configuration store's JSON format

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod action;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod rule;
pub mod wire;

pub use action::{ActionContext, CooldownKey, SelectedAction};
pub use config::{
    modules, GuildConfig, GuildSettings, LoggingSettings, ModerationSettings, PremiumTier,
    TicketSettings, WelcomeSettings,
};
pub use error::ValidationError;
pub use event::{EventKind, EventPayload, GatewayEvent};
pub use ids::{ChannelId, GuildId, MessageId, RoleId, RuleId, UserId};
pub use rule::{ActionKind, Rule, RuleAction, Trigger, TriggerKind, DEFAULT_PRIORITY};
pub use wire::{GuildConfigDto, RuleDto};
