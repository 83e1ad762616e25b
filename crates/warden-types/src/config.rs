//! Guild configuration snapshot and typed per-module settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::ids::{ChannelId, GuildId, MessageId, RoleId};
use crate::rule::{Rule, TriggerKind};

/// Well-known module names.
pub mod modules {
    pub const MODERATION: &str = "Moderation";
    pub const TICKETS: &str = "Tickets";
    pub const WELCOME: &str = "Welcome";
    pub const LOGGING: &str = "Logging";
    pub const AUTO_ROLES: &str = "AutoRoles";
}

/// Subscription tier of a guild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PremiumTier {
    #[default]
    Free,
    Premium,
    Enterprise,
}

impl PremiumTier {
    pub fn is_paid(&self) -> bool {
        !matches!(self, PremiumTier::Free)
    }
}

/// Moderation (classifier) settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationSettings {
    /// Route message text through the external classifier
    #[serde(default)]
    pub classifier_enabled: bool,

    /// Cooldown applied to classifier removals per subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_cooldown_secs: Option<u64>,
}

/// Welcome/goodbye greetings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_channel: Option<ChannelId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goodbye_channel: Option<ChannelId>,

    /// Template; `{user}` and `{guild}` are substituted
    #[serde(default = "default_welcome_template")]
    pub welcome_template: String,

    #[serde(default = "default_goodbye_template")]
    pub goodbye_template: String,
}

impl Default for WelcomeSettings {
    fn default() -> Self {
        Self {
            welcome_channel: None,
            goodbye_channel: None,
            welcome_template: default_welcome_template(),
            goodbye_template: default_goodbye_template(),
        }
    }
}

/// Support tickets opened by reacting to a designated message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_message: Option<MessageId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_emoji: Option<String>,

    /// Category new ticket channels go under; top level when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ChannelId>,

    /// Roles that can see every ticket
    #[serde(default)]
    pub support_roles: Vec<RoleId>,

    /// First message in a new ticket; `{user}` is substituted
    #[serde(default = "default_ticket_template")]
    pub welcome_template: String,
}

impl Default for TicketSettings {
    fn default() -> Self {
        Self {
            creation_message: None,
            creation_emoji: None,
            category: None,
            support_roles: Vec::new(),
            welcome_template: default_ticket_template(),
        }
    }
}

impl TicketSettings {
    /// Whether a reaction with `emoji` on `message_id` opens a ticket.
    pub fn opens_ticket(&self, message_id: MessageId, emoji: &str) -> bool {
        self.creation_message == Some(message_id) && self.creation_emoji.as_deref() == Some(emoji)
    }
}

/// Logging module settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_channel: Option<ChannelId>,
}

/// Typed settings resolved once when a configuration is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    #[serde(default)]
    pub moderation: ModerationSettings,

    #[serde(default)]
    pub welcome: WelcomeSettings,

    #[serde(default)]
    pub tickets: TicketSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl GuildSettings {
    /// Resolve the backend's free-form settings map.
    ///
    /// Unknown keys are ignored. Known keys with the wrong shape are
    /// rejected so a misconfigured guild never runs on half-parsed settings.
    pub fn from_raw(raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        let mut settings = GuildSettings::default();

        if let Some(v) = raw.get("enableAIModeration") {
            settings.moderation.classifier_enabled = as_bool("enableAIModeration", v)?;
        }
        if let Some(v) = raw.get("aiModerationCooldownSeconds") {
            settings.moderation.classifier_cooldown_secs =
                as_opt_u64("aiModerationCooldownSeconds", v)?;
        }
        if let Some(v) = raw.get("welcomeChannelId") {
            settings.welcome.welcome_channel = as_opt_snowflake("welcomeChannelId", v)?;
        }
        if let Some(v) = raw.get("goodbyeChannelId") {
            settings.welcome.goodbye_channel = as_opt_snowflake("goodbyeChannelId", v)?;
        }
        if let Some(Value::String(s)) = raw.get("welcomeMessage") {
            settings.welcome.welcome_template = s.clone();
        }
        if let Some(Value::String(s)) = raw.get("goodbyeMessage") {
            settings.welcome.goodbye_template = s.clone();
        }
        if let Some(v) = raw.get("ticketCreationMessageId") {
            settings.tickets.creation_message = as_opt_snowflake("ticketCreationMessageId", v)?;
        }
        if let Some(Value::String(s)) = raw.get("ticketCreationEmoji") {
            if !s.is_empty() {
                settings.tickets.creation_emoji = Some(s.clone());
            }
        }
        if let Some(v) = raw.get("ticketCategoryId") {
            settings.tickets.category = as_opt_snowflake("ticketCategoryId", v)?;
        }
        if let Some(v) = raw.get("supportRoleIds") {
            settings.tickets.support_roles = as_snowflake_list("supportRoleIds", v)?;
        }
        if let Some(Value::String(s)) = raw.get("ticketWelcomeMessage") {
            if !s.is_empty() {
                settings.tickets.welcome_template = s.clone();
            }
        }
        if let Some(v) = raw.get("logChannelId") {
            settings.logging.log_channel = as_opt_snowflake("logChannelId", v)?;
        }

        Ok(settings)
    }
}

/// A guild's moderation configuration as loaded from the store.
///
/// Consumers only ever see this through an `Arc` snapshot; a newer
/// configuration replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: GuildId,
    #[serde(default)]
    pub guild_name: String,
    #[serde(default)]
    pub premium_tier: PremiumTier,
    #[serde(default)]
    pub modules: BTreeMap<String, bool>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub settings: GuildSettings,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_expiry: Option<DateTime<Utc>>,
}

impl GuildConfig {
    pub fn new(guild_id: GuildId, guild_name: impl Into<String>) -> Self {
        Self {
            guild_id,
            guild_name: guild_name.into(),
            premium_tier: PremiumTier::Free,
            modules: BTreeMap::new(),
            rules: Vec::new(),
            settings: GuildSettings::default(),
            last_updated: Utc::now(),
            cache_expiry: None,
        }
    }

    /// Fail-closed configuration: nothing enabled, no rules.
    pub fn disabled(guild_id: GuildId) -> Self {
        Self::new(guild_id, String::new())
    }

    pub fn with_module(mut self, module: impl Into<String>, enabled: bool) -> Self {
        self.modules.insert(module.into(), enabled);
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_tier(mut self, tier: PremiumTier) -> Self {
        self.premium_tier = tier;
        self
    }

    pub fn with_settings(mut self, settings: GuildSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Modules absent from the map are disabled.
    pub fn module_enabled(&self, module: &str) -> bool {
        self.modules.get(module).copied().unwrap_or(false)
    }

    pub fn has_rule_of_kind(&self, kind: TriggerKind) -> bool {
        self.rules.iter().any(|r| r.trigger_kind() == kind)
    }
}

fn default_welcome_template() -> String {
    "Welcome {user} to {guild}!".to_string()
}

fn default_goodbye_template() -> String {
    "{user} has left {guild}.".to_string()
}

fn default_ticket_template() -> String {
    "Hello {user}! 👋\nSupport staff will be with you shortly.\nPlease describe your issue in detail."
        .to_string()
}

fn as_bool(field: &'static str, value: &Value) -> Result<bool, ValidationError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(ValidationError::InvalidField {
            field,
            reason: format!("expected boolean, got {}", other),
        }),
    }
}

fn as_opt_u64(field: &'static str, value: &Value) -> Result<Option<u64>, ValidationError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| ValidationError::InvalidField {
                field,
                reason: format!("expected non-negative integer, got {}", n),
            }),
        other => Err(ValidationError::InvalidField {
            field,
            reason: format!("expected integer, got {}", other),
        }),
    }
}

/// Snowflakes arrive either as JSON numbers or decimal strings.
pub(crate) fn parse_snowflake(field: &'static str, value: &Value) -> Result<u64, ValidationError> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ValidationError::InvalidField {
        field,
        reason: format!("expected snowflake id, got {}", value),
    })
}

fn as_opt_snowflake<T: From<u64>>(
    field: &'static str,
    value: &Value,
) -> Result<Option<T>, ValidationError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        other => parse_snowflake(field, other).map(|raw| Some(T::from(raw))),
    }
}

fn as_snowflake_list<T: From<u64>>(
    field: &'static str,
    value: &Value,
) -> Result<Vec<T>, ValidationError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| parse_snowflake(field, item).map(T::from))
            .collect(),
        other => Err(ValidationError::InvalidField {
            field,
            reason: format!("expected list of snowflake ids, got {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_module_is_disabled() {
        let config = GuildConfig::new(GuildId::new(1), "g").with_module(modules::MODERATION, true);
        assert!(config.module_enabled(modules::MODERATION));
        assert!(!config.module_enabled(modules::WELCOME));
    }

    #[test]
    fn test_disabled_config_enables_nothing() {
        let config = GuildConfig::disabled(GuildId::new(9));
        assert!(config.modules.is_empty());
        assert!(config.rules.is_empty());
        assert!(!config.settings.moderation.classifier_enabled);
    }

    #[test]
    fn test_settings_from_raw() {
        let raw = json!({
            "enableAIModeration": true,
            "welcomeChannelId": "123456789",
            "goodbyeChannelId": 42,
            "logChannelId": null,
            "unrelated": [1, 2, 3]
        });
        let settings = GuildSettings::from_raw(raw.as_object().unwrap()).unwrap();
        assert!(settings.moderation.classifier_enabled);
        assert_eq!(settings.welcome.welcome_channel, Some(ChannelId::new(123456789)));
        assert_eq!(settings.welcome.goodbye_channel, Some(ChannelId::new(42)));
        assert_eq!(settings.logging.log_channel, None);
        assert_eq!(settings.welcome.welcome_template, "Welcome {user} to {guild}!");
    }

    #[test]
    fn test_ticket_settings_from_raw() {
        let raw = json!({
            "ticketCreationMessageId": "900",
            "ticketCreationEmoji": "🎫",
            "ticketCategoryId": 70,
            "supportRoleIds": ["11", 12],
            "ticketWelcomeMessage": ""
        });
        let tickets = GuildSettings::from_raw(raw.as_object().unwrap()).unwrap().tickets;
        assert!(tickets.opens_ticket(MessageId::new(900), "🎫"));
        assert!(!tickets.opens_ticket(MessageId::new(900), "👍"));
        assert!(!tickets.opens_ticket(MessageId::new(901), "🎫"));
        assert_eq!(tickets.category, Some(ChannelId::new(70)));
        assert_eq!(tickets.support_roles, vec![RoleId::new(11), RoleId::new(12)]);
        assert!(tickets.welcome_template.starts_with("Hello {user}!"));

        let raw = json!({ "supportRoleIds": "11" });
        assert!(GuildSettings::from_raw(raw.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_unconfigured_tickets_open_nothing() {
        assert!(!TicketSettings::default().opens_ticket(MessageId::new(1), "🎫"));
    }

    #[test]
    fn test_settings_reject_wrong_shape() {
        let raw = json!({ "enableAIModeration": "sometimes" });
        let err = GuildSettings::from_raw(raw.as_object().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidField { field: "enableAIModeration", .. }
        ));
    }
}
