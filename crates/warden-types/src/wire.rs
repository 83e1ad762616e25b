//! Store wire format
//!
//! The configuration service speaks camelCase JSON with free-form trigger
//! conditions and action parameters. Everything is validated into the typed
//! model here; a rule that fails validation is dropped with a warning so one
//! bad rule cannot take the rest of a guild's configuration down with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::{parse_snowflake, GuildConfig, GuildSettings, PremiumTier};
use crate::error::ValidationError;
use crate::ids::{GuildId, MessageId, RoleId, RuleId};
use crate::rule::{Rule, RuleAction, Trigger, DEFAULT_PRIORITY};

/// Mute duration used when the store does not specify one.
pub const DEFAULT_MUTE_SECS: u64 = 600;

/// Guild configuration as served by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildConfigDto {
    pub guild_id: Value,
    #[serde(default)]
    pub guild_name: String,
    #[serde(default)]
    pub premium_tier: PremiumTier,
    #[serde(default)]
    pub modules: BTreeMap<String, bool>,
    #[serde(default)]
    pub rules: Vec<RuleDto>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Rule as served by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDto {
    pub id: Uuid,
    pub name: String,
    pub module: String,
    pub trigger_type: String,
    #[serde(default)]
    pub trigger_conditions: Value,
    pub action_type: String,
    #[serde(default)]
    pub action_parameters: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub premium_only: bool,
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
    #[serde(default)]
    pub priority: Option<i32>,
}

impl GuildConfigDto {
    /// Validate into a [`GuildConfig`], dropping rules that do not validate.
    pub fn into_config(self) -> Result<GuildConfig, ValidationError> {
        let guild_id = GuildId::new(parse_snowflake("guildId", &self.guild_id)?);
        let settings = GuildSettings::from_raw(&self.settings)?;

        let mut rules = Vec::with_capacity(self.rules.len());
        for dto in self.rules {
            let rule_id = dto.id;
            match Rule::try_from(dto) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    tracing::warn!(
                        guild_id = %guild_id,
                        rule_id = %rule_id,
                        error = %e,
                        "Dropping invalid rule"
                    );
                }
            }
        }

        Ok(GuildConfig {
            guild_id,
            guild_name: self.guild_name,
            premium_tier: self.premium_tier,
            modules: self.modules,
            rules,
            settings,
            last_updated: self.last_updated.unwrap_or_else(Utc::now),
            cache_expiry: None,
        })
    }
}

impl TryFrom<RuleDto> for Rule {
    type Error = ValidationError;

    fn try_from(dto: RuleDto) -> Result<Self, Self::Error> {
        let trigger = parse_trigger(&dto.trigger_type, &dto.trigger_conditions)?;
        let action = parse_action(&dto.action_type, &dto.action_parameters)?;

        Ok(Rule {
            id: RuleId::from_uuid(dto.id),
            name: dto.name,
            module: dto.module,
            trigger,
            action,
            enabled: dto.enabled,
            premium_only: dto.premium_only,
            cooldown_secs: dto.cooldown_seconds.filter(|secs| *secs > 0),
            priority: dto.priority.unwrap_or(DEFAULT_PRIORITY),
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct KeywordConditions {
    #[serde(default)]
    banned_words: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactionConditions {
    emoji: String,
    #[serde(default)]
    message_id: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InviteConditions {
    #[serde(default)]
    allowed_codes: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SpamConditions {
    #[serde(default)]
    max_mentions: Option<u32>,
    #[serde(default)]
    max_repeated_chars: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct NoticeParameters {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MuteParameters {
    #[serde(default)]
    duration_seconds: Option<u64>,
    #[serde(default)]
    duration_minutes: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MembershipParameters {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    delete_message_days: Option<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleParameters {
    role_id: Value,
}

/// Null or missing conditions decode as the type's default.
fn decode<T>(field: &'static str, value: &Value) -> Result<T, ValidationError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    decode_required(field, value)
}

fn decode_required<T>(field: &'static str, value: &Value) -> Result<T, ValidationError>
where
    T: serde::de::DeserializeOwned,
{
    if value.is_null() {
        return Err(ValidationError::MissingField(field));
    }
    serde_json::from_value(value.clone()).map_err(|e| ValidationError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn keywords(value: &Value) -> Result<Vec<String>, ValidationError> {
    let conditions: KeywordConditions = decode("triggerConditions", value)?;
    let words: Vec<String> = conditions
        .banned_words
        .into_iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return Err(ValidationError::MissingField("bannedWords"));
    }
    Ok(words)
}

fn parse_trigger(kind: &str, conditions: &Value) -> Result<Trigger, ValidationError> {
    match kind {
        "MessageContent" => Ok(Trigger::MessageContent {
            banned_words: keywords(conditions)?,
        }),
        "UserJoin" => Ok(Trigger::UserJoin),
        "UserLeave" => Ok(Trigger::UserLeave),
        "ReactionAdded" => {
            let c: ReactionConditions = decode_required("triggerConditions", conditions)?;
            let message_id = match c.message_id {
                None | Some(Value::Null) => None,
                Some(raw) => Some(MessageId::new(parse_snowflake("messageId", &raw)?)),
            };
            Ok(Trigger::ReactionAdded {
                emoji: c.emoji,
                message_id,
            })
        }
        "Username" => Ok(Trigger::Username {
            banned_words: keywords(conditions)?,
        }),
        "InvitePosted" => {
            let c: InviteConditions = decode("triggerConditions", conditions)?;
            Ok(Trigger::InvitePosted {
                allowed_codes: c.allowed_codes,
            })
        }
        "SpamDetection" => {
            let c: SpamConditions = decode("triggerConditions", conditions)?;
            if c.max_mentions.is_none() && c.max_repeated_chars.is_none() {
                return Err(ValidationError::MissingField("maxMentions"));
            }
            Ok(Trigger::SpamDetection {
                max_mentions: c.max_mentions,
                max_repeated_chars: c.max_repeated_chars,
            })
        }
        "AI_Moderation" => Ok(Trigger::Classifier),
        other => Err(ValidationError::UnknownTrigger(other.to_string())),
    }
}

fn parse_action(kind: &str, params: &Value) -> Result<RuleAction, ValidationError> {
    match kind {
        "Warn" => {
            let p: NoticeParameters = decode("actionParameters", params)?;
            Ok(RuleAction::Warn { notice: p.message })
        }
        "Mute" => {
            let p: MuteParameters = decode("actionParameters", params)?;
            let duration_secs = p
                .duration_seconds
                .or(p.duration_minutes.map(|m| m * 60))
                .unwrap_or(DEFAULT_MUTE_SECS);
            Ok(RuleAction::Mute { duration_secs })
        }
        "Kick" => {
            let p: MembershipParameters = decode("actionParameters", params)?;
            Ok(RuleAction::Kick { reason: p.reason })
        }
        "Ban" => {
            let p: MembershipParameters = decode("actionParameters", params)?;
            Ok(RuleAction::Ban {
                reason: p.reason,
                delete_message_days: p.delete_message_days.unwrap_or(0).min(7),
            })
        }
        "DeleteMessage" => {
            let p: NoticeParameters = decode("actionParameters", params)?;
            Ok(RuleAction::DeleteContent { notice: p.message })
        }
        "AddRole" => {
            let p: RoleParameters = decode_required("actionParameters", params)?;
            Ok(RuleAction::GrantRole {
                role_id: RoleId::new(parse_snowflake("roleId", &p.role_id)?),
            })
        }
        "RemoveRole" => {
            let p: RoleParameters = decode_required("actionParameters", params)?;
            Ok(RuleAction::RevokeRole {
                role_id: RoleId::new(parse_snowflake("roleId", &p.role_id)?),
            })
        }
        "LogOnly" => Ok(RuleAction::LogOnly),
        other => Err(ValidationError::UnknownAction(other.to_string())),
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "guildId": "1001",
            "guildName": "Test Guild",
            "premiumTier": "Premium",
            "modules": { "Moderation": true, "Welcome": false },
            "rules": [
                {
                    "id": "00000000-0000-0000-0000-000000000001",
                    "name": "no-x",
                    "module": "Moderation",
                    "triggerType": "MessageContent",
                    "triggerConditions": { "bannedWords": ["x", " "] },
                    "actionType": "DeleteMessage",
                    "actionParameters": {},
                    "priority": 10,
                    "cooldownSeconds": 0
                },
                {
                    "id": "00000000-0000-0000-0000-000000000002",
                    "name": "mystery",
                    "module": "Moderation",
                    "triggerType": "Telepathy",
                    "actionType": "Warn"
                },
                {
                    "id": "00000000-0000-0000-0000-000000000003",
                    "name": "verified",
                    "module": "AutoRoles",
                    "triggerType": "ReactionAdded",
                    "triggerConditions": { "emoji": "✅", "messageId": "555" },
                    "actionType": "AddRole",
                    "actionParameters": { "roleId": "777" }
                }
            ],
            "settings": { "enableAIModeration": true }
        })
    }

    #[test]
    fn test_backend_payload_validates() {
        let dto: GuildConfigDto = serde_json::from_value(payload()).unwrap();
        let config = dto.into_config().unwrap();

        assert_eq!(config.guild_id, GuildId::new(1001));
        assert_eq!(config.premium_tier, PremiumTier::Premium);
        assert!(config.settings.moderation.classifier_enabled);

        // The unknown trigger type is dropped; the rest survives.
        assert_eq!(config.rules.len(), 2);
        let keyword = &config.rules[0];
        assert_eq!(keyword.priority, 10);
        assert_eq!(keyword.cooldown_secs, None);
        assert_eq!(
            keyword.trigger,
            Trigger::MessageContent { banned_words: vec!["x".into()] }
        );

        let reaction = &config.rules[1];
        assert_eq!(reaction.priority, DEFAULT_PRIORITY);
        assert_eq!(
            reaction.trigger,
            Trigger::ReactionAdded {
                emoji: "✅".into(),
                message_id: Some(MessageId::new(555)),
            }
        );
        assert_eq!(
            reaction.action,
            RuleAction::GrantRole { role_id: RoleId::new(777) }
        );
    }

    #[test]
    fn test_rule_validation_errors() {
        let base = |trigger: &str, conditions: Value, action: &str, params: Value| RuleDto {
            id: Uuid::nil(),
            name: "r".into(),
            module: "Moderation".into(),
            trigger_type: trigger.into(),
            trigger_conditions: conditions,
            action_type: action.into(),
            action_parameters: params,
            enabled: true,
            premium_only: false,
            cooldown_seconds: None,
            priority: None,
        };

        let err = Rule::try_from(base("MessageContent", json!({}), "Warn", Value::Null));
        assert_eq!(err.unwrap_err(), ValidationError::MissingField("bannedWords"));

        let err = Rule::try_from(base("UserJoin", Value::Null, "Explode", Value::Null));
        assert_eq!(err.unwrap_err(), ValidationError::UnknownAction("Explode".into()));

        let err = Rule::try_from(base("UserJoin", Value::Null, "AddRole", Value::Null));
        assert_eq!(err.unwrap_err(), ValidationError::MissingField("actionParameters"));

        let mute = Rule::try_from(base(
            "UserJoin",
            Value::Null,
            "Mute",
            json!({ "durationMinutes": 5 }),
        ))
        .unwrap();
        assert_eq!(mute.action, RuleAction::Mute { duration_secs: 300 });

        let classifier = Rule::try_from(base("AI_Moderation", Value::Null, "LogOnly", Value::Null))
            .unwrap();
        assert_eq!(classifier.trigger, Trigger::Classifier);
    }

    #[test]
    fn test_invalid_guild_id_is_rejected() {
        let mut raw = payload();
        raw["guildId"] = json!("not-a-number");
        let dto: GuildConfigDto = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            dto.into_config(),
            Err(ValidationError::InvalidField { field: "guildId", .. })
        ));
    }
}
