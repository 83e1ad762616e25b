//! Output of rule evaluation and the context it is applied in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::GatewayEvent;
use crate::ids::{ChannelId, GuildId, MessageId, RuleId, UserId};
use crate::rule::{Rule, RuleAction};

/// Cooldown bookkeeping key: one rule firing for one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CooldownKey {
    pub rule_id: RuleId,
    pub subject: UserId,
}

impl CooldownKey {
    pub fn new(rule_id: RuleId, subject: UserId) -> Self {
        Self { rule_id, subject }
    }
}

impl fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rule_id, self.subject)
    }
}

/// The single action the engine chose for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedAction {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub action: RuleAction,
    pub subject: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,

    /// Selected through the classifier sentinel rather than a stored rule
    #[serde(default)]
    pub synthetic: bool,
}

impl SelectedAction {
    pub fn from_rule(rule: &Rule, subject: UserId) -> Self {
        Self {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            action: rule.action.clone(),
            subject,
            cooldown_secs: rule.cooldown_secs,
            synthetic: rule.id == RuleId::CLASSIFIER,
        }
    }

    pub fn cooldown_key(&self) -> CooldownKey {
        CooldownKey::new(self.rule_id, self.subject)
    }
}

/// Where an action lands: the guild, the subject and the originating message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    pub guild_id: GuildId,
    pub subject: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    pub occurred_at: DateTime<Utc>,
}

impl ActionContext {
    pub fn from_event(event: &GatewayEvent) -> Self {
        Self {
            guild_id: event.guild_id,
            subject: event.actor_id,
            channel_id: event.channel_id(),
            message_id: event.message_id(),
            occurred_at: event.received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::modules;
    use crate::event::EventPayload;
    use crate::rule::Trigger;

    #[test]
    fn test_selected_action_from_rule() {
        let rule = Rule::new(
            "no-x",
            modules::MODERATION,
            Trigger::MessageContent { banned_words: vec!["x".into()] },
            RuleAction::DeleteContent { notice: None },
        )
        .with_cooldown_secs(60);
        let selected = SelectedAction::from_rule(&rule, UserId::new(5));
        assert_eq!(selected.cooldown_key(), CooldownKey::new(rule.id, UserId::new(5)));
        assert_eq!(selected.cooldown_secs, Some(60));
        assert!(!selected.synthetic);

        let sentinel = SelectedAction::from_rule(&Rule::classifier_sentinel(None), UserId::new(5));
        assert!(sentinel.synthetic);
    }

    #[test]
    fn test_context_from_message_event() {
        let event = GatewayEvent::new(
            GuildId::new(1),
            UserId::new(2),
            EventPayload::MessageCreated {
                channel_id: ChannelId::new(3),
                message_id: MessageId::new(4),
                content: "hi".into(),
                mention_count: 0,
            },
        );
        let ctx = ActionContext::from_event(&event);
        assert_eq!(ctx.subject, UserId::new(2));
        assert_eq!(ctx.channel_id, Some(ChannelId::new(3)));
        assert_eq!(ctx.message_id, Some(MessageId::new(4)));
        assert_eq!(ctx.occurred_at, event.received_at);
    }
}
