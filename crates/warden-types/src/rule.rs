//! Rule model: trigger predicate plus remediation action, scoped to a module.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::config::modules;
use crate::ids::{MessageId, RoleId, RuleId};

/// Default rule priority when the store omits one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Kind of event shape a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    MessageContent,
    UserJoin,
    UserLeave,
    ReactionAdded,
    Username,
    InvitePosted,
    SpamDetection,
    Classifier,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerKind::MessageContent => "message-content",
            TriggerKind::UserJoin => "user-join",
            TriggerKind::UserLeave => "user-leave",
            TriggerKind::ReactionAdded => "reaction-added",
            TriggerKind::Username => "username",
            TriggerKind::InvitePosted => "invite-posted",
            TriggerKind::SpamDetection => "spam-detection",
            TriggerKind::Classifier => "classifier",
        };
        f.write_str(name)
    }
}

/// Trigger predicate, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Case-insensitive substring match against banned terms.
    MessageContent { banned_words: Vec<String> },

    /// Member joined the guild.
    UserJoin,

    /// Member left the guild.
    UserLeave,

    /// Reaction with `emoji`, optionally restricted to one message.
    ReactionAdded {
        emoji: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
    },

    /// Case-insensitive substring match against the current username.
    Username { banned_words: Vec<String> },

    /// Invite link whose code is not allow-listed.
    InvitePosted {
        #[serde(default)]
        allowed_codes: Vec<String>,
    },

    /// Mention flood or long repeated-character runs.
    SpamDetection {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_mentions: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_repeated_chars: Option<u32>,
    },

    /// External classifier flags the text.
    Classifier,
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::MessageContent { .. } => TriggerKind::MessageContent,
            Trigger::UserJoin => TriggerKind::UserJoin,
            Trigger::UserLeave => TriggerKind::UserLeave,
            Trigger::ReactionAdded { .. } => TriggerKind::ReactionAdded,
            Trigger::Username { .. } => TriggerKind::Username,
            Trigger::InvitePosted { .. } => TriggerKind::InvitePosted,
            Trigger::SpamDetection { .. } => TriggerKind::SpamDetection,
            Trigger::Classifier => TriggerKind::Classifier,
        }
    }
}

/// Kind of remediation a rule selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Warn,
    Mute,
    Kick,
    Ban,
    DeleteContent,
    GrantRole,
    RevokeRole,
    LogOnly,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Warn => "warn",
            ActionKind::Mute => "mute",
            ActionKind::Kick => "kick",
            ActionKind::Ban => "ban",
            ActionKind::DeleteContent => "delete-content",
            ActionKind::GrantRole => "grant-role",
            ActionKind::RevokeRole => "revoke-role",
            ActionKind::LogOnly => "log-only",
        };
        f.write_str(name)
    }
}

/// Remediation action with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    Warn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notice: Option<String>,
    },
    Mute {
        duration_secs: u64,
    },
    Kick {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Ban {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default)]
        delete_message_days: u8,
    },
    DeleteContent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notice: Option<String>,
    },
    GrantRole {
        role_id: RoleId,
    },
    RevokeRole {
        role_id: RoleId,
    },
    LogOnly,
}

impl RuleAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            RuleAction::Warn { .. } => ActionKind::Warn,
            RuleAction::Mute { .. } => ActionKind::Mute,
            RuleAction::Kick { .. } => ActionKind::Kick,
            RuleAction::Ban { .. } => ActionKind::Ban,
            RuleAction::DeleteContent { .. } => ActionKind::DeleteContent,
            RuleAction::GrantRole { .. } => ActionKind::GrantRole,
            RuleAction::RevokeRole { .. } => ActionKind::RevokeRole,
            RuleAction::LogOnly => ActionKind::LogOnly,
        }
    }
}

/// An ordered, cooldown-gated condition/action pair scoped to a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub module: String,
    pub trigger: Trigger,
    pub action: RuleAction,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub premium_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

impl Rule {
    /// Create an enabled rule with default priority and no cooldown.
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        trigger: Trigger,
        action: RuleAction,
    ) -> Self {
        Self {
            id: RuleId::generate(),
            name: name.into(),
            module: module.into(),
            trigger,
            action,
            enabled: true,
            premium_only: false,
            cooldown_secs: None,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_id(mut self, id: RuleId) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = Some(secs);
        self
    }

    pub fn premium_only(mut self) -> Self {
        self.premium_only = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Synthetic rule standing in for the classifier path.
    ///
    /// Sits at the lowest priority tier so every configured rule is visited
    /// before the classifier is consulted.
    pub fn classifier_sentinel(cooldown_secs: Option<u64>) -> Self {
        Self {
            id: RuleId::CLASSIFIER,
            name: "classifier".to_string(),
            module: modules::MODERATION.to_string(),
            trigger: Trigger::Classifier,
            action: RuleAction::DeleteContent { notice: None },
            enabled: true,
            premium_only: false,
            cooldown_secs,
            priority: i32::MAX,
        }
    }

    pub fn trigger_kind(&self) -> TriggerKind {
        self.trigger.kind()
    }

    /// Evaluation order: ascending priority, ties broken by id.
    pub fn evaluation_order(&self, other: &Rule) -> Ordering {
        (self.priority, self.id).cmp(&(other.priority, other.id))
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}
