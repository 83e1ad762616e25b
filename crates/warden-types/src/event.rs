//! Gateway events delivered to the runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{ChannelId, GuildId, MessageId, UserId};

/// Event payloads, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    MessageCreated {
        channel_id: ChannelId,
        message_id: MessageId,
        content: String,
        #[serde(default)]
        mention_count: u32,
    },
    MessageUpdated {
        channel_id: ChannelId,
        message_id: MessageId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_content: Option<String>,
        #[serde(default)]
        mention_count: u32,
    },
    MessageDeleted {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    ReactionAdded {
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: String,
        /// Name of the reacting member, when the gateway supplied it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    ReactionRemoved {
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: String,
    },
    MemberJoined {
        username: String,
    },
    MemberLeft {
        username: String,
    },
    UserUpdated {
        old_username: String,
        new_username: String,
    },
    GuildJoined,
    GuildAvailable,
    GuildLeft,

    /// Store-side signal that the guild's configuration changed.
    ConfigInvalidated,
}

/// One inbound event, scoped to a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub guild_id: GuildId,
    #[serde(default)]
    pub actor_id: UserId,
    #[serde(default)]
    pub actor_is_bot: bool,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl GatewayEvent {
    pub fn new(guild_id: GuildId, actor_id: UserId, payload: EventPayload) -> Self {
        Self {
            guild_id,
            actor_id,
            actor_is_bot: false,
            received_at: Utc::now(),
            payload,
        }
    }

    /// Guild-scoped signal with no actor.
    pub fn lifecycle(guild_id: GuildId, payload: EventPayload) -> Self {
        Self::new(guild_id, UserId::default(), payload)
    }

    pub fn at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn from_bot(mut self) -> Self {
        self.actor_is_bot = true;
        self
    }

    /// Guild lifecycle and store signals bypass the gate.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::GuildJoined
                | EventPayload::GuildAvailable
                | EventPayload::GuildLeft
                | EventPayload::ConfigInvalidated
        )
    }

    /// Text content, for message events.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::MessageCreated { content, .. }
            | EventPayload::MessageUpdated { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        match &self.payload {
            EventPayload::MessageCreated { channel_id, .. }
            | EventPayload::MessageUpdated { channel_id, .. }
            | EventPayload::MessageDeleted { channel_id, .. }
            | EventPayload::ReactionAdded { channel_id, .. }
            | EventPayload::ReactionRemoved { channel_id, .. } => Some(*channel_id),
            _ => None,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        match &self.payload {
            EventPayload::MessageCreated { message_id, .. }
            | EventPayload::MessageUpdated { message_id, .. }
            | EventPayload::MessageDeleted { message_id, .. }
            | EventPayload::ReactionAdded { message_id, .. }
            | EventPayload::ReactionRemoved { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::MessageCreated { .. } => EventKind::MessageCreated,
            EventPayload::MessageUpdated { .. } => EventKind::MessageUpdated,
            EventPayload::MessageDeleted { .. } => EventKind::MessageDeleted,
            EventPayload::ReactionAdded { .. } => EventKind::ReactionAdded,
            EventPayload::ReactionRemoved { .. } => EventKind::ReactionRemoved,
            EventPayload::MemberJoined { .. } => EventKind::MemberJoined,
            EventPayload::MemberLeft { .. } => EventKind::MemberLeft,
            EventPayload::UserUpdated { .. } => EventKind::UserUpdated,
            EventPayload::GuildJoined => EventKind::GuildJoined,
            EventPayload::GuildAvailable => EventKind::GuildAvailable,
            EventPayload::GuildLeft => EventKind::GuildLeft,
            EventPayload::ConfigInvalidated => EventKind::ConfigInvalidated,
        }
    }
}

/// Payload discriminant, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageCreated,
    MessageUpdated,
    MessageDeleted,
    ReactionAdded,
    ReactionRemoved,
    MemberJoined,
    MemberLeft,
    UserUpdated,
    GuildJoined,
    GuildAvailable,
    GuildLeft,
    ConfigInvalidated,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::MessageCreated => "message_created",
            EventKind::MessageUpdated => "message_updated",
            EventKind::MessageDeleted => "message_deleted",
            EventKind::ReactionAdded => "reaction_added",
            EventKind::ReactionRemoved => "reaction_removed",
            EventKind::MemberJoined => "member_joined",
            EventKind::MemberLeft => "member_left",
            EventKind::UserUpdated => "user_updated",
            EventKind::GuildJoined => "guild_joined",
            EventKind::GuildAvailable => "guild_available",
            EventKind::GuildLeft => "guild_left",
            EventKind::ConfigInvalidated => "config_invalidated",
        };
        f.write_str(name)
    }
}
