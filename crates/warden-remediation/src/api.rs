//! The remediation API boundary.
//!
//! Everything the runtime does to a guild goes through [`RemediationApi`]:
//! message deletion and notices, member sanctions, role grants, and the
//! channel/role plumbing the reconciler needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::ops::BitOr;
use std::time::Duration;
use warden_types::{ChannelId, GuildId, MessageId, RoleId, UserId};

use crate::error::RemediationResult;

/// Permission bit set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u64);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const VIEW_CHANNEL: Permissions = Permissions(1 << 10);
    pub const SEND_MESSAGES: Permissions = Permissions(1 << 11);
    pub const READ_MESSAGE_HISTORY: Permissions = Permissions(1 << 16);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self::Output {
        Permissions(self.0 | rhs.0)
    }
}

/// A guild role as seen by the remediation API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
    /// Hierarchy position; `@everyone` is 0, higher outranks lower
    pub position: i32,
    pub color: u32,
    pub hoist: bool,
    pub mentionable: bool,
    /// Owned by an integration (bot roles), cannot be granted by hand
    pub managed: bool,
    pub permissions: Permissions,
}

impl RoleInfo {
    /// `@everyone` shares its id with the guild.
    pub fn is_everyone(&self, guild_id: GuildId) -> bool {
        self.id.get() == guild_id.get()
    }
}

/// Properties of a role to create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub name: String,
    pub color: u32,
    pub hoist: bool,
    pub mentionable: bool,
    pub permissions: Permissions,
}

impl NewRole {
    /// Whether `role` already carries these properties.
    pub fn matches(&self, role: &RoleInfo) -> bool {
        role.name == self.name
            && role.color == self.color
            && role.hoist == self.hoist
            && role.mentionable == self.mentionable
            && role.permissions == self.permissions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ChannelId>,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: MessageId,
    pub author_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteTarget {
    Role(RoleId),
    Member(UserId),
}

/// Per-channel permission override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub target: OverwriteTarget,
    pub allow: Permissions,
    pub deny: Permissions,
}

impl PermissionOverwrite {
    pub fn allow(target: OverwriteTarget, allow: Permissions) -> Self {
        Self {
            target,
            allow,
            deny: Permissions::NONE,
        }
    }

    pub fn deny(target: OverwriteTarget, deny: Permissions) -> Self {
        Self {
            target,
            allow: Permissions::NONE,
            deny,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Idle,
    DoNotDisturb,
}

/// Process-wide status shown to every guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub status: PresenceStatus,
    pub activity: String,
}

impl Presence {
    pub fn new(status: PresenceStatus, activity: impl Into<String>) -> Self {
        Self {
            status,
            activity: activity.into(),
        }
    }
}

/// Side-effecting operations against the chat platform.
#[async_trait]
pub trait RemediationApi: Send + Sync + Debug {
    // Messages

    async fn delete_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> RemediationResult<()>;

    async fn send_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        content: &str,
    ) -> RemediationResult<MessageId>;

    /// Most recent messages first.
    async fn recent_messages(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        limit: usize,
    ) -> RemediationResult<Vec<MessageInfo>>;

    // Members

    async fn add_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> RemediationResult<()>;

    async fn remove_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> RemediationResult<()>;

    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> RemediationResult<Vec<RoleId>>;

    async fn timeout_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        duration: Duration,
    ) -> RemediationResult<()>;

    async fn kick_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: Option<&str>,
    ) -> RemediationResult<()>;

    async fn ban_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: Option<&str>,
        delete_message_days: u8,
    ) -> RemediationResult<()>;

    // Channels

    async fn channels(&self, guild_id: GuildId) -> RemediationResult<Vec<ChannelInfo>>;

    async fn create_category(
        &self,
        guild_id: GuildId,
        name: &str,
        position: i32,
    ) -> RemediationResult<ChannelInfo>;

    async fn create_text_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        parent_id: Option<ChannelId>,
    ) -> RemediationResult<ChannelInfo>;

    async fn delete_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> RemediationResult<()>;

    async fn set_channel_overwrites(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        overwrites: &[PermissionOverwrite],
    ) -> RemediationResult<()>;

    // Roles

    async fn roles(&self, guild_id: GuildId) -> RemediationResult<Vec<RoleInfo>>;

    async fn create_role(&self, guild_id: GuildId, role: &NewRole) -> RemediationResult<RoleInfo>;

    async fn modify_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        role: &NewRole,
    ) -> RemediationResult<RoleInfo>;

    async fn modify_role_position(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        position: i32,
    ) -> RemediationResult<()>;

    // Identity

    async fn guild_owner(&self, guild_id: GuildId) -> RemediationResult<UserId>;

    async fn current_user(&self) -> RemediationResult<UserId>;

    async fn update_presence(&self, presence: &Presence) -> RemediationResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_bits() {
        let granted = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES;
        assert!(granted.contains(Permissions::VIEW_CHANNEL));
        assert!(!granted.contains(Permissions::READ_MESSAGE_HISTORY));
        assert!(Permissions::NONE.is_empty());
        assert_eq!(Permissions::from_bits(granted.bits()), granted);
    }

    #[test]
    fn test_new_role_matches() {
        let wanted = NewRole {
            name: "Warden".into(),
            color: 0x1E90FF,
            hoist: true,
            mentionable: true,
            permissions: Permissions::NONE,
        };
        let mut role = RoleInfo {
            id: RoleId::new(9),
            name: "Warden".into(),
            position: 3,
            color: 0x1E90FF,
            hoist: true,
            mentionable: true,
            managed: false,
            permissions: Permissions::NONE,
        };
        assert!(wanted.matches(&role));
        role.color = 0;
        assert!(!wanted.matches(&role));
    }

    #[test]
    fn test_everyone_role_shares_guild_id() {
        let role = RoleInfo {
            id: RoleId::new(42),
            name: "@everyone".into(),
            position: 0,
            color: 0,
            hoist: false,
            mentionable: false,
            managed: false,
            permissions: Permissions::NONE,
        };
        assert!(role.is_everyone(GuildId::new(42)));
        assert!(!role.is_everyone(GuildId::new(43)));
    }
}
