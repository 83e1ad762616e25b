//! In-memory remediation API.
//!
//! Models just enough of a guild (roles with a position hierarchy, members,
//! channels, messages) to drive the executor and the reconciler without a
//! live platform. Every call is logged, and failures can be queued per
//! operation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use warden_types::{ChannelId, GuildId, MessageId, RoleId, UserId};

use crate::api::{
    ChannelInfo, ChannelKind, MessageInfo, NewRole, PermissionOverwrite, Permissions, Presence,
    RemediationApi, RoleInfo,
};
use crate::error::{RemediationError, RemediationResult};

/// One logged call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCall {
    pub op: &'static str,
    pub guild_id: Option<GuildId>,
    pub detail: String,
}

#[derive(Debug, Default)]
struct GuildModel {
    owner: UserId,
    roles: BTreeMap<RoleId, RoleInfo>,
    members: HashMap<UserId, BTreeSet<RoleId>>,
    channels: BTreeMap<ChannelId, ChannelInfo>,
    overwrites: HashMap<ChannelId, Vec<PermissionOverwrite>>,
    messages: HashMap<ChannelId, Vec<MessageInfo>>,
    timeouts: HashMap<UserId, Duration>,
    bans: HashSet<UserId>,
}

impl GuildModel {
    /// Roles other than `@everyone`, lowest first.
    fn ranked(&self, guild_id: GuildId) -> Vec<RoleId> {
        let mut ranked: Vec<&RoleInfo> = self
            .roles
            .values()
            .filter(|role| !role.is_everyone(guild_id))
            .collect();
        ranked.sort_by_key(|role| (role.position, role.id));
        ranked.into_iter().map(|role| role.id).collect()
    }

    /// Place `role_id` at `position` (1-based) and renumber the rest densely.
    fn place(&mut self, guild_id: GuildId, role_id: RoleId, position: i32) {
        let mut ranked = self.ranked(guild_id);
        ranked.retain(|id| *id != role_id);
        let index = (position.max(1) as usize - 1).min(ranked.len());
        ranked.insert(index, role_id);
        for (i, id) in ranked.into_iter().enumerate() {
            if let Some(role) = self.roles.get_mut(&id) {
                role.position = i as i32 + 1;
            }
        }
    }

    fn top_position_of(&self, user_id: UserId) -> i32 {
        self.members
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.roles.get(id))
            .map(|role| role.position)
            .max()
            .unwrap_or(0)
    }
}

/// Remediation API backed by an in-process guild model.
#[derive(Debug)]
pub struct SandboxRemediationApi {
    bot_id: UserId,
    next_id: AtomicU64,
    guilds: DashMap<GuildId, GuildModel>,
    calls: Mutex<Vec<SandboxCall>>,
    faults: Mutex<HashMap<&'static str, VecDeque<RemediationError>>>,
    presence: Mutex<Option<Presence>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn missing_guild(guild_id: GuildId) -> RemediationError {
    RemediationError::NotFound(format!("unknown {}", guild_id))
}

impl SandboxRemediationApi {
    pub fn new(bot_id: UserId) -> Self {
        Self {
            bot_id,
            next_id: AtomicU64::new(1_000_000),
            guilds: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            presence: Mutex::new(None),
        }
    }

    pub fn bot_id(&self) -> UserId {
        self.bot_id
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // Setup

    /// Create a guild holding `@everyone` and the bot's managed role at the top.
    /// Returns the bot role.
    pub fn add_guild(&self, guild_id: GuildId, owner: UserId) -> RoleId {
        let mut model = GuildModel {
            owner,
            ..GuildModel::default()
        };
        let everyone = RoleId::new(guild_id.get());
        model.roles.insert(
            everyone,
            RoleInfo {
                id: everyone,
                name: "@everyone".to_string(),
                position: 0,
                color: 0,
                hoist: false,
                mentionable: false,
                managed: false,
                permissions: Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
            },
        );
        let bot_role = RoleId::new(self.allocate());
        model.roles.insert(
            bot_role,
            RoleInfo {
                id: bot_role,
                name: "Warden".to_string(),
                position: 1,
                color: 0,
                hoist: false,
                mentionable: false,
                managed: true,
                permissions: Permissions::NONE,
            },
        );
        model.members.insert(owner, BTreeSet::new());
        model.members.insert(self.bot_id, BTreeSet::from([bot_role]));
        self.guilds.insert(guild_id, model);
        bot_role
    }

    pub fn remove_guild(&self, guild_id: GuildId) {
        self.guilds.remove(&guild_id);
    }

    /// Insert an unmanaged role at `position`, shifting the rest up.
    pub fn add_role(&self, guild_id: GuildId, name: &str, position: i32) -> RoleId {
        let id = RoleId::new(self.allocate());
        if let Some(mut model) = self.guilds.get_mut(&guild_id) {
            model.roles.insert(
                id,
                RoleInfo {
                    id,
                    name: name.to_string(),
                    position,
                    color: 0,
                    hoist: false,
                    mentionable: false,
                    managed: false,
                    permissions: Permissions::NONE,
                },
            );
            model.place(guild_id, id, position);
        }
        id
    }

    /// Move a role without hierarchy checks, as a guild admin would.
    pub fn set_role_position(&self, guild_id: GuildId, role_id: RoleId, position: i32) {
        if let Some(mut model) = self.guilds.get_mut(&guild_id) {
            model.place(guild_id, role_id, position);
        }
    }

    pub fn add_member(&self, guild_id: GuildId, user_id: UserId) {
        if let Some(mut model) = self.guilds.get_mut(&guild_id) {
            model.members.entry(user_id).or_default();
        }
    }

    pub fn assign_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) {
        if let Some(mut model) = self.guilds.get_mut(&guild_id) {
            model.members.entry(user_id).or_default().insert(role_id);
        }
    }

    pub fn add_text_channel(&self, guild_id: GuildId, channel_id: ChannelId, name: &str) {
        if let Some(mut model) = self.guilds.get_mut(&guild_id) {
            let position = model.channels.len() as i32;
            model.channels.insert(
                channel_id,
                ChannelInfo {
                    id: channel_id,
                    name: name.to_string(),
                    kind: ChannelKind::Text,
                    parent_id: None,
                    position,
                },
            );
        }
    }

    /// Post a message as a user, bypassing the call log.
    pub fn post_user_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        author_id: UserId,
        content: &str,
    ) -> MessageId {
        let id = MessageId::new(self.allocate());
        if let Some(mut model) = self.guilds.get_mut(&guild_id) {
            model.messages.entry(channel_id).or_default().push(MessageInfo {
                id,
                author_id,
                content: content.to_string(),
            });
        }
        id
    }

    /// Record a message under an id chosen by the caller, as when replaying
    /// recorded traffic.
    pub fn record_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message: MessageInfo,
    ) {
        if let Some(mut model) = self.guilds.get_mut(&guild_id) {
            let messages = model.messages.entry(channel_id).or_default();
            if messages.iter().all(|m| m.id != message.id) {
                messages.push(message);
            }
        }
    }

    pub fn has_guild(&self, guild_id: GuildId) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    /// Queue a failure for the next call of `op`.
    pub fn fail_next(&self, op: &'static str, error: RemediationError) {
        lock(&self.faults).entry(op).or_default().push_back(error);
    }

    // Inspection

    pub fn calls(&self) -> Vec<SandboxCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, op: &str) -> usize {
        lock(&self.calls).iter().filter(|call| call.op == op).count()
    }

    /// Number of logged calls that change guild state.
    pub fn mutation_count(&self) -> usize {
        const READS: &[&str] = &[
            "recent_messages",
            "member_roles",
            "channels",
            "roles",
            "guild_owner",
            "current_user",
        ];
        lock(&self.calls)
            .iter()
            .filter(|call| !READS.contains(&call.op))
            .count()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn presence(&self) -> Option<Presence> {
        lock(&self.presence).clone()
    }

    /// Messages in posting order.
    pub fn messages(&self, guild_id: GuildId, channel_id: ChannelId) -> Vec<MessageInfo> {
        self.guilds
            .get(&guild_id)
            .and_then(|model| model.messages.get(&channel_id).cloned())
            .unwrap_or_default()
    }

    pub fn channel_named(&self, guild_id: GuildId, name: &str) -> Option<ChannelInfo> {
        self.guilds.get(&guild_id).and_then(|model| {
            model
                .channels
                .values()
                .find(|channel| channel.name.eq_ignore_ascii_case(name))
                .cloned()
        })
    }

    pub fn channel_count(&self, guild_id: GuildId) -> usize {
        self.guilds
            .get(&guild_id)
            .map(|model| model.channels.len())
            .unwrap_or(0)
    }

    pub fn overwrites(&self, guild_id: GuildId, channel_id: ChannelId) -> Vec<PermissionOverwrite> {
        self.guilds
            .get(&guild_id)
            .and_then(|model| model.overwrites.get(&channel_id).cloned())
            .unwrap_or_default()
    }

    pub fn role_named(&self, guild_id: GuildId, name: &str) -> Option<RoleInfo> {
        self.guilds.get(&guild_id).and_then(|model| {
            model
                .roles
                .values()
                .find(|role| role.name.eq_ignore_ascii_case(name))
                .cloned()
        })
    }

    pub fn role(&self, guild_id: GuildId, role_id: RoleId) -> Option<RoleInfo> {
        self.guilds
            .get(&guild_id)
            .and_then(|model| model.roles.get(&role_id).cloned())
    }

    pub fn has_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> bool {
        self.guilds
            .get(&guild_id)
            .and_then(|model| model.members.get(&user_id).map(|roles| roles.contains(&role_id)))
            .unwrap_or(false)
    }

    pub fn is_member(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.guilds
            .get(&guild_id)
            .map(|model| model.members.contains_key(&user_id))
            .unwrap_or(false)
    }

    pub fn is_banned(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.guilds
            .get(&guild_id)
            .map(|model| model.bans.contains(&user_id))
            .unwrap_or(false)
    }

    pub fn timeout_of(&self, guild_id: GuildId, user_id: UserId) -> Option<Duration> {
        self.guilds
            .get(&guild_id)
            .and_then(|model| model.timeouts.get(&user_id).copied())
    }

    // Call plumbing

    async fn enter(
        &self,
        op: &'static str,
        guild_id: Option<GuildId>,
        detail: String,
    ) -> RemediationResult<()> {
        // Give concurrent callers a chance to interleave, as a network hop would.
        tokio::task::yield_now().await;

        lock(&self.calls).push(SandboxCall {
            op,
            guild_id,
            detail,
        });
        match lock(&self.faults).get_mut(op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn with_guild<T>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&mut GuildModel) -> RemediationResult<T>,
    ) -> RemediationResult<T> {
        let mut model = self
            .guilds
            .get_mut(&guild_id)
            .ok_or_else(|| missing_guild(guild_id))?;
        f(&mut *model)
    }
}

#[async_trait]
impl RemediationApi for SandboxRemediationApi {
    async fn delete_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> RemediationResult<()> {
        self.enter("delete_message", Some(guild_id), message_id.to_string())
            .await?;
        self.with_guild(guild_id, |model| {
            let messages = model.messages.entry(channel_id).or_default();
            let before = messages.len();
            messages.retain(|message| message.id != message_id);
            if messages.len() == before {
                return Err(RemediationError::NotFound(message_id.to_string()));
            }
            Ok(())
        })
    }

    async fn send_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        content: &str,
    ) -> RemediationResult<MessageId> {
        self.enter("send_message", Some(guild_id), content.to_string())
            .await?;
        let id = MessageId::new(self.allocate());
        let bot_id = self.bot_id;
        self.with_guild(guild_id, |model| {
            model.messages.entry(channel_id).or_default().push(MessageInfo {
                id,
                author_id: bot_id,
                content: content.to_string(),
            });
            Ok(id)
        })
    }

    async fn recent_messages(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        limit: usize,
    ) -> RemediationResult<Vec<MessageInfo>> {
        self.enter("recent_messages", Some(guild_id), channel_id.to_string())
            .await?;
        self.with_guild(guild_id, |model| {
            Ok(model
                .messages
                .get(&channel_id)
                .map(|messages| messages.iter().rev().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    async fn add_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> RemediationResult<()> {
        self.enter("add_member_role", Some(guild_id), format!("{} {}", user_id, role_id))
            .await?;
        self.with_guild(guild_id, |model| {
            if !model.roles.contains_key(&role_id) {
                return Err(RemediationError::NotFound(role_id.to_string()));
            }
            model
                .members
                .get_mut(&user_id)
                .ok_or_else(|| RemediationError::NotFound(user_id.to_string()))?
                .insert(role_id);
            Ok(())
        })
    }

    async fn remove_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> RemediationResult<()> {
        self.enter("remove_member_role", Some(guild_id), format!("{} {}", user_id, role_id))
            .await?;
        self.with_guild(guild_id, |model| {
            model
                .members
                .get_mut(&user_id)
                .ok_or_else(|| RemediationError::NotFound(user_id.to_string()))?
                .remove(&role_id);
            Ok(())
        })
    }

    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> RemediationResult<Vec<RoleId>> {
        self.enter("member_roles", Some(guild_id), user_id.to_string())
            .await?;
        self.with_guild(guild_id, |model| {
            model
                .members
                .get(&user_id)
                .map(|roles| roles.iter().copied().collect())
                .ok_or_else(|| RemediationError::NotFound(user_id.to_string()))
        })
    }

    async fn timeout_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        duration: Duration,
    ) -> RemediationResult<()> {
        self.enter("timeout_member", Some(guild_id), format!("{} {:?}", user_id, duration))
            .await?;
        self.with_guild(guild_id, |model| {
            if !model.members.contains_key(&user_id) {
                return Err(RemediationError::NotFound(user_id.to_string()));
            }
            model.timeouts.insert(user_id, duration);
            Ok(())
        })
    }

    async fn kick_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: Option<&str>,
    ) -> RemediationResult<()> {
        self.enter(
            "kick_member",
            Some(guild_id),
            format!("{} {}", user_id, reason.unwrap_or_default()),
        )
        .await?;
        self.with_guild(guild_id, |model| {
            model
                .members
                .remove(&user_id)
                .map(|_| ())
                .ok_or_else(|| RemediationError::NotFound(user_id.to_string()))
        })
    }

    async fn ban_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: Option<&str>,
        delete_message_days: u8,
    ) -> RemediationResult<()> {
        self.enter(
            "ban_member",
            Some(guild_id),
            format!("{} {} {}d", user_id, reason.unwrap_or_default(), delete_message_days),
        )
        .await?;
        self.with_guild(guild_id, |model| {
            model.members.remove(&user_id);
            model.bans.insert(user_id);
            Ok(())
        })
    }

    async fn channels(&self, guild_id: GuildId) -> RemediationResult<Vec<ChannelInfo>> {
        self.enter("channels", Some(guild_id), String::new()).await?;
        self.with_guild(guild_id, |model| Ok(model.channels.values().cloned().collect()))
    }

    async fn create_category(
        &self,
        guild_id: GuildId,
        name: &str,
        position: i32,
    ) -> RemediationResult<ChannelInfo> {
        self.enter("create_category", Some(guild_id), name.to_string())
            .await?;
        let id = ChannelId::new(self.allocate());
        self.with_guild(guild_id, |model| {
            let channel = ChannelInfo {
                id,
                name: name.to_string(),
                kind: ChannelKind::Category,
                parent_id: None,
                position,
            };
            model.channels.insert(id, channel.clone());
            Ok(channel)
        })
    }

    async fn create_text_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        parent_id: Option<ChannelId>,
    ) -> RemediationResult<ChannelInfo> {
        self.enter("create_text_channel", Some(guild_id), name.to_string())
            .await?;
        let id = ChannelId::new(self.allocate());
        self.with_guild(guild_id, |model| {
            if let Some(parent) = parent_id {
                if !model.channels.contains_key(&parent) {
                    return Err(RemediationError::NotFound(parent.to_string()));
                }
            }
            let channel = ChannelInfo {
                id,
                name: name.to_string(),
                kind: ChannelKind::Text,
                parent_id,
                position: model.channels.len() as i32,
            };
            model.channels.insert(id, channel.clone());
            Ok(channel)
        })
    }

    async fn delete_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> RemediationResult<()> {
        self.enter("delete_channel", Some(guild_id), channel_id.to_string())
            .await?;
        self.with_guild(guild_id, |model| {
            model
                .channels
                .remove(&channel_id)
                .ok_or_else(|| RemediationError::NotFound(channel_id.to_string()))?;
            model.overwrites.remove(&channel_id);
            model.messages.remove(&channel_id);
            // Children of a deleted category fall back to the top level.
            for channel in model.channels.values_mut() {
                if channel.parent_id == Some(channel_id) {
                    channel.parent_id = None;
                }
            }
            Ok(())
        })
    }

    async fn set_channel_overwrites(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        overwrites: &[PermissionOverwrite],
    ) -> RemediationResult<()> {
        self.enter("set_channel_overwrites", Some(guild_id), channel_id.to_string())
            .await?;
        self.with_guild(guild_id, |model| {
            if !model.channels.contains_key(&channel_id) {
                return Err(RemediationError::NotFound(channel_id.to_string()));
            }
            model.overwrites.insert(channel_id, overwrites.to_vec());
            Ok(())
        })
    }

    async fn roles(&self, guild_id: GuildId) -> RemediationResult<Vec<RoleInfo>> {
        self.enter("roles", Some(guild_id), String::new()).await?;
        self.with_guild(guild_id, |model| Ok(model.roles.values().cloned().collect()))
    }

    async fn create_role(&self, guild_id: GuildId, role: &NewRole) -> RemediationResult<RoleInfo> {
        self.enter("create_role", Some(guild_id), role.name.clone())
            .await?;
        let id = RoleId::new(self.allocate());
        self.with_guild(guild_id, |model| {
            model.roles.insert(
                id,
                RoleInfo {
                    id,
                    name: role.name.clone(),
                    position: 1,
                    color: role.color,
                    hoist: role.hoist,
                    mentionable: role.mentionable,
                    managed: false,
                    permissions: role.permissions,
                },
            );
            // New roles land just above @everyone.
            model.place(guild_id, id, 1);
            model
                .roles
                .get(&id)
                .cloned()
                .ok_or_else(|| RemediationError::NotFound(id.to_string()))
        })
    }

    async fn modify_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        role: &NewRole,
    ) -> RemediationResult<RoleInfo> {
        self.enter("modify_role", Some(guild_id), role_id.to_string())
            .await?;
        let bot_id = self.bot_id;
        self.with_guild(guild_id, |model| {
            let ceiling = model.top_position_of(bot_id);
            let existing = model
                .roles
                .get_mut(&role_id)
                .ok_or_else(|| RemediationError::NotFound(role_id.to_string()))?;
            if existing.position >= ceiling {
                return Err(RemediationError::Forbidden(
                    "role is above the bot's highest role".to_string(),
                ));
            }
            existing.name = role.name.clone();
            existing.color = role.color;
            existing.hoist = role.hoist;
            existing.mentionable = role.mentionable;
            existing.permissions = role.permissions;
            Ok(existing.clone())
        })
    }

    async fn modify_role_position(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        position: i32,
    ) -> RemediationResult<()> {
        self.enter(
            "modify_role_position",
            Some(guild_id),
            format!("{} -> {}", role_id, position),
        )
        .await?;
        let bot_id = self.bot_id;
        self.with_guild(guild_id, |model| {
            let ceiling = model.top_position_of(bot_id);
            let current = model
                .roles
                .get(&role_id)
                .map(|role| role.position)
                .ok_or_else(|| RemediationError::NotFound(role_id.to_string()))?;
            if current >= ceiling || position >= ceiling {
                return Err(RemediationError::Forbidden(
                    "cannot move a role to or above the bot's highest role".to_string(),
                ));
            }
            if position < 1 {
                return Err(RemediationError::Invalid(format!("position {}", position)));
            }
            model.place(guild_id, role_id, position);
            Ok(())
        })
    }

    async fn guild_owner(&self, guild_id: GuildId) -> RemediationResult<UserId> {
        self.enter("guild_owner", Some(guild_id), String::new()).await?;
        self.with_guild(guild_id, |model| Ok(model.owner))
    }

    async fn current_user(&self) -> RemediationResult<UserId> {
        self.enter("current_user", None, String::new()).await?;
        Ok(self.bot_id)
    }

    async fn update_presence(&self, presence: &Presence) -> RemediationResult<()> {
        self.enter("update_presence", None, presence.activity.clone())
            .await?;
        *lock(&self.presence) = Some(presence.clone());
        Ok(())
    }
}

/// Sandbox wrapper whose chosen operations take effect and then stall
/// before answering, like a platform call that times out after it landed.
#[derive(Debug)]
pub struct LaggingRemediationApi {
    inner: Arc<SandboxRemediationApi>,
    lag: Duration,
    ops: HashSet<&'static str>,
}

impl LaggingRemediationApi {
    pub fn new(inner: Arc<SandboxRemediationApi>, lag: Duration) -> Self {
        Self {
            inner,
            lag,
            ops: HashSet::new(),
        }
    }

    /// Stall every call of `op` after it has been applied.
    pub fn lagging(mut self, op: &'static str) -> Self {
        self.ops.insert(op);
        self
    }

    async fn settle<T>(&self, op: &'static str, result: RemediationResult<T>) -> RemediationResult<T> {
        if self.ops.contains(op) {
            tokio::time::sleep(self.lag).await;
        }
        result
    }
}

#[async_trait]
impl RemediationApi for LaggingRemediationApi {
    async fn delete_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> RemediationResult<()> {
        let result = self.inner.delete_message(guild_id, channel_id, message_id).await;
        self.settle("delete_message", result).await
    }

    async fn send_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        content: &str,
    ) -> RemediationResult<MessageId> {
        let result = self.inner.send_message(guild_id, channel_id, content).await;
        self.settle("send_message", result).await
    }

    async fn recent_messages(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        limit: usize,
    ) -> RemediationResult<Vec<MessageInfo>> {
        let result = self.inner.recent_messages(guild_id, channel_id, limit).await;
        self.settle("recent_messages", result).await
    }

    async fn add_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> RemediationResult<()> {
        let result = self.inner.add_member_role(guild_id, user_id, role_id).await;
        self.settle("add_member_role", result).await
    }

    async fn remove_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> RemediationResult<()> {
        let result = self.inner.remove_member_role(guild_id, user_id, role_id).await;
        self.settle("remove_member_role", result).await
    }

    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> RemediationResult<Vec<RoleId>> {
        let result = self.inner.member_roles(guild_id, user_id).await;
        self.settle("member_roles", result).await
    }

    async fn timeout_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        duration: Duration,
    ) -> RemediationResult<()> {
        let result = self.inner.timeout_member(guild_id, user_id, duration).await;
        self.settle("timeout_member", result).await
    }

    async fn kick_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: Option<&str>,
    ) -> RemediationResult<()> {
        let result = self.inner.kick_member(guild_id, user_id, reason).await;
        self.settle("kick_member", result).await
    }

    async fn ban_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: Option<&str>,
        delete_message_days: u8,
    ) -> RemediationResult<()> {
        let result = self
            .inner
            .ban_member(guild_id, user_id, reason, delete_message_days)
            .await;
        self.settle("ban_member", result).await
    }

    async fn channels(&self, guild_id: GuildId) -> RemediationResult<Vec<ChannelInfo>> {
        let result = self.inner.channels(guild_id).await;
        self.settle("channels", result).await
    }

    async fn create_category(
        &self,
        guild_id: GuildId,
        name: &str,
        position: i32,
    ) -> RemediationResult<ChannelInfo> {
        let result = self.inner.create_category(guild_id, name, position).await;
        self.settle("create_category", result).await
    }

    async fn create_text_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        parent_id: Option<ChannelId>,
    ) -> RemediationResult<ChannelInfo> {
        let result = self.inner.create_text_channel(guild_id, name, parent_id).await;
        self.settle("create_text_channel", result).await
    }

    async fn delete_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> RemediationResult<()> {
        let result = self.inner.delete_channel(guild_id, channel_id).await;
        self.settle("delete_channel", result).await
    }

    async fn set_channel_overwrites(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        overwrites: &[PermissionOverwrite],
    ) -> RemediationResult<()> {
        let result = self
            .inner
            .set_channel_overwrites(guild_id, channel_id, overwrites)
            .await;
        self.settle("set_channel_overwrites", result).await
    }

    async fn roles(&self, guild_id: GuildId) -> RemediationResult<Vec<RoleInfo>> {
        let result = self.inner.roles(guild_id).await;
        self.settle("roles", result).await
    }

    async fn create_role(&self, guild_id: GuildId, role: &NewRole) -> RemediationResult<RoleInfo> {
        let result = self.inner.create_role(guild_id, role).await;
        self.settle("create_role", result).await
    }

    async fn modify_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        role: &NewRole,
    ) -> RemediationResult<RoleInfo> {
        let result = self.inner.modify_role(guild_id, role_id, role).await;
        self.settle("modify_role", result).await
    }

    async fn modify_role_position(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        position: i32,
    ) -> RemediationResult<()> {
        let result = self.inner.modify_role_position(guild_id, role_id, position).await;
        self.settle("modify_role_position", result).await
    }

    async fn guild_owner(&self, guild_id: GuildId) -> RemediationResult<UserId> {
        let result = self.inner.guild_owner(guild_id).await;
        self.settle("guild_owner", result).await
    }

    async fn current_user(&self) -> RemediationResult<UserId> {
        let result = self.inner.current_user().await;
        self.settle("current_user", result).await
    }

    async fn update_presence(&self, presence: &Presence) -> RemediationResult<()> {
        let result = self.inner.update_presence(presence).await;
        self.settle("update_presence", result).await
    }
}
