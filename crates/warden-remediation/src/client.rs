//! Timeout and bounded retry around every remediation call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use warden_types::{ChannelId, GuildId, MessageId, RoleId, UserId};

use crate::api::{
    ChannelInfo, MessageInfo, NewRole, PermissionOverwrite, Presence, RemediationApi, RoleInfo,
};
use crate::error::{RemediationError, RemediationResult};

/// Default per-attempt timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Calls that create something new each time they take effect.
const NON_IDEMPOTENT: &[&str] = &[
    "send_message",
    "create_category",
    "create_text_channel",
    "create_role",
];

/// Whether repeating `op` after it took effect leaves the same result.
pub fn is_idempotent(op: &str) -> bool {
    !NON_IDEMPOTENT.contains(&op)
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds)
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay (milliseconds)
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = (self.initial_delay_ms as f64) * self.multiplier.max(1.0).powi(exponent);
        let capped = millis.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Wraps a [`RemediationApi`] with a per-attempt timeout and retry policy.
///
/// Only transient failures (timeout, rate limit, transport) are retried.
/// A rate limit waits for the server-provided delay instead of the backoff.
/// A timed-out call may still have been applied remotely, so calls that
/// create something are not retried after a timeout.
#[derive(Debug, Clone)]
pub struct RemediationClient {
    inner: Arc<dyn RemediationApi>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl RemediationClient {
    pub fn new(inner: Arc<dyn RemediationApi>) -> Self {
        Self {
            inner,
            timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn call<T, F, Fut>(&self, op: &'static str, mut attempt_fn: F) -> RemediationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemediationResult<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.timeout, attempt_fn()).await {
                Ok(result) => result,
                Err(_) => Err(RemediationError::Timeout(self.timeout)),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            // A timed-out create may still have landed; repeating it duplicates.
            let repeatable = is_idempotent(op) || !matches!(err, RemediationError::Timeout(_));
            if err.is_transient() && !repeatable {
                warn!(op, error = %err, "Not repeating timed-out call");
                return Err(err);
            }
            if !err.is_transient() || attempt >= max_attempts {
                if err.is_transient() {
                    warn!(op, attempts = attempt, error = %err, "Remediation call gave up");
                }
                return Err(err);
            }

            let delay = match &err {
                RemediationError::RateLimited { retry_after } => *retry_after,
                _ => self.retry.delay_for(attempt),
            };
            debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying remediation call");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl RemediationApi for RemediationClient {
    async fn delete_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("delete_message", move || {
            api.delete_message(guild_id, channel_id, message_id)
        })
        .await
    }

    async fn send_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        content: &str,
    ) -> RemediationResult<MessageId> {
        let api = &self.inner;
        self.call("send_message", move || api.send_message(guild_id, channel_id, content))
            .await
    }

    async fn recent_messages(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        limit: usize,
    ) -> RemediationResult<Vec<MessageInfo>> {
        let api = &self.inner;
        self.call("recent_messages", move || {
            api.recent_messages(guild_id, channel_id, limit)
        })
        .await
    }

    async fn add_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("add_member_role", move || {
            api.add_member_role(guild_id, user_id, role_id)
        })
        .await
    }

    async fn remove_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("remove_member_role", move || {
            api.remove_member_role(guild_id, user_id, role_id)
        })
        .await
    }

    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> RemediationResult<Vec<RoleId>> {
        let api = &self.inner;
        self.call("member_roles", move || api.member_roles(guild_id, user_id))
            .await
    }

    async fn timeout_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        duration: Duration,
    ) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("timeout_member", move || {
            api.timeout_member(guild_id, user_id, duration)
        })
        .await
    }

    async fn kick_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: Option<&str>,
    ) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("kick_member", move || api.kick_member(guild_id, user_id, reason))
            .await
    }

    async fn ban_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: Option<&str>,
        delete_message_days: u8,
    ) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("ban_member", move || {
            api.ban_member(guild_id, user_id, reason, delete_message_days)
        })
        .await
    }

    async fn channels(&self, guild_id: GuildId) -> RemediationResult<Vec<ChannelInfo>> {
        let api = &self.inner;
        self.call("channels", move || api.channels(guild_id)).await
    }

    async fn create_category(
        &self,
        guild_id: GuildId,
        name: &str,
        position: i32,
    ) -> RemediationResult<ChannelInfo> {
        let api = &self.inner;
        self.call("create_category", move || {
            api.create_category(guild_id, name, position)
        })
        .await
    }

    async fn create_text_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        parent_id: Option<ChannelId>,
    ) -> RemediationResult<ChannelInfo> {
        let api = &self.inner;
        self.call("create_text_channel", move || {
            api.create_text_channel(guild_id, name, parent_id)
        })
        .await
    }

    async fn delete_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("delete_channel", move || api.delete_channel(guild_id, channel_id))
            .await
    }

    async fn set_channel_overwrites(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        overwrites: &[PermissionOverwrite],
    ) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("set_channel_overwrites", move || {
            api.set_channel_overwrites(guild_id, channel_id, overwrites)
        })
        .await
    }

    async fn roles(&self, guild_id: GuildId) -> RemediationResult<Vec<RoleInfo>> {
        let api = &self.inner;
        self.call("roles", move || api.roles(guild_id)).await
    }

    async fn create_role(&self, guild_id: GuildId, role: &NewRole) -> RemediationResult<RoleInfo> {
        let api = &self.inner;
        self.call("create_role", move || api.create_role(guild_id, role))
            .await
    }

    async fn modify_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        role: &NewRole,
    ) -> RemediationResult<RoleInfo> {
        let api = &self.inner;
        self.call("modify_role", move || api.modify_role(guild_id, role_id, role))
            .await
    }

    async fn modify_role_position(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        position: i32,
    ) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("modify_role_position", move || {
            api.modify_role_position(guild_id, role_id, position)
        })
        .await
    }

    async fn guild_owner(&self, guild_id: GuildId) -> RemediationResult<UserId> {
        let api = &self.inner;
        self.call("guild_owner", move || api.guild_owner(guild_id)).await
    }

    async fn current_user(&self) -> RemediationResult<UserId> {
        let api = &self.inner;
        self.call("current_user", move || api.current_user()).await
    }

    async fn update_presence(&self, presence: &Presence) -> RemediationResult<()> {
        let api = &self.inner;
        self.call("update_presence", move || api.update_presence(presence))
            .await
    }
}
