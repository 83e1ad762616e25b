//! Applies a selected action through the remediation API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use warden_rules::CooldownStore;
use warden_types::{ActionContext, ActionKind, GuildId, RuleAction, SelectedAction};

use crate::api::RemediationApi;
use crate::error::{ExecutionError, RemediationError};

const DELETE_NOTICE: &str = "{mention}, your message was removed for violating server rules.";
const CLASSIFIER_NOTICE: &str =
    "{mention}, your message was flagged by our AI moderation system and has been removed.";
const WARN_NOTICE: &str = "{mention}, your message violates our rules. Please review the server rules.";

/// What happened to a selected action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Applied,
    /// The target state already held; nothing was changed
    AlreadyApplied,
    /// Another firing won the cooldown claim
    Suppressed,
}

/// A remediation call refused for lack of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionIssue {
    pub guild_id: GuildId,
    pub action: ActionKind,
    pub detail: String,
    pub observed_at: DateTime<Utc>,
}

/// Turns the engine's selection into side effects.
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    api: Arc<dyn RemediationApi>,
    cooldowns: Arc<dyn CooldownStore>,
    issues: Option<mpsc::UnboundedSender<PermissionIssue>>,
}

impl ActionExecutor {
    pub fn new(api: Arc<dyn RemediationApi>, cooldowns: Arc<dyn CooldownStore>) -> Self {
        Self {
            api,
            cooldowns,
            issues: None,
        }
    }

    /// Report permission failures on `sender`.
    pub fn with_issue_reporter(mut self, sender: mpsc::UnboundedSender<PermissionIssue>) -> Self {
        self.issues = Some(sender);
        self
    }

    pub fn api(&self) -> &Arc<dyn RemediationApi> {
        &self.api
    }

    /// Claim the cooldown, run the side effect, roll the claim back on failure.
    #[instrument(
        skip(self, action, ctx),
        fields(guild_id = %ctx.guild_id, rule_id = %action.rule_id, action = %action.action.kind())
    )]
    pub async fn apply(
        &self,
        action: &SelectedAction,
        ctx: &ActionContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let cooldown = Duration::from_secs(action.cooldown_secs.unwrap_or(0));
        let claim = match self
            .cooldowns
            .try_claim(action.cooldown_key(), cooldown, ctx.occurred_at)
        {
            Ok(claim) => claim,
            Err(active) => {
                debug!(remaining = ?active.remaining, "Cooldown claim lost, suppressing");
                return Ok(ExecutionOutcome::Suppressed);
            }
        };

        match self.perform(action, ctx).await {
            Ok(outcome) => {
                info!(outcome = ?outcome, rule = %action.rule_name, subject = %ctx.subject, "Action executed");
                Ok(outcome)
            }
            Err(err) => {
                self.cooldowns.rollback(&claim);
                if let Some(source) = err.remediation().filter(|e| e.is_permission()) {
                    self.report(ctx.guild_id, action.action.kind(), source);
                }
                warn!(error = %err, rule = %action.rule_name, "Action failed");
                Err(err)
            }
        }
    }

    async fn perform(
        &self,
        action: &SelectedAction,
        ctx: &ActionContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let kind = action.action.kind();
        let remote = |source: RemediationError| ExecutionError::Remote { action: kind, source };
        let guild = ctx.guild_id;
        let subject = ctx.subject;

        match &action.action {
            RuleAction::DeleteContent { notice } => {
                let channel = ctx.channel_id.ok_or(ExecutionError::MissingContext("channel"))?;
                let message = ctx.message_id.ok_or(ExecutionError::MissingContext("message"))?;
                match self.api.delete_message(guild, channel, message).await {
                    Ok(()) => {}
                    // Someone else already removed it; no notice for a message nobody saw go.
                    Err(e) if e.is_not_found() => return Ok(ExecutionOutcome::AlreadyApplied),
                    Err(e) => return Err(remote(e)),
                }
                let template = notice.as_deref().unwrap_or(if action.synthetic {
                    CLASSIFIER_NOTICE
                } else {
                    DELETE_NOTICE
                });
                self.api
                    .send_message(guild, channel, &render_notice(template, action, ctx))
                    .await
                    .map_err(remote)?;
                Ok(ExecutionOutcome::Applied)
            }
            RuleAction::Warn { notice } => {
                let channel = ctx.channel_id.ok_or(ExecutionError::MissingContext("channel"))?;
                let template = notice.as_deref().unwrap_or(WARN_NOTICE);
                self.api
                    .send_message(guild, channel, &render_notice(template, action, ctx))
                    .await
                    .map_err(remote)?;
                Ok(ExecutionOutcome::Applied)
            }
            RuleAction::Mute { duration_secs } => {
                self.api
                    .timeout_member(guild, subject, Duration::from_secs(*duration_secs))
                    .await
                    .map_err(remote)?;
                Ok(ExecutionOutcome::Applied)
            }
            RuleAction::Kick { reason } => {
                let reason = reason.as_deref().unwrap_or(&action.rule_name);
                self.api
                    .kick_member(guild, subject, Some(reason))
                    .await
                    .map_err(remote)?;
                Ok(ExecutionOutcome::Applied)
            }
            RuleAction::Ban {
                reason,
                delete_message_days,
            } => {
                let reason = reason.as_deref().unwrap_or(&action.rule_name);
                self.api
                    .ban_member(guild, subject, Some(reason), *delete_message_days)
                    .await
                    .map_err(remote)?;
                Ok(ExecutionOutcome::Applied)
            }
            RuleAction::GrantRole { role_id } => {
                let held = self.api.member_roles(guild, subject).await.map_err(remote)?;
                if held.contains(role_id) {
                    return Ok(ExecutionOutcome::AlreadyApplied);
                }
                self.api
                    .add_member_role(guild, subject, *role_id)
                    .await
                    .map_err(remote)?;
                Ok(ExecutionOutcome::Applied)
            }
            RuleAction::RevokeRole { role_id } => {
                let held = self.api.member_roles(guild, subject).await.map_err(remote)?;
                if !held.contains(role_id) {
                    return Ok(ExecutionOutcome::AlreadyApplied);
                }
                self.api
                    .remove_member_role(guild, subject, *role_id)
                    .await
                    .map_err(remote)?;
                Ok(ExecutionOutcome::Applied)
            }
            RuleAction::LogOnly => {
                info!(
                    rule = %action.rule_name,
                    subject = %subject,
                    channel_id = ?ctx.channel_id,
                    "Rule matched (log only)"
                );
                Ok(ExecutionOutcome::Applied)
            }
        }
    }

    fn report(&self, guild_id: GuildId, action: ActionKind, source: &RemediationError) {
        let Some(sender) = &self.issues else {
            return;
        };
        let issue = PermissionIssue {
            guild_id,
            action,
            detail: source.to_string(),
            observed_at: Utc::now(),
        };
        if sender.send(issue).is_err() {
            debug!("Permission issue receiver dropped");
        }
    }
}

/// Substitute `{mention}` and `{rule}` in a notice template.
pub fn render_notice(template: &str, action: &SelectedAction, ctx: &ActionContext) -> String {
    template
        .replace("{mention}", &ctx.subject.mention())
        .replace("{rule}", &action.rule_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxRemediationApi;
    use chrono::TimeZone;
    use warden_rules::InMemoryCooldownStore;
    use warden_types::{ChannelId, MessageId, RoleId, Rule, RuleId, Trigger, UserId};

    const GUILD: GuildId = GuildId::new(100);
    const CHANNEL: ChannelId = ChannelId::new(200);
    const BOT: UserId = UserId::new(1);
    const OWNER: UserId = UserId::new(2);
    const MEMBER: UserId = UserId::new(3);

    struct Harness {
        sandbox: Arc<SandboxRemediationApi>,
        cooldowns: Arc<InMemoryCooldownStore>,
        executor: ActionExecutor,
    }

    fn harness() -> Harness {
        let sandbox = Arc::new(SandboxRemediationApi::new(BOT));
        sandbox.add_guild(GUILD, OWNER);
        sandbox.add_member(GUILD, MEMBER);
        sandbox.add_text_channel(GUILD, CHANNEL, "general");
        let cooldowns = Arc::new(InMemoryCooldownStore::new());
        let executor = ActionExecutor::new(sandbox.clone(), cooldowns.clone());
        Harness {
            sandbox,
            cooldowns,
            executor,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn selected(action: RuleAction, cooldown_secs: Option<u64>) -> SelectedAction {
        let mut rule = Rule::new(
            "no-x",
            warden_types::modules::MODERATION,
            Trigger::MessageContent { banned_words: vec!["x".into()] },
            action,
        );
        rule.cooldown_secs = cooldown_secs;
        SelectedAction::from_rule(&rule, MEMBER)
    }

    fn ctx(message_id: Option<MessageId>) -> ActionContext {
        ActionContext {
            guild_id: GUILD,
            subject: MEMBER,
            channel_id: Some(CHANNEL),
            message_id,
            occurred_at: t0(),
        }
    }

    #[tokio::test]
    async fn test_delete_content_removes_message_and_posts_notice() {
        let h = harness();
        let message = h.sandbox.post_user_message(GUILD, CHANNEL, MEMBER, "has x in it");
        let action = selected(RuleAction::DeleteContent { notice: None }, None);

        let outcome = h.executor.apply(&action, &ctx(Some(message))).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Applied);

        let messages = h.sandbox.messages(GUILD, CHANNEL);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].author_id, BOT);
        assert_eq!(
            messages[0].content,
            "<@3>, your message was removed for violating server rules."
        );
    }

    #[tokio::test]
    async fn test_classifier_selection_uses_classifier_notice() {
        let h = harness();
        let message = h.sandbox.post_user_message(GUILD, CHANNEL, MEMBER, "something nasty");
        let action = SelectedAction::from_rule(&Rule::classifier_sentinel(None), MEMBER);
        assert_eq!(action.rule_id, RuleId::CLASSIFIER);

        h.executor.apply(&action, &ctx(Some(message))).await.unwrap();
        let notice = &h.sandbox.messages(GUILD, CHANNEL)[0].content;
        assert!(notice.contains("flagged by our AI moderation system"));
    }

    #[tokio::test]
    async fn test_already_deleted_message_is_a_no_op() {
        let h = harness();
        let action = selected(RuleAction::DeleteContent { notice: None }, None);

        let outcome = h
            .executor
            .apply(&action, &ctx(Some(MessageId::new(999))))
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::AlreadyApplied);
        assert_eq!(h.sandbox.count("send_message"), 0);
    }

    #[tokio::test]
    async fn test_cooldown_claim_suppresses_second_firing() {
        let h = harness();
        let action = selected(RuleAction::Warn { notice: Some("{mention} stop ({rule})".into()) }, Some(60));

        let first = h.executor.apply(&action, &ctx(None)).await.unwrap();
        let second = h.executor.apply(&action, &ctx(None)).await.unwrap();
        assert_eq!(first, ExecutionOutcome::Applied);
        assert_eq!(second, ExecutionOutcome::Suppressed);
        assert_eq!(h.sandbox.messages(GUILD, CHANNEL)[0].content, "<@3> stop (no-x)");
    }

    #[tokio::test]
    async fn test_concurrent_firings_apply_once() {
        let h = harness();
        let action = selected(RuleAction::Warn { notice: None }, Some(60));
        let context = ctx(None);

        let outcomes = futures::future::join_all(
            (0..6).map(|_| h.executor.apply(&action, &context)),
        )
        .await;
        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(ExecutionOutcome::Applied)))
            .count();
        assert_eq!(applied, 1);
        assert_eq!(h.sandbox.count("send_message"), 1);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_claim_and_reports_permission_issue() {
        let h = harness();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = h.executor.clone().with_issue_reporter(tx);
        h.sandbox
            .fail_next("kick_member", RemediationError::Forbidden("kick members".into()));
        let action = selected(RuleAction::Kick { reason: None }, Some(300));

        let err = executor.apply(&action, &ctx(None)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Remote { action: ActionKind::Kick, .. }));
        assert_eq!(h.cooldowns.last_fired(&action.cooldown_key()), None);

        let issue = rx.try_recv().unwrap();
        assert_eq!(issue.guild_id, GUILD);
        assert_eq!(issue.action, ActionKind::Kick);

        // Nothing is cooling down, so the retry goes through.
        let outcome = executor.apply(&action, &ctx(None)).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Applied);
        assert!(!h.sandbox.is_member(GUILD, MEMBER));
    }

    #[tokio::test]
    async fn test_role_grant_is_idempotent() {
        let h = harness();
        let role = h.sandbox.add_role(GUILD, "Verified", 1);
        let grant = selected(RuleAction::GrantRole { role_id: role }, None);
        let revoke = selected(RuleAction::RevokeRole { role_id: role }, None);

        assert_eq!(h.executor.apply(&grant, &ctx(None)).await.unwrap(), ExecutionOutcome::Applied);
        assert_eq!(
            h.executor.apply(&grant, &ctx(None)).await.unwrap(),
            ExecutionOutcome::AlreadyApplied
        );
        assert!(h.sandbox.has_role(GUILD, MEMBER, role));

        assert_eq!(h.executor.apply(&revoke, &ctx(None)).await.unwrap(), ExecutionOutcome::Applied);
        assert_eq!(
            h.executor.apply(&revoke, &ctx(None)).await.unwrap(),
            ExecutionOutcome::AlreadyApplied
        );
        assert_eq!(h.sandbox.count("add_member_role"), 1);
        assert_eq!(h.sandbox.count("remove_member_role"), 1);
    }

    #[tokio::test]
    async fn test_mute_and_ban() {
        let h = harness();
        let mute = selected(RuleAction::Mute { duration_secs: 600 }, None);
        h.executor.apply(&mute, &ctx(None)).await.unwrap();
        assert_eq!(h.sandbox.timeout_of(GUILD, MEMBER), Some(Duration::from_secs(600)));

        let ban = selected(
            RuleAction::Ban {
                reason: Some("raid".into()),
                delete_message_days: 1,
            },
            None,
        );
        h.executor.apply(&ban, &ctx(None)).await.unwrap();
        assert!(h.sandbox.is_banned(GUILD, MEMBER));
    }

    #[tokio::test]
    async fn test_log_only_and_missing_context() {
        let h = harness();
        let log = selected(RuleAction::LogOnly, None);
        assert_eq!(h.executor.apply(&log, &ctx(None)).await.unwrap(), ExecutionOutcome::Applied);
        assert_eq!(h.sandbox.mutation_count(), 0);

        let delete = selected(RuleAction::DeleteContent { notice: None }, Some(30));
        let err = h.executor.apply(&delete, &ctx(None)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::MissingContext("message")));
        assert_eq!(h.cooldowns.last_fired(&delete.cooldown_key()), None);

        let role = selected(RuleAction::GrantRole { role_id: RoleId::new(77) }, None);
        assert!(h.executor.apply(&role, &ctx(None)).await.is_err());
    }
}
