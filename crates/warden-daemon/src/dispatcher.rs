//! Routes each gateway event through gate, cache, engine and executor.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use warden_cache::{CacheLookup, ConfigCache};
use warden_reconciler::RoleReconciler;
use warden_remediation::{
    ActionExecutor, ChannelKind, ExecutionOutcome, OverwriteTarget, PermissionOverwrite,
    Permissions, RemediationApi, RemediationResult,
};
use warden_rules::RuleEngine;
use warden_types::{
    modules, ActionContext, ChannelId, EventPayload, GatewayEvent, GuildConfig, GuildId, RoleId,
    RuleId, SelectedAction, TicketSettings, UserId,
};

use crate::gate::{EventGate, GateDecision, SuppressReason};

/// What the dispatcher did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Guild lifecycle or store signal
    Lifecycle,
    Suppressed(SuppressReason),
    /// No configuration could be loaded; nothing runs
    Unconfigured,
    Handled {
        greeted: bool,
        /// Ticket channel opened or found for the reacting member
        ticket: Option<ChannelId>,
        executed: Option<(RuleId, ExecutionOutcome)>,
    },
    /// An action was selected but could not be applied
    Failed { rule_id: RuleId, error: String },
    /// Evaluated only, nothing applied
    DryRun { selected: Option<RuleId> },
}

/// The per-event pipeline.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    gate: EventGate,
    cache: ConfigCache,
    engine: RuleEngine,
    executor: ActionExecutor,
    reconciler: Arc<RoleReconciler>,
    /// Members with a ticket being opened right now
    opening: Arc<DashMap<(GuildId, UserId), ()>>,
    dry_run: bool,
}

impl EventDispatcher {
    pub fn new(
        gate: EventGate,
        cache: ConfigCache,
        engine: RuleEngine,
        executor: ActionExecutor,
        reconciler: Arc<RoleReconciler>,
    ) -> Self {
        Self {
            gate,
            cache,
            engine,
            executor,
            reconciler,
            opening: Arc::new(DashMap::new()),
            dry_run: false,
        }
    }

    /// Evaluate without applying anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[instrument(skip(self, event), fields(guild_id = %event.guild_id, event = %event.kind()))]
    pub async fn handle(&self, event: GatewayEvent) -> Disposition {
        if event.is_lifecycle() {
            self.handle_lifecycle(&event).await;
            return Disposition::Lifecycle;
        }

        if let GateDecision::Suppress(reason) = self.gate.admit(&event) {
            debug!(reason = %reason, "Event suppressed");
            return Disposition::Suppressed(reason);
        }

        let config = match self.cache.get(event.guild_id).await {
            CacheLookup::Hit(config) => config,
            CacheLookup::Miss(reason) => {
                debug!(reason = %reason, "No configuration, skipping event");
                return Disposition::Unconfigured;
            }
        };

        if self.dry_run {
            let selected = self.engine.evaluate(&event, &config).await;
            if let Some(action) = &selected {
                info!(rule = %action.rule_name, action = %action.action.kind(), subject = %action.subject, "Would apply action");
            }
            return Disposition::DryRun {
                selected: selected.map(|action| action.rule_id),
            };
        }

        let greeted = self.greet(&event, &config).await;
        let ticket = self.open_ticket(&event, &config).await;

        let Some(action) = self.engine.evaluate(&event, &config).await else {
            return Disposition::Handled {
                greeted,
                ticket,
                executed: None,
            };
        };

        let ctx = ActionContext::from_event(&event);
        match self.executor.apply(&action, &ctx).await {
            Ok(outcome) => {
                if outcome == ExecutionOutcome::Applied {
                    self.log_action(&action, &ctx, &config).await;
                }
                Disposition::Handled {
                    greeted,
                    ticket,
                    executed: Some((action.rule_id, outcome)),
                }
            }
            Err(e) => Disposition::Failed {
                rule_id: action.rule_id,
                error: e.to_string(),
            },
        }
    }

    async fn handle_lifecycle(&self, event: &GatewayEvent) {
        let guild_id = event.guild_id;
        match event.payload {
            EventPayload::GuildJoined | EventPayload::GuildAvailable => {
                if self.reconciler.register(guild_id) {
                    info!("Guild registered");
                }
                if let Err(e) = self.reconciler.check_and_setup(guild_id).await {
                    warn!(error = %e, "Initial guild check failed");
                }
                if let CacheLookup::Miss(reason) = self.cache.get(guild_id).await {
                    debug!(reason = %reason, "Configuration not warmed");
                }
            }
            EventPayload::GuildLeft => {
                self.reconciler.forget(guild_id).await;
                self.gate.forget(guild_id);
                self.invalidate(event).await;
            }
            EventPayload::ConfigInvalidated => self.invalidate(event).await,
            _ => {}
        }
    }

    async fn invalidate(&self, event: &GatewayEvent) {
        if let Err(e) = self.cache.invalidate(event.guild_id).await {
            warn!(error = %e, "Cache invalidation failed");
        }
    }

    /// Post the welcome or goodbye greeting when the module is on.
    async fn greet(&self, event: &GatewayEvent, config: &GuildConfig) -> bool {
        if !config.module_enabled(modules::WELCOME) {
            return false;
        }
        let welcome = &config.settings.welcome;
        let (channel, text) = match &event.payload {
            EventPayload::MemberJoined { username } => (
                welcome.welcome_channel,
                render_greeting(&welcome.welcome_template, &event.actor_id.mention(), username, config),
            ),
            EventPayload::MemberLeft { username } => (
                welcome.goodbye_channel,
                render_greeting(&welcome.goodbye_template, username, username, config),
            ),
            _ => return false,
        };
        let Some(channel) = channel else {
            return false;
        };

        match self
            .executor
            .api()
            .send_message(event.guild_id, channel, &text)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(channel_id = %channel, error = %e, "Greeting failed");
                false
            }
        }
    }

    /// Open a private ticket channel when the configured reaction lands on
    /// the ticket message. A member with a ticket already open gets it back.
    async fn open_ticket(&self, event: &GatewayEvent, config: &GuildConfig) -> Option<ChannelId> {
        if !config.module_enabled(modules::TICKETS) {
            return None;
        }
        let EventPayload::ReactionAdded {
            message_id,
            emoji,
            username,
            ..
        } = &event.payload
        else {
            return None;
        };
        let tickets = &config.settings.tickets;
        if !tickets.opens_ticket(*message_id, emoji) {
            return None;
        }

        let key = (event.guild_id, event.actor_id);
        if self.opening.insert(key, ()).is_some() {
            debug!("Ticket already being opened");
            return None;
        }
        let name = ticket_channel_name(username.as_deref(), event.actor_id);
        let opened = self.create_ticket(event, tickets, &name).await;
        self.opening.remove(&key);

        match opened {
            Ok(channel_id) => Some(channel_id),
            Err(e) => {
                warn!(channel = %name, error = %e, "Ticket creation failed");
                None
            }
        }
    }

    async fn create_ticket(
        &self,
        event: &GatewayEvent,
        tickets: &TicketSettings,
        name: &str,
    ) -> RemediationResult<ChannelId> {
        let api = self.executor.api();
        let guild_id = event.guild_id;

        let channels = api.channels(guild_id).await?;
        if let Some(existing) = channels
            .iter()
            .find(|channel| channel.kind == ChannelKind::Text && channel.name.eq_ignore_ascii_case(name))
        {
            debug!(channel_id = %existing.id, "Ticket already open");
            return Ok(existing.id);
        }

        let parent = tickets.category.filter(|category| {
            channels
                .iter()
                .any(|channel| channel.id == *category && channel.kind == ChannelKind::Category)
        });
        if parent.is_none() && tickets.category.is_some() {
            warn!("Ticket category missing, opening ticket at the top level");
        }

        let channel = api.create_text_channel(guild_id, name, parent).await?;
        let bot = api.current_user().await?;
        let overwrites = ticket_overwrites(guild_id, bot, event.actor_id, &tickets.support_roles);
        api.set_channel_overwrites(guild_id, channel.id, &overwrites)
            .await?;
        let welcome = tickets
            .welcome_template
            .replace("{user}", &event.actor_id.mention());
        api.send_message(guild_id, channel.id, &welcome).await?;

        info!(channel = %name, channel_id = %channel.id, "Opened ticket");
        Ok(channel.id)
    }

    /// Record an applied action in the guild's log channel. Best effort.
    async fn log_action(&self, action: &SelectedAction, ctx: &ActionContext, config: &GuildConfig) {
        if !config.module_enabled(modules::LOGGING) {
            return;
        }
        let Some(channel) = config.settings.logging.log_channel else {
            return;
        };
        let mut entry = format!(
            "**{}**: {} applied to {}",
            action.rule_name,
            action.action.kind(),
            action.subject.mention()
        );
        if let Some(origin) = ctx.channel_id {
            entry.push_str(&format!(" in <#{}>", origin.get()));
        }

        if let Err(e) = self
            .executor
            .api()
            .send_message(ctx.guild_id, channel, &entry)
            .await
        {
            warn!(channel_id = %channel, error = %e, "Action log post failed");
        }
    }

    /// Consume events until the channel closes, one task per event.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<GatewayEvent>) {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Some(event) => {
                        let dispatcher = self.clone();
                        tasks.spawn(async move { dispatcher.handle(event).await });
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_task(joined),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_task(joined);
        }
        debug!("Event stream closed");
    }
}

fn log_task(joined: Result<Disposition, tokio::task::JoinError>) {
    match joined {
        Ok(Disposition::Failed { rule_id, error }) => {
            warn!(rule_id = %rule_id, error = %error, "Event handling failed");
        }
        Ok(disposition) => debug!(disposition = ?disposition, "Event handled"),
        Err(e) => error!(error = %e, "Event task panicked"),
    }
}

/// `ticket-<username>` in channel-name form, or the member id when the
/// name is unknown or has nothing usable.
pub fn ticket_channel_name(username: Option<&str>, user_id: UserId) -> String {
    let slug: String = username
        .unwrap_or_default()
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        format!("ticket-{}", user_id.get())
    } else {
        format!("ticket-{}", slug)
    }
}

/// Hidden from `@everyone`, open to the member, the support roles and the bot.
fn ticket_overwrites(
    guild_id: GuildId,
    bot: UserId,
    member: UserId,
    support_roles: &[RoleId],
) -> Vec<PermissionOverwrite> {
    let access = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES | Permissions::READ_MESSAGE_HISTORY;
    let mut overwrites = vec![
        PermissionOverwrite::deny(
            OverwriteTarget::Role(RoleId::new(guild_id.get())),
            Permissions::VIEW_CHANNEL,
        ),
        PermissionOverwrite::allow(OverwriteTarget::Member(bot), access),
        PermissionOverwrite::allow(OverwriteTarget::Member(member), access),
    ];
    overwrites.extend(
        support_roles
            .iter()
            .map(|role| PermissionOverwrite::allow(OverwriteTarget::Role(*role), access)),
    );
    overwrites
}

/// Substitute `{user}`, `{username}`, `{guild}` and `{server}`.
pub fn render_greeting(template: &str, user: &str, username: &str, config: &GuildConfig) -> String {
    template
        .replace("{user}", user)
        .replace("{username}", username)
        .replace("{guild}", &config.guild_name)
        .replace("{server}", &config.guild_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_greeting() {
        let config = GuildConfig::new(GuildId::new(1), "Rustaceans");
        assert_eq!(
            render_greeting("Welcome {user} to {guild}!", "<@5>", "ferris", &config),
            "Welcome <@5> to Rustaceans!"
        );
        assert_eq!(
            render_greeting("{username} left {server}", &UserId::new(5).mention(), "ferris", &config),
            "ferris left Rustaceans"
        );
    }

    #[test]
    fn test_ticket_channel_name() {
        let user = UserId::new(42);
        assert_eq!(ticket_channel_name(Some("Ferris"), user), "ticket-ferris");
        assert_eq!(ticket_channel_name(Some("Rusty Crab!"), user), "ticket-rusty-crab");
        assert_eq!(ticket_channel_name(Some("  "), user), "ticket-42");
        assert_eq!(ticket_channel_name(None, user), "ticket-42");
    }

    #[test]
    fn test_ticket_overwrites() {
        let guild = GuildId::new(100);
        let overwrites = ticket_overwrites(guild, UserId::new(1), UserId::new(7), &[RoleId::new(30)]);
        assert_eq!(overwrites.len(), 4);
        assert_eq!(overwrites[0].target, OverwriteTarget::Role(RoleId::new(100)));
        assert!(overwrites[0].deny.contains(Permissions::VIEW_CHANNEL));
        assert_eq!(overwrites[2].target, OverwriteTarget::Member(UserId::new(7)));
        assert!(overwrites[3].allow.contains(Permissions::SEND_MESSAGES));
    }
}
