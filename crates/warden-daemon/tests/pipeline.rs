use std::sync::Arc;
use tokio::sync::mpsc;
use warden_cache::{CacheConfig, ConfigCache, InMemoryCacheBackend, InMemoryConfigStore};
use warden_daemon::{Disposition, EventDispatcher, EventGate, SuppressReason};
use warden_reconciler::{Compliance, ReconcilerConfig, RoleReconciler};
use warden_remediation::{
    ActionExecutor, ExecutionOutcome, OverwriteTarget, PermissionIssue, RemediationApi,
    RemediationError, SandboxRemediationApi,
};
use warden_rules::{CooldownStore, InMemoryCooldownStore, NoopClassifier, RuleEngine};
use warden_types::{
    modules, ActionKind, ChannelId, EventPayload, GatewayEvent, GuildConfig, GuildId, GuildSettings,
    LoggingSettings, MessageId, Rule, RuleAction, TicketSettings, Trigger, UserId, WelcomeSettings,
};

const GUILD: GuildId = GuildId::new(100);
const BOT: UserId = UserId::new(1);
const OWNER: UserId = UserId::new(2);
const MEMBER: UserId = UserId::new(7);
const GENERAL: ChannelId = ChannelId::new(50);

struct Harness {
    sandbox: Arc<SandboxRemediationApi>,
    reconciler: Arc<RoleReconciler>,
    store: Arc<InMemoryConfigStore>,
    dispatcher: EventDispatcher,
    checks: mpsc::UnboundedReceiver<GuildId>,
    issues: mpsc::UnboundedReceiver<PermissionIssue>,
}

impl Harness {
    fn new() -> Self {
        let sandbox = Arc::new(SandboxRemediationApi::new(BOT));
        sandbox.add_guild(GUILD, OWNER);
        sandbox.add_text_channel(GUILD, GENERAL, "general");

        let reconciler = Arc::new(RoleReconciler::new(sandbox.clone(), ReconcilerConfig::default()));
        let store = Arc::new(InMemoryConfigStore::new());
        let cooldowns: Arc<dyn CooldownStore> = Arc::new(InMemoryCooldownStore::new());
        let (checks_tx, checks) = mpsc::unbounded_channel();
        let (issues_tx, issues) = mpsc::unbounded_channel();

        let cache = ConfigCache::new(
            Arc::new(InMemoryCacheBackend::new()),
            store.clone(),
            CacheConfig::default(),
        );
        let engine = RuleEngine::new(cooldowns.clone(), Arc::new(NoopClassifier));
        let executor = ActionExecutor::new(sandbox.clone(), cooldowns).with_issue_reporter(issues_tx);
        let gate = EventGate::new(reconciler.clone(), checks_tx);
        let dispatcher = EventDispatcher::new(gate, cache, engine, executor, reconciler.clone());

        Self {
            sandbox,
            reconciler,
            store,
            dispatcher,
            checks,
            issues,
        }
    }

    async fn compliant(self) -> Self {
        let compliance = self
            .reconciler
            .check_and_setup(GUILD)
            .await
            .expect("check should succeed");
        assert_eq!(compliance, Compliance::Compliant);
        self
    }

    /// Post `content` as a member and build the matching event.
    fn message(&self, content: &str) -> GatewayEvent {
        let message_id = self.sandbox.post_user_message(GUILD, GENERAL, MEMBER, content);
        GatewayEvent::new(
            GUILD,
            MEMBER,
            EventPayload::MessageCreated {
                channel_id: GENERAL,
                message_id,
                content: content.to_string(),
                mention_count: 0,
            },
        )
    }

    fn bot_messages(&self) -> Vec<String> {
        self.sandbox
            .messages(GUILD, GENERAL)
            .into_iter()
            .filter(|message| message.author_id == BOT)
            .map(|message| message.content)
            .collect()
    }
}

fn banned_x_rule() -> Rule {
    Rule::new(
        "No x",
        modules::MODERATION,
        Trigger::MessageContent {
            banned_words: vec!["x".to_string()],
        },
        RuleAction::DeleteContent { notice: None },
    )
}

fn moderated_config(rule: &Rule) -> GuildConfig {
    GuildConfig::new(GUILD, "Rustaceans")
        .with_module(modules::MODERATION, true)
        .with_rule(rule.clone())
}

#[tokio::test]
async fn banned_word_deletes_message_and_posts_notice() {
    let harness = Harness::new().compliant().await;
    let rule = banned_x_rule();
    harness.store.insert(moderated_config(&rule));

    let event = harness.message("this has x in it");
    let disposition = harness.dispatcher.handle(event).await;

    assert_eq!(
        disposition,
        Disposition::Handled {
            greeted: false,
            ticket: None,
            executed: Some((rule.id, ExecutionOutcome::Applied)),
        }
    );
    let remaining = harness.sandbox.messages(GUILD, GENERAL);
    assert!(remaining.iter().all(|message| message.author_id != MEMBER));
    assert_eq!(
        harness.bot_messages(),
        vec!["<@7>, your message was removed for violating server rules.".to_string()]
    );
}

#[tokio::test]
async fn clean_message_takes_no_action() {
    let harness = Harness::new().compliant().await;
    harness.store.insert(moderated_config(&banned_x_rule()));

    let disposition = harness.dispatcher.handle(harness.message("hello there")).await;

    assert_eq!(
        disposition,
        Disposition::Handled {
            greeted: false,
            ticket: None,
            executed: None,
        }
    );
    assert_eq!(harness.sandbox.count("delete_message"), 0);
    assert!(harness.bot_messages().is_empty());
}

#[tokio::test]
async fn unknown_guild_is_suppressed_until_checked() {
    let mut harness = Harness::new();
    let rule = banned_x_rule();
    harness.store.insert(moderated_config(&rule));

    let first = harness.dispatcher.handle(harness.message("x")).await;
    let second = harness.dispatcher.handle(harness.message("x")).await;
    assert_eq!(first, Disposition::Suppressed(SuppressReason::UnknownGuild));
    assert_eq!(second, Disposition::Suppressed(SuppressReason::UnknownGuild));
    assert_eq!(harness.checks.try_recv().ok(), Some(GUILD));
    assert!(harness.checks.try_recv().is_err(), "one check per unknown guild");
    assert_eq!(harness.sandbox.count("delete_message"), 0);

    let harness = harness.compliant().await;
    let third = harness.dispatcher.handle(harness.message("x")).await;
    assert!(matches!(
        third,
        Disposition::Handled {
            executed: Some((_, ExecutionOutcome::Applied)),
            ..
        }
    ));
}

#[tokio::test]
async fn non_compliant_guild_is_suppressed() {
    let harness = Harness::new();
    harness.sandbox.add_role(GUILD, "Admin", 2);
    let compliance = harness.reconciler.check_and_setup(GUILD).await.unwrap();
    assert_eq!(compliance, Compliance::NonCompliant);
    harness.store.insert(moderated_config(&banned_x_rule()));

    let disposition = harness.dispatcher.handle(harness.message("x")).await;

    assert_eq!(disposition, Disposition::Suppressed(SuppressReason::NonCompliant));
    assert_eq!(harness.sandbox.count("delete_message"), 0);
    assert!(harness.sandbox.channel_named(GUILD, "bot-setup-help").is_some());
}

#[tokio::test]
async fn bot_authored_messages_are_ignored() {
    let harness = Harness::new().compliant().await;
    harness.store.insert(moderated_config(&banned_x_rule()));

    let event = harness.message("x").from_bot();
    let disposition = harness.dispatcher.handle(event).await;

    assert_eq!(disposition, Disposition::Suppressed(SuppressReason::BotAuthor));
}

#[tokio::test]
async fn forbidden_action_reports_permission_issue() {
    let mut harness = Harness::new().compliant().await;
    let rule = banned_x_rule();
    harness.store.insert(moderated_config(&rule));
    harness.sandbox.fail_next(
        "delete_message",
        RemediationError::Forbidden("Missing Permissions".to_string()),
    );

    let disposition = harness.dispatcher.handle(harness.message("x")).await;

    match disposition {
        Disposition::Failed { rule_id, .. } => assert_eq!(rule_id, rule.id),
        other => panic!("expected failure, got {:?}", other),
    }
    let issue = harness.issues.try_recv().expect("issue should be reported");
    assert_eq!(issue.guild_id, GUILD);
    assert_eq!(issue.action, ActionKind::DeleteContent);
    assert!(harness
        .sandbox
        .messages(GUILD, GENERAL)
        .iter()
        .any(|message| message.author_id == MEMBER));
}

#[tokio::test]
async fn member_join_posts_welcome() {
    let harness = Harness::new().compliant().await;
    let welcome = ChannelId::new(60);
    harness.sandbox.add_text_channel(GUILD, welcome, "welcome");
    let settings = GuildSettings {
        welcome: WelcomeSettings {
            welcome_channel: Some(welcome),
            ..WelcomeSettings::default()
        },
        ..GuildSettings::default()
    };
    harness.store.insert(
        GuildConfig::new(GUILD, "Rustaceans")
            .with_module(modules::WELCOME, true)
            .with_settings(settings),
    );

    let event = GatewayEvent::new(
        GUILD,
        MEMBER,
        EventPayload::MemberJoined {
            username: "ferris".to_string(),
        },
    );
    let disposition = harness.dispatcher.handle(event).await;

    assert_eq!(
        disposition,
        Disposition::Handled {
            greeted: true,
            ticket: None,
            executed: None,
        }
    );
    let posted = harness.sandbox.messages(GUILD, welcome);
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].content, "Welcome <@7> to Rustaceans!");
}

#[tokio::test]
async fn config_invalidation_picks_up_new_rules() {
    let harness = Harness::new().compliant().await;
    let rule = banned_x_rule();
    harness.store.insert(moderated_config(&rule));

    let before = harness.dispatcher.handle(harness.message("x")).await;
    assert!(matches!(before, Disposition::Handled { executed: Some(_), .. }));

    harness
        .store
        .insert(GuildConfig::new(GUILD, "Rustaceans").with_module(modules::MODERATION, true));

    let cached = harness.dispatcher.handle(harness.message("x")).await;
    assert!(
        matches!(cached, Disposition::Handled { executed: Some(_), .. }),
        "cached configuration still applies before invalidation"
    );

    let signal = GatewayEvent::lifecycle(GUILD, EventPayload::ConfigInvalidated);
    assert_eq!(harness.dispatcher.handle(signal).await, Disposition::Lifecycle);

    let after = harness.dispatcher.handle(harness.message("x")).await;
    assert_eq!(
        after,
        Disposition::Handled {
            greeted: false,
            ticket: None,
            executed: None,
        }
    );
}

#[tokio::test]
async fn missing_configuration_means_no_action() {
    let harness = Harness::new().compliant().await;

    let disposition = harness.dispatcher.handle(harness.message("x")).await;

    assert_eq!(disposition, Disposition::Unconfigured);
    assert_eq!(harness.sandbox.count("delete_message"), 0);
}

#[tokio::test]
async fn dry_run_selects_without_applying() {
    let harness = Harness::new().compliant().await;
    let rule = banned_x_rule();
    harness.store.insert(moderated_config(&rule));
    let dispatcher = harness.dispatcher.clone().dry_run(true);

    let disposition = dispatcher.handle(harness.message("x")).await;

    assert_eq!(
        disposition,
        Disposition::DryRun {
            selected: Some(rule.id),
        }
    );
    assert_eq!(harness.sandbox.count("delete_message"), 0);
    assert!(harness.bot_messages().is_empty());
}

#[tokio::test]
async fn guild_join_registers_and_checks() {
    let harness = Harness::new();
    assert!(harness.reconciler.compliance(GUILD).is_none());

    let joined = GatewayEvent::lifecycle(GUILD, EventPayload::GuildJoined);
    assert_eq!(harness.dispatcher.handle(joined).await, Disposition::Lifecycle);

    assert!(harness.reconciler.is_known(GUILD));
    assert_eq!(harness.reconciler.compliance(GUILD), Some(Compliance::Compliant));

    let left = GatewayEvent::lifecycle(GUILD, EventPayload::GuildLeft);
    assert_eq!(harness.dispatcher.handle(left).await, Disposition::Lifecycle);
    assert!(!harness.reconciler.is_known(GUILD));
}

#[tokio::test]
async fn guild_left_forgets_and_suppresses() {
    let mut harness = Harness::new().compliant().await;
    harness.store.insert(moderated_config(&banned_x_rule()));
    let before = harness.dispatcher.handle(harness.message("x")).await;
    assert!(matches!(before, Disposition::Handled { executed: Some(_), .. }));
    let fetches = harness.store.fetch_count();

    let left = GatewayEvent::lifecycle(GUILD, EventPayload::GuildLeft);
    assert_eq!(harness.dispatcher.handle(left).await, Disposition::Lifecycle);
    assert!(!harness.reconciler.is_known(GUILD));
    assert_eq!(harness.reconciler.compliance(GUILD), None);

    let late = harness.dispatcher.handle(harness.message("x")).await;
    assert_eq!(late, Disposition::Suppressed(SuppressReason::UnknownGuild));
    assert!(harness.checks.try_recv().is_err(), "no check for a departed guild");
    assert!(!harness.reconciler.is_known(GUILD));
    assert_eq!(harness.sandbox.count("delete_message"), 1);

    let joined = GatewayEvent::lifecycle(GUILD, EventPayload::GuildJoined);
    assert_eq!(harness.dispatcher.handle(joined).await, Disposition::Lifecycle);
    assert_eq!(
        harness.store.fetch_count(),
        fetches + 1,
        "configuration is fetched again after leaving"
    );
    let after = harness.dispatcher.handle(harness.message("x")).await;
    assert!(matches!(after, Disposition::Handled { executed: Some(_), .. }));
}

#[tokio::test]
async fn reaction_on_ticket_message_opens_ticket() {
    let harness = Harness::new().compliant().await;
    let category = harness
        .sandbox
        .create_category(GUILD, "Tickets", 1)
        .await
        .expect("category");
    let support = harness.sandbox.add_role(GUILD, "Support", 1);
    let settings = GuildSettings {
        tickets: TicketSettings {
            creation_message: Some(MessageId::new(900)),
            creation_emoji: Some("🎫".to_string()),
            category: Some(category.id),
            support_roles: vec![support],
            ..TicketSettings::default()
        },
        ..GuildSettings::default()
    };
    harness.store.insert(
        GuildConfig::new(GUILD, "Rustaceans")
            .with_module(modules::TICKETS, true)
            .with_settings(settings),
    );
    let reaction = |emoji: &str| {
        GatewayEvent::new(
            GUILD,
            MEMBER,
            EventPayload::ReactionAdded {
                channel_id: GENERAL,
                message_id: MessageId::new(900),
                emoji: emoji.to_string(),
                username: Some("Ferris".to_string()),
            },
        )
    };

    let ticket = match harness.dispatcher.handle(reaction("🎫")).await {
        Disposition::Handled {
            ticket: Some(ticket),
            executed: None,
            ..
        } => ticket,
        other => panic!("expected a ticket, got {:?}", other),
    };

    let channel = harness.sandbox.channel_named(GUILD, "ticket-ferris").expect("ticket channel");
    assert_eq!(channel.id, ticket);
    assert_eq!(channel.parent_id, Some(category.id));
    let overwrites = harness.sandbox.overwrites(GUILD, ticket);
    assert!(overwrites
        .iter()
        .any(|o| o.target == OverwriteTarget::Member(MEMBER)));
    assert!(overwrites
        .iter()
        .any(|o| o.target == OverwriteTarget::Role(support)));
    let posted = harness.sandbox.messages(GUILD, ticket);
    assert_eq!(posted.len(), 1);
    assert!(posted[0].content.starts_with("Hello <@7>!"));

    let again = harness.dispatcher.handle(reaction("🎫")).await;
    assert!(matches!(again, Disposition::Handled { ticket: Some(id), .. } if id == ticket));
    assert_eq!(harness.sandbox.count("create_text_channel"), 1);
    assert_eq!(harness.sandbox.messages(GUILD, ticket).len(), 1);

    let other_emoji = harness.dispatcher.handle(reaction("👍")).await;
    assert!(matches!(other_emoji, Disposition::Handled { ticket: None, .. }));
}

#[tokio::test]
async fn applied_action_is_posted_to_log_channel() {
    let harness = Harness::new().compliant().await;
    let logs = ChannelId::new(61);
    harness.sandbox.add_text_channel(GUILD, logs, "mod-log");
    let rule = banned_x_rule();
    let settings = GuildSettings {
        logging: LoggingSettings {
            log_channel: Some(logs),
        },
        ..GuildSettings::default()
    };
    harness.store.insert(
        moderated_config(&rule)
            .with_module(modules::LOGGING, true)
            .with_settings(settings),
    );

    harness.dispatcher.handle(harness.message("hello")).await;
    harness.dispatcher.handle(harness.message("x marks the spot")).await;

    let logged: Vec<String> = harness
        .sandbox
        .messages(GUILD, logs)
        .into_iter()
        .map(|message| message.content)
        .collect();
    assert_eq!(
        logged,
        vec!["**No x**: delete-content applied to <@7> in <#50>".to_string()]
    );
}
