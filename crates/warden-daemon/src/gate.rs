//! Admission control in front of the rule pipeline.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use warden_reconciler::{Compliance, RoleReconciler};
use warden_types::{GatewayEvent, GuildId};

/// Why an event was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Authored by a bot, including this one
    BotAuthor,
    /// No reconciliation has established the guild's hierarchy yet
    UnknownGuild,
    /// The bot's role is not at the top of the hierarchy
    NonCompliant,
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressReason::BotAuthor => f.write_str("bot author"),
            SuppressReason::UnknownGuild => f.write_str("guild not yet checked"),
            SuppressReason::NonCompliant => f.write_str("guild non-compliant"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Suppress(SuppressReason),
}

/// Admits events only for guilds known to be compliant.
///
/// Unknown guilds fail closed: the event is suppressed and one on-demand
/// check is requested until a check records the guild's state. Guilds the
/// bot has left are suppressed without a check.
#[derive(Debug, Clone)]
pub struct EventGate {
    reconciler: Arc<RoleReconciler>,
    checks: mpsc::UnboundedSender<GuildId>,
    requested: Arc<DashMap<GuildId, ()>>,
}

impl EventGate {
    pub fn new(reconciler: Arc<RoleReconciler>, checks: mpsc::UnboundedSender<GuildId>) -> Self {
        Self {
            reconciler,
            checks,
            requested: Arc::new(DashMap::new()),
        }
    }

    pub fn admit(&self, event: &GatewayEvent) -> GateDecision {
        if event.is_lifecycle() {
            return GateDecision::Admit;
        }
        if event.actor_is_bot {
            return GateDecision::Suppress(SuppressReason::BotAuthor);
        }

        match self.reconciler.compliance(event.guild_id) {
            Some(Compliance::Compliant) => {
                self.requested.remove(&event.guild_id);
                GateDecision::Admit
            }
            Some(Compliance::NonCompliant) => {
                self.requested.remove(&event.guild_id);
                GateDecision::Suppress(SuppressReason::NonCompliant)
            }
            None if self.reconciler.has_departed(event.guild_id) => {
                debug!(guild_id = %event.guild_id, "Event for departed guild");
                GateDecision::Suppress(SuppressReason::UnknownGuild)
            }
            None => {
                if self.requested.insert(event.guild_id, ()).is_none() {
                    debug!(guild_id = %event.guild_id, "Requesting check for unknown guild");
                    if self.checks.send(event.guild_id).is_err() {
                        debug!("Check receiver dropped");
                    }
                }
                GateDecision::Suppress(SuppressReason::UnknownGuild)
            }
        }
    }

    /// Drop the pending check marker so a rejoin requests a fresh check.
    pub fn forget(&self, guild_id: GuildId) {
        self.requested.remove(&guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_reconciler::ReconcilerConfig;
    use warden_remediation::SandboxRemediationApi;
    use warden_types::{ChannelId, EventPayload, MessageId, UserId};

    const GUILD: GuildId = GuildId::new(100);

    fn message() -> GatewayEvent {
        GatewayEvent::new(
            GUILD,
            UserId::new(3),
            EventPayload::MessageCreated {
                channel_id: ChannelId::new(1),
                message_id: MessageId::new(2),
                content: "hello".into(),
                mention_count: 0,
            },
        )
    }

    fn gate() -> (
        EventGate,
        Arc<SandboxRemediationApi>,
        Arc<RoleReconciler>,
        mpsc::UnboundedReceiver<GuildId>,
    ) {
        let sandbox = Arc::new(SandboxRemediationApi::new(UserId::new(1)));
        let reconciler = Arc::new(RoleReconciler::new(sandbox.clone(), ReconcilerConfig::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (EventGate::new(reconciler.clone(), tx), sandbox, reconciler, rx)
    }

    #[tokio::test]
    async fn test_unknown_guild_fails_closed_and_requests_one_check() {
        let (gate, sandbox, reconciler, mut rx) = gate();

        assert_eq!(gate.admit(&message()), GateDecision::Suppress(SuppressReason::UnknownGuild));
        assert_eq!(gate.admit(&message()), GateDecision::Suppress(SuppressReason::UnknownGuild));
        assert_eq!(rx.try_recv().unwrap(), GUILD);
        assert!(rx.try_recv().is_err());

        sandbox.add_guild(GUILD, UserId::new(2));
        reconciler.check_and_setup(GUILD).await.unwrap();
        assert_eq!(gate.admit(&message()), GateDecision::Admit);
    }

    #[tokio::test]
    async fn test_non_compliant_guild_is_suppressed() {
        let (gate, sandbox, reconciler, _rx) = gate();
        sandbox.add_guild(GUILD, UserId::new(2));
        sandbox.add_role(GUILD, "Admin", 2);
        reconciler.check_and_setup(GUILD).await.unwrap();

        assert_eq!(gate.admit(&message()), GateDecision::Suppress(SuppressReason::NonCompliant));
    }

    #[tokio::test]
    async fn test_departed_guild_requests_no_check() {
        let (gate, sandbox, reconciler, mut rx) = gate();
        sandbox.add_guild(GUILD, UserId::new(2));
        reconciler.check_and_setup(GUILD).await.unwrap();
        reconciler.forget(GUILD).await;
        gate.forget(GUILD);

        assert_eq!(gate.admit(&message()), GateDecision::Suppress(SuppressReason::UnknownGuild));
        assert!(rx.try_recv().is_err());

        reconciler.register(GUILD);
        assert_eq!(gate.admit(&message()), GateDecision::Suppress(SuppressReason::UnknownGuild));
        assert_eq!(rx.try_recv().unwrap(), GUILD);
    }

    #[test]
    fn test_lifecycle_and_bot_events() {
        let (gate, _sandbox, _reconciler, mut rx) = gate();

        let joined = GatewayEvent::lifecycle(GUILD, EventPayload::GuildJoined);
        assert_eq!(gate.admit(&joined), GateDecision::Admit);

        let from_bot = message().from_bot();
        assert_eq!(gate.admit(&from_bot), GateDecision::Suppress(SuppressReason::BotAuthor));
        assert!(rx.try_recv().is_err());
    }
}
