//! Rule evaluation
//!
//! Given an event and an immutable configuration snapshot, select at most one
//! action. Candidates are visited in ascending `(priority, id)` order and the
//! first rule whose predicate matches and whose cooldown has elapsed wins.
//!
//! Each event maps to exactly one trigger scope, so first match per event and
//! first match per scope are the same policy. The classifier belongs to the
//! content scope as a sentinel-priority rule: it is consulted only after every
//! configured content rule has declined, and at most once per evaluation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use warden_types::{
    modules, CooldownKey, EventPayload, GatewayEvent, GuildConfig, Rule, RuleId, SelectedAction,
    Trigger, TriggerKind,
};

use crate::classifier::Classifier;
use crate::cooldown::CooldownStore;

/// Default bound on a single classifier call
pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(10);

/// Trigger kinds evaluated against message text.
pub const CONTENT_SCOPE: &[TriggerKind] = &[
    TriggerKind::MessageContent,
    TriggerKind::InvitePosted,
    TriggerKind::SpamDetection,
    TriggerKind::Classifier,
];

const INVITE_PREFIXES: &[&str] = &["discord.gg/", "discord.com/invite/", "discordapp.com/invite/"];

/// The trigger kinds an event can fire.
pub fn trigger_scope(event: &GatewayEvent) -> &'static [TriggerKind] {
    match &event.payload {
        EventPayload::MessageCreated { .. } => CONTENT_SCOPE,
        EventPayload::MessageUpdated {
            content,
            previous_content,
            ..
        } => {
            // Embed resolution re-delivers identical content.
            if previous_content.as_deref() == Some(content.as_str()) {
                &[]
            } else {
                CONTENT_SCOPE
            }
        }
        EventPayload::MemberJoined { .. } => &[TriggerKind::UserJoin],
        EventPayload::MemberLeft { .. } => &[TriggerKind::UserLeave],
        EventPayload::ReactionAdded { .. } => &[TriggerKind::ReactionAdded],
        EventPayload::UserUpdated {
            old_username,
            new_username,
        } if old_username != new_username => &[TriggerKind::Username],
        _ => &[],
    }
}

/// Result of an evaluation, with the visit order for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub selected: Option<SelectedAction>,
    /// Rules whose predicate was evaluated, in order
    pub visited: Vec<RuleId>,
}

/// Selects at most one action per event.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    cooldowns: Arc<dyn CooldownStore>,
    classifier: Arc<dyn Classifier>,
    classifier_timeout: Duration,
}

impl RuleEngine {
    pub fn new(cooldowns: Arc<dyn CooldownStore>, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            cooldowns,
            classifier,
            classifier_timeout: DEFAULT_CLASSIFIER_TIMEOUT,
        }
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    pub fn cooldowns(&self) -> &Arc<dyn CooldownStore> {
        &self.cooldowns
    }

    pub async fn evaluate(&self, event: &GatewayEvent, config: &GuildConfig) -> Option<SelectedAction> {
        self.evaluate_traced(event, config).await.selected
    }

    #[instrument(skip_all, fields(guild_id = %event.guild_id, event = %event.kind()))]
    pub async fn evaluate_traced(&self, event: &GatewayEvent, config: &GuildConfig) -> Evaluation {
        let mut evaluation = Evaluation::default();
        let scope = trigger_scope(event);
        if scope.is_empty() {
            return evaluation;
        }

        let sentinel = classifier_sentinel(config, scope);
        let mut candidates: Vec<&Rule> = config
            .rules
            .iter()
            .chain(sentinel.iter())
            .filter(|rule| is_candidate(rule, config, scope))
            .collect();
        candidates.sort_by(|a, b| a.evaluation_order(b));

        let mut verdict = None;
        for rule in candidates {
            evaluation.visited.push(rule.id);

            if !self.matches(rule, event, &mut verdict).await {
                continue;
            }

            if let Some(secs) = rule.cooldown_secs {
                let key = CooldownKey::new(rule.id, event.actor_id);
                if self
                    .cooldowns
                    .is_cooling_down(&key, Duration::from_secs(secs), event.received_at)
                {
                    debug!(rule_id = %rule.id, subject = %event.actor_id, "Rule matched but is cooling down");
                    continue;
                }
            }

            info!(
                rule_id = %rule.id,
                rule = %rule.name,
                action = %rule.action.kind(),
                subject = %event.actor_id,
                "Rule selected"
            );
            evaluation.selected = Some(SelectedAction::from_rule(rule, event.actor_id));
            break;
        }

        evaluation
    }

    async fn matches(&self, rule: &Rule, event: &GatewayEvent, verdict: &mut Option<bool>) -> bool {
        match (&rule.trigger, &event.payload) {
            (Trigger::MessageContent { banned_words }, _) => event
                .text()
                .is_some_and(|text| contains_any(text, banned_words)),

            (Trigger::UserJoin, EventPayload::MemberJoined { .. }) => true,
            (Trigger::UserLeave, EventPayload::MemberLeft { .. }) => true,

            (
                Trigger::ReactionAdded { emoji, message_id },
                EventPayload::ReactionAdded {
                    emoji: reacted,
                    message_id: reacted_on,
                    ..
                },
            ) => emoji == reacted && message_id.map_or(true, |id| id == *reacted_on),

            (Trigger::Username { banned_words }, EventPayload::UserUpdated { new_username, .. }) => {
                contains_any(new_username, banned_words)
            }

            (Trigger::InvitePosted { allowed_codes }, _) => event.text().is_some_and(|text| {
                invite_codes(text)
                    .iter()
                    .any(|code| !allowed_codes.iter().any(|allowed| allowed == code))
            }),

            (
                Trigger::SpamDetection {
                    max_mentions,
                    max_repeated_chars,
                },
                EventPayload::MessageCreated {
                    content,
                    mention_count,
                    ..
                }
                | EventPayload::MessageUpdated {
                    content,
                    mention_count,
                    ..
                },
            ) => {
                max_mentions.is_some_and(|max| *mention_count > max)
                    || max_repeated_chars.is_some_and(|max| longest_run(content) > max as usize)
            }

            (Trigger::Classifier, _) => {
                let Some(text) = event.text().filter(|t| !t.trim().is_empty()) else {
                    return false;
                };
                if let Some(flagged) = *verdict {
                    return flagged;
                }
                let flagged = self.classify(text).await;
                *verdict = Some(flagged);
                flagged
            }

            _ => false,
        }
    }

    /// An unavailable classifier never selects an action.
    async fn classify(&self, text: &str) -> bool {
        match tokio::time::timeout(self.classifier_timeout, self.classifier.classify(text)).await {
            Ok(Ok(verdict)) => {
                if verdict.flagged {
                    debug!(categories = ?verdict.categories, "Classifier flagged content");
                }
                verdict.flagged
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Classifier failed, treating content as not flagged");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.classifier_timeout, "Classifier timed out, treating content as not flagged");
                false
            }
        }
    }
}

fn is_candidate(rule: &Rule, config: &GuildConfig, scope: &[TriggerKind]) -> bool {
    rule.enabled
        && config.module_enabled(&rule.module)
        && !(rule.premium_only && !config.premium_tier.is_paid())
        && scope.contains(&rule.trigger_kind())
}

/// Synthetic classifier rule, when the guild opted in without an explicit one.
fn classifier_sentinel(config: &GuildConfig, scope: &[TriggerKind]) -> Option<Rule> {
    let moderation = &config.settings.moderation;
    let wanted = moderation.classifier_enabled
        && scope.contains(&TriggerKind::Classifier)
        && config.module_enabled(modules::MODERATION)
        && !config.has_rule_of_kind(TriggerKind::Classifier);
    wanted.then(|| Rule::classifier_sentinel(moderation.classifier_cooldown_secs))
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .filter(|n| !n.is_empty())
        .any(|n| haystack.contains(&n.to_lowercase()))
}

/// Invite codes linked in `text`, in order of appearance per link form.
pub fn invite_codes(text: &str) -> Vec<&str> {
    // ASCII lowering keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let mut codes = Vec::new();
    for prefix in INVITE_PREFIXES {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(prefix) {
            let start = from + pos + prefix.len();
            let end = text[start..]
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                .map_or(text.len(), |i| start + i);
            if end > start {
                codes.push(&text[start..end]);
            }
            from = start;
        }
    }
    codes
}

/// Longest run of one repeated non-whitespace character.
pub fn longest_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;
    for c in text.chars() {
        if c.is_whitespace() {
            previous = None;
            current = 0;
            continue;
        }
        if previous == Some(c) {
            current += 1;
        } else {
            previous = Some(c);
            current = 1;
        }
        longest = longest.max(current);
    }
    longest
}
