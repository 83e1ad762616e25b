//! Role hierarchy reconciliation.
//!
//! The bot can only moderate members whose roles rank below its own, so every
//! guild is checked for "is the bot's managed role at the top". A guild that
//! fails the check gets a private setup channel with instructions and has its
//! events suppressed; once fixed, the channel is removed and a decorative
//! role is granted to the bot. Checks for one guild never overlap.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use warden_remediation::{
    ChannelInfo, ChannelKind, OverwriteTarget, PermissionIssue, PermissionOverwrite, Permissions,
    Presence, RemediationApi, RoleInfo,
};
use warden_types::{ChannelId, GuildId, RoleId, UserId};

use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::state::{Compliance, ReconcilerState, SweepReport};

/// Compliance of a guild from its roles and the roles the bot holds.
///
/// Compliant when the highest managed role held by the bot is the highest
/// role in the guild. Holding no managed role is non-compliant.
pub fn assess(guild_id: GuildId, roles: &[RoleInfo], held: &[RoleId]) -> Compliance {
    let top = roles
        .iter()
        .filter(|role| !role.is_everyone(guild_id))
        .map(|role| role.position)
        .max();
    let ours = roles
        .iter()
        .filter(|role| role.managed && held.contains(&role.id))
        .map(|role| role.position)
        .max();

    match (ours, top) {
        (Some(ours), Some(top)) if ours >= top => Compliance::Compliant,
        _ => Compliance::NonCompliant,
    }
}

/// Converges each known guild toward a compliant hierarchy.
#[derive(Debug)]
pub struct RoleReconciler {
    api: Arc<dyn RemediationApi>,
    config: ReconcilerConfig,
    states: DashMap<GuildId, ReconcilerState>,
    /// Known guilds, each with the lock serializing its checks
    gates: DashMap<GuildId, Arc<Mutex<()>>>,
    issues: DashMap<GuildId, VecDeque<PermissionIssue>>,
    /// Guilds the bot left. Only `register` brings them back.
    departed: DashMap<GuildId, ()>,
    presence: Mutex<Option<Presence>>,
}

impl RoleReconciler {
    pub fn new(api: Arc<dyn RemediationApi>, config: ReconcilerConfig) -> Self {
        Self {
            api,
            config,
            states: DashMap::new(),
            gates: DashMap::new(),
            issues: DashMap::new(),
            departed: DashMap::new(),
            presence: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Start tracking a guild. Returns false if it was already known.
    pub fn register(&self, guild_id: GuildId) -> bool {
        self.departed.remove(&guild_id);
        let mut inserted = false;
        self.gates.entry(guild_id).or_insert_with(|| {
            inserted = true;
            Arc::new(Mutex::new(()))
        });
        inserted
    }

    /// Stop tracking a guild and drop everything recorded for it. Later
    /// checks are refused until the guild is registered again.
    #[instrument(skip(self), fields(guild_id = %guild_id))]
    pub async fn forget(&self, guild_id: GuildId) {
        self.departed.insert(guild_id, ());
        self.gates.remove(&guild_id);
        self.states.remove(&guild_id);
        self.issues.remove(&guild_id);
        info!("Guild forgotten");
        self.refresh_presence().await;
    }

    pub fn is_known(&self, guild_id: GuildId) -> bool {
        self.gates.contains_key(&guild_id)
    }

    pub fn has_departed(&self, guild_id: GuildId) -> bool {
        self.departed.contains_key(&guild_id)
    }

    pub fn known_guilds(&self) -> Vec<GuildId> {
        let mut guilds: Vec<GuildId> = self.gates.iter().map(|entry| *entry.key()).collect();
        guilds.sort();
        guilds
    }

    /// Last established compliance, `None` before the first check.
    pub fn compliance(&self, guild_id: GuildId) -> Option<Compliance> {
        self.states.get(&guild_id).map(|state| state.compliance)
    }

    pub fn state(&self, guild_id: GuildId) -> Option<ReconcilerState> {
        self.states.get(&guild_id).map(|state| state.clone())
    }

    /// Remember a permission failure so the setup instructions can show it.
    pub fn report_permission_issue(&self, issue: PermissionIssue) {
        warn!(
            guild_id = %issue.guild_id,
            action = %issue.action,
            detail = %issue.detail,
            "Permission failure reported"
        );
        let max = self.config.max_permission_issues.max(1);
        let mut issues = self.issues.entry(issue.guild_id).or_default();
        issues.retain(|known| !(known.action == issue.action && known.detail == issue.detail));
        issues.push_back(issue);
        while issues.len() > max {
            issues.pop_front();
        }
    }

    pub fn permission_issues(&self, guild_id: GuildId) -> Vec<PermissionIssue> {
        self.issues
            .get(&guild_id)
            .map(|issues| issues.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check one guild and converge it; registers the guild if unknown,
    /// unless the bot has left it.
    #[instrument(skip(self), fields(guild_id = %guild_id))]
    pub async fn check_and_setup(&self, guild_id: GuildId) -> ReconcileResult<Compliance> {
        if self.has_departed(guild_id) {
            return Err(ReconcileError::Departed(guild_id));
        }
        let gate = self
            .gates
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // `forget` marks the guild before dropping its gate, so a racing
        // leave is seen here and the gate just inserted is withdrawn.
        if self.has_departed(guild_id) {
            self.gates.remove_if(&guild_id, |_, known| Arc::ptr_eq(known, &gate));
            return Err(ReconcileError::Departed(guild_id));
        }
        let _guard = gate.lock().await;

        let result = self.reconcile(guild_id).await;
        self.refresh_presence().await;
        result
    }

    /// Check every known guild. One guild's failure does not affect the rest.
    pub async fn sweep(&self) -> SweepReport {
        let guilds = self.known_guilds();
        debug!(guilds = guilds.len(), "Sweeping guilds");

        let results = futures::future::join_all(
            guilds
                .iter()
                .map(|guild_id| async move { (*guild_id, self.check_and_setup(*guild_id).await) }),
        )
        .await;

        let mut report = SweepReport::default();
        for (guild_id, result) in results {
            match result {
                Ok(Compliance::Compliant) => report.compliant.push(guild_id),
                Ok(Compliance::NonCompliant) => report.non_compliant.push(guild_id),
                Err(e) => {
                    warn!(guild_id = %guild_id, error = %e, "Guild check failed");
                    report.failed.push((guild_id, e.to_string()));
                }
            }
        }
        report
    }

    async fn reconcile(&self, guild_id: GuildId) -> ReconcileResult<Compliance> {
        let bot = self
            .api
            .current_user()
            .await
            .map_err(ReconcileError::at("current_user"))?;
        let roles = self
            .api
            .roles(guild_id)
            .await
            .map_err(ReconcileError::at("roles"))?;
        let held = self
            .api
            .member_roles(guild_id, bot)
            .await
            .map_err(ReconcileError::at("member_roles"))?;

        let compliance = assess(guild_id, &roles, &held);
        let mut state = ReconcilerState::new(compliance);

        let outcome = match compliance {
            Compliance::NonCompliant => self.ensure_setup_channel(guild_id, bot, &mut state).await,
            Compliance::Compliant => {
                let removed = self.remove_setup_channel(guild_id).await;
                let role = self
                    .ensure_managed_role(guild_id, bot, &roles, &held, &mut state)
                    .await;
                removed.and(role)
            }
        };

        if compliance.is_compliant() {
            if let Some((_, issues)) = self.issues.remove(&guild_id) {
                warn!(
                    count = issues.len(),
                    "Dropping permission failures recorded while the hierarchy is correct"
                );
            }
        }

        let previous = self.compliance(guild_id);
        self.record(guild_id, state);
        if previous != Some(compliance) {
            match compliance {
                Compliance::Compliant => info!("Bot role is at the top, features enabled"),
                Compliance::NonCompliant => warn!("Bot role is not at the top, features disabled"),
            }
        }

        outcome.map(|()| compliance)
    }

    /// Store the state unless the guild was forgotten mid-check.
    fn record(&self, guild_id: GuildId, state: ReconcilerState) {
        if self.gates.contains_key(&guild_id) {
            self.states.insert(guild_id, state);
        }
    }

    async fn ensure_setup_channel(
        &self,
        guild_id: GuildId,
        bot: UserId,
        state: &mut ReconcilerState,
    ) -> ReconcileResult<()> {
        let channels = self
            .api
            .channels(guild_id)
            .await
            .map_err(ReconcileError::at("channels"))?;

        let category = match find_channel(&channels, ChannelKind::Category, &self.config.category_name) {
            Some(category) => category.clone(),
            None => {
                let category = self
                    .api
                    .create_category(guild_id, &self.config.category_name, 0)
                    .await
                    .map_err(ReconcileError::at("create_category"))?;
                info!(channel_id = %category.id, "Created setup category");
                category
            }
        };
        state.category_id = Some(category.id);

        let channel = match find_channel(&channels, ChannelKind::Text, &self.config.channel_name) {
            Some(channel) => channel.clone(),
            None => {
                let channel = self
                    .api
                    .create_text_channel(guild_id, &self.config.channel_name, Some(category.id))
                    .await
                    .map_err(ReconcileError::at("create_text_channel"))?;
                let owner = self
                    .api
                    .guild_owner(guild_id)
                    .await
                    .map_err(ReconcileError::at("guild_owner"))?;
                self.api
                    .set_channel_overwrites(guild_id, channel.id, &setup_overwrites(guild_id, bot, owner))
                    .await
                    .map_err(ReconcileError::at("set_channel_overwrites"))?;
                info!(channel_id = %channel.id, "Created setup channel");
                channel
            }
        };
        state.channel_id = Some(channel.id);

        self.post_instructions(guild_id, bot, channel.id).await
    }

    /// Replace this process's messages in the setup channel with current
    /// instructions, unless exactly those instructions are already there.
    async fn post_instructions(
        &self,
        guild_id: GuildId,
        bot: UserId,
        channel_id: ChannelId,
    ) -> ReconcileResult<()> {
        let owner = self
            .api
            .guild_owner(guild_id)
            .await
            .map_err(ReconcileError::at("guild_owner"))?;
        let issues = self.permission_issues(guild_id);
        let wanted = self.config.instructions(Some(owner), &issues);

        let recent = self
            .api
            .recent_messages(guild_id, channel_id, self.config.message_scan_limit)
            .await
            .map_err(ReconcileError::at("recent_messages"))?;
        let ours: Vec<_> = recent.iter().filter(|message| message.author_id == bot).collect();

        if let [only] = ours.as_slice() {
            if only.content == wanted {
                debug!("Setup instructions already current");
                return Ok(());
            }
        }

        for message in ours {
            match self.api.delete_message(guild_id, channel_id, message.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(ReconcileError::at("delete_message")(e)),
            }
        }

        self.api
            .send_message(guild_id, channel_id, &wanted)
            .await
            .map_err(ReconcileError::at("send_message"))?;
        debug!("Posted setup instructions");
        Ok(())
    }

    async fn remove_setup_channel(&self, guild_id: GuildId) -> ReconcileResult<()> {
        let channels = self
            .api
            .channels(guild_id)
            .await
            .map_err(ReconcileError::at("channels"))?;
        // Earlier failed checks may have left more than one category behind.
        let categories: Vec<ChannelId> = channels
            .iter()
            .filter(|channel| {
                channel.kind == ChannelKind::Category
                    && channel.name.eq_ignore_ascii_case(&self.config.category_name)
            })
            .map(|channel| channel.id)
            .collect();

        let mut doomed: Vec<ChannelId> = channels
            .iter()
            .filter(|channel| {
                let in_category = channel
                    .parent_id
                    .is_some_and(|parent| categories.contains(&parent));
                let stray = channel.kind == ChannelKind::Text
                    && channel.name.eq_ignore_ascii_case(&self.config.channel_name);
                in_category || stray
            })
            .map(|channel| channel.id)
            .collect();
        // Children first, the categories last.
        doomed.extend(categories);

        if doomed.is_empty() {
            return Ok(());
        }

        for channel_id in doomed {
            match self.api.delete_channel(guild_id, channel_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(ReconcileError::at("delete_channel")(e)),
            }
        }
        info!("Removed setup category and channels");
        Ok(())
    }

    async fn ensure_managed_role(
        &self,
        guild_id: GuildId,
        bot: UserId,
        roles: &[RoleInfo],
        held: &[RoleId],
        state: &mut ReconcilerState,
    ) -> ReconcileResult<()> {
        let wanted = self.config.managed_role();
        let existing = roles
            .iter()
            .find(|role| !role.is_everyone(guild_id) && role.name.eq_ignore_ascii_case(&wanted.name));

        let role_id = match existing {
            Some(role) => {
                if !wanted.matches(role) {
                    match self.api.modify_role(guild_id, role.id, &wanted).await {
                        Ok(_) => debug!(role_id = %role.id, "Updated managed role settings"),
                        Err(e) => warn!(role_id = %role.id, error = %e, "Cannot update managed role"),
                    }
                }
                self.position_below_bot(guild_id, roles, held, role.id).await;
                role.id
            }
            None => {
                let created = self
                    .api
                    .create_role(guild_id, &wanted)
                    .await
                    .map_err(ReconcileError::at("create_role"))?;
                info!(role_id = %created.id, "Created managed role");
                // Creating a role shifts positions, so read them again.
                match self.api.roles(guild_id).await {
                    Ok(fresh) => self.position_below_bot(guild_id, &fresh, held, created.id).await,
                    Err(e) => warn!(error = %e, "Cannot read roles to position managed role"),
                }
                created.id
            }
        };
        state.managed_role_id = Some(role_id);

        if !held.contains(&role_id) {
            self.api
                .add_member_role(guild_id, bot, role_id)
                .await
                .map_err(ReconcileError::at("grant_managed_role"))?;
            debug!(role_id = %role_id, "Granted managed role to bot");
        }
        Ok(())
    }

    /// Keep the managed role directly under the bot's highest other role.
    /// Best effort.
    async fn position_below_bot(
        &self,
        guild_id: GuildId,
        roles: &[RoleInfo],
        held: &[RoleId],
        role_id: RoleId,
    ) {
        let Some(bot_top) = roles
            .iter()
            .filter(|role| role.id != role_id && held.contains(&role.id))
            .map(|role| role.position)
            .max()
        else {
            return;
        };
        let Some(current) = roles.iter().find(|role| role.id == role_id).map(|role| role.position)
        else {
            return;
        };
        let target = (bot_top - 1).max(1);
        if current == target {
            return;
        }

        match self.api.modify_role_position(guild_id, role_id, target).await {
            Ok(()) => debug!(from = current, position = target, "Positioned managed role"),
            Err(e) => warn!(error = %e, "Cannot position managed role, leaving it in place"),
        }
    }

    /// Push the process-wide presence if it changed.
    async fn refresh_presence(&self) {
        let mut current = self.presence.lock().await;
        let degraded = self
            .states
            .iter()
            .any(|state| state.compliance == Compliance::NonCompliant);
        let wanted = if degraded {
            self.config.degraded_presence()
        } else {
            self.config.normal_presence(self.gates.len())
        };

        if current.as_ref() == Some(&wanted) {
            return;
        }
        match self.api.update_presence(&wanted).await {
            Ok(()) => {
                debug!(status = ?wanted.status, activity = %wanted.activity, "Presence updated");
                *current = Some(wanted);
            }
            Err(e) => warn!(error = %e, "Presence update failed"),
        }
    }
}

fn find_channel<'a>(channels: &'a [ChannelInfo], kind: ChannelKind, name: &str) -> Option<&'a ChannelInfo> {
    channels
        .iter()
        .find(|channel| channel.kind == kind && channel.name.eq_ignore_ascii_case(name))
}

/// Hidden from `@everyone`, open to the bot and the guild owner.
fn setup_overwrites(guild_id: GuildId, bot: UserId, owner: UserId) -> [PermissionOverwrite; 3] {
    let access = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES | Permissions::READ_MESSAGE_HISTORY;
    [
        PermissionOverwrite::deny(
            OverwriteTarget::Role(RoleId::new(guild_id.get())),
            Permissions::VIEW_CHANNEL,
        ),
        PermissionOverwrite::allow(OverwriteTarget::Member(bot), access),
        PermissionOverwrite::allow(OverwriteTarget::Member(owner), access),
    ]
}
