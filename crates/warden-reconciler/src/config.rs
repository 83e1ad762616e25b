//! Reserved names, presence templates and the setup instructions.

use serde::{Deserialize, Serialize};
use warden_remediation::{NewRole, PermissionIssue, Permissions, Presence, PresenceStatus};
use warden_types::UserId;

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Name shown in instructions
    pub product_name: String,

    /// Reserved setup category, created at position 0
    pub category_name: String,

    /// Reserved setup text channel inside the category
    pub channel_name: String,

    /// Decorative role granted to the bot once compliant
    pub managed_role_name: String,

    /// RGB color of the managed role
    pub managed_role_color: u32,

    /// Normal presence; `{server_count}` is substituted
    pub status_template: String,

    /// Presence while any guild is non-compliant
    pub degraded_status: String,

    /// Sweep interval in seconds
    pub check_interval_secs: u64,

    /// How far back to look for previously posted instructions
    pub message_scan_limit: usize,

    /// Permission failures kept per guild for the instructions
    pub max_permission_issues: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            product_name: "Warden".to_string(),
            category_name: "⚠️ Warden Setup Required".to_string(),
            channel_name: "bot-setup-help".to_string(),
            managed_role_name: "Warden.xyz".to_string(),
            managed_role_color: 0x1E90FF,
            status_template: "Watching {server_count} servers".to_string(),
            degraded_status: "⚠️ Role not at top | Check #bot-setup-help".to_string(),
            check_interval_secs: 300,
            message_scan_limit: 10,
            max_permission_issues: 10,
        }
    }
}

impl ReconcilerConfig {
    pub fn managed_role(&self) -> NewRole {
        NewRole {
            name: self.managed_role_name.clone(),
            color: self.managed_role_color,
            hoist: true,
            mentionable: true,
            permissions: Permissions::NONE,
        }
    }

    pub fn normal_presence(&self, server_count: usize) -> Presence {
        Presence::new(
            PresenceStatus::Online,
            self.status_template
                .replace("{server_count}", &server_count.to_string()),
        )
    }

    pub fn degraded_presence(&self) -> Presence {
        Presence::new(PresenceStatus::DoNotDisturb, self.degraded_status.clone())
    }

    /// Setup instructions for a non-compliant guild.
    pub fn instructions(&self, owner: Option<UserId>, issues: &[PermissionIssue]) -> String {
        let product = &self.product_name;
        let minutes = (self.check_interval_secs / 60).max(1);
        let mut text = String::new();

        if let Some(owner) = owner {
            text.push_str(&owner.mention());
            text.push(' ');
        }
        text.push_str(&format!("**URGENT: {product} Bot Setup Required**\n\n"));
        text.push_str(&format!(
            "**🚨 PROBLEM:** The {product} bot's role is NOT at the top of the role hierarchy.\n"
        ));
        text.push_str("**📊 STATUS:** ❌ **BOT FUNCTIONS ARE DISABLED** ❌\n\n");
        text.push_str("**🔧 SOLUTION REQUIRED:**\n");
        text.push_str("1. Go to **Server Settings** → **Roles**\n");
        text.push_str(&format!(
            "2. Find the role named `{product}` (this is the bot's role)\n"
        ));
        text.push_str("3. **DRAG THIS ROLE TO THE VERY TOP** of the roles list\n");
        text.push_str("4. Make sure the role has **'Manage Roles'** permission enabled\n");
        text.push_str("5. Save changes\n\n");

        if !issues.is_empty() {
            text.push_str("**⛔ RECENT PERMISSION FAILURES:**\n");
            for issue in issues {
                text.push_str(&format!("• `{}`: {}\n", issue.action, issue.detail));
            }
            text.push('\n');
        }

        text.push_str("**⚡ AUTOMATIC FIX:** Once you move the bot role to the top:\n");
        text.push_str("• This channel will be automatically deleted\n");
        text.push_str("• Bot will change status to normal\n");
        text.push_str("• All bot features will be unlocked\n");
        text.push_str(&format!(
            "• {} role will be created automatically\n\n",
            self.managed_role_name
        ));
        text.push_str(&format!(
            "**🔁 MONITORING:** The bot checks every {minutes} minutes. If the role is moved down again, this channel will reappear.\n\n"
        ));
        text.push_str("*This is a safety feature to ensure the bot can function properly.*");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_types::{ActionKind, GuildId};

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.check_interval_secs, 300);
        assert_eq!(config.channel_name, "bot-setup-help");
        let role = config.managed_role();
        assert!(role.hoist && role.mentionable);
        assert!(role.permissions.is_empty());
    }

    #[test]
    fn test_presence_templates() {
        let config = ReconcilerConfig::default();
        let normal = config.normal_presence(12);
        assert_eq!(normal.status, PresenceStatus::Online);
        assert_eq!(normal.activity, "Watching 12 servers");
        assert_eq!(config.degraded_presence().status, PresenceStatus::DoNotDisturb);
    }

    #[test]
    fn test_instructions_mention_owner_and_issues() {
        let config = ReconcilerConfig::default();
        let plain = config.instructions(None, &[]);
        assert!(plain.starts_with("**URGENT: Warden Bot Setup Required**"));
        assert!(plain.contains("every 5 minutes"));
        assert!(!plain.contains("PERMISSION FAILURES"));

        let issue = PermissionIssue {
            guild_id: GuildId::new(1),
            action: ActionKind::Kick,
            detail: "Missing permission: kick members".into(),
            observed_at: Utc::now(),
        };
        let text = config.instructions(Some(UserId::new(9)), &[issue]);
        assert!(text.starts_with("<@9> **URGENT"));
        assert!(text.contains("• `kick`: Missing permission: kick members"));
    }
}
