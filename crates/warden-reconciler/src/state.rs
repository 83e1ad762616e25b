//! Per-guild reconciliation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use warden_types::{ChannelId, GuildId, RoleId};

/// Whether the bot's managed role sits at the top of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compliance {
    Compliant,
    NonCompliant,
}

impl Compliance {
    pub fn is_compliant(self) -> bool {
        matches!(self, Compliance::Compliant)
    }
}

impl fmt::Display for Compliance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compliance::Compliant => f.write_str("compliant"),
            Compliance::NonCompliant => f.write_str("non-compliant"),
        }
    }
}

/// Last observed state of one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerState {
    pub compliance: Compliance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_role_id: Option<RoleId>,
    pub last_checked: DateTime<Utc>,
}

impl ReconcilerState {
    pub fn new(compliance: Compliance) -> Self {
        Self {
            compliance,
            category_id: None,
            channel_id: None,
            managed_role_id: None,
            last_checked: Utc::now(),
        }
    }
}

/// Outcome of a sweep over all known guilds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub compliant: Vec<GuildId>,
    pub non_compliant: Vec<GuildId>,
    pub failed: Vec<(GuildId, String)>,
}

impl SweepReport {
    pub fn checked(&self) -> usize {
        self.compliant.len() + self.non_compliant.len() + self.failed.len()
    }
}
