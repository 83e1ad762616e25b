//! Strongly-typed identifiers
//!
//! Platform entities are addressed by 64-bit snowflakes; rules are addressed
//! by UUID. All of them are wrapped in newtypes so a channel id can never be
//! passed where a role id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

snowflake_id!(
    /// Identifier of a guild (community workspace)
    GuildId,
    "guild"
);
snowflake_id!(
    /// Identifier of a user or member
    UserId,
    "user"
);
snowflake_id!(
    /// Identifier of a channel or category
    ChannelId,
    "channel"
);
snowflake_id!(
    /// Identifier of a message
    MessageId,
    "message"
);
snowflake_id!(
    /// Identifier of a role
    RoleId,
    "role"
);

impl UserId {
    /// Mention markup for this user.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

/// Unique identifier for a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(Uuid);

impl RuleId {
    /// Fixed id of the synthetic classifier rule.
    pub const CLASSIFIER: RuleId =
        RuleId(Uuid::from_u128(0xc1a5_51f1_e000_4000_8000_0000_0000_0001));

    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_display_and_serde() {
        let id = GuildId::new(42);
        assert_eq!(id.to_string(), "guild:42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: GuildId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_mention() {
        assert_eq!(UserId::new(7).mention(), "<@7>");
    }

    #[test]
    fn test_rule_ids_order_by_uuid() {
        let a = RuleId::from_uuid(Uuid::from_u128(1));
        let b = RuleId::from_uuid(Uuid::from_u128(2));
        assert!(a < b);
    }
}
