//! Per (rule, subject) cooldown bookkeeping.
//!
//! The engine only reads cooldowns. Firings are recorded through
//! [`CooldownStore::try_claim`], an atomic check-and-set per key, so two
//! near-simultaneous triggers for the same subject cannot both pass.
//! Each record keeps the cooldown it was claimed with, so pruning never
//! releases a subject that is still cooling down.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use warden_types::CooldownKey;

use crate::error::CooldownActive;

/// Persisted form of one cooldown record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub key: CooldownKey,
    pub last_fired: DateTime<Utc>,
    /// Cooldown in force when the record was claimed
    #[serde(default)]
    pub cooldown_secs: u64,
}

impl CooldownEntry {
    /// When the subject stops cooling down.
    pub fn expires_at(&self) -> DateTime<Utc> {
        expiry(self.last_fired, Duration::from_secs(self.cooldown_secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record {
    last_fired: DateTime<Utc>,
    cooldown: Duration,
}

impl Record {
    fn expires_at(&self) -> DateTime<Utc> {
        expiry(self.last_fired, self.cooldown)
    }
}

fn expiry(last_fired: DateTime<Utc>, cooldown: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(cooldown)
        .ok()
        .and_then(|cooldown| last_fired.checked_add_signed(cooldown))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A successful claim, needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownClaim {
    pub key: CooldownKey,
    pub fired_at: DateTime<Utc>,
    previous: Option<Record>,
}

/// Keyed last-fired timestamps.
pub trait CooldownStore: Send + Sync + Debug {
    fn last_fired(&self, key: &CooldownKey) -> Option<DateTime<Utc>>;

    /// Whether `key` fired less than `cooldown` before `now`.
    fn is_cooling_down(&self, key: &CooldownKey, cooldown: Duration, now: DateTime<Utc>) -> bool {
        self.last_fired(key)
            .and_then(|last| remaining(last, cooldown, now))
            .is_some()
    }

    /// Record a firing at `now` unless the key is still cooling down.
    fn try_claim(
        &self,
        key: CooldownKey,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<CooldownClaim, CooldownActive>;

    /// Undo a claim whose side effect failed. No-op if a later claim superseded it.
    fn rollback(&self, claim: &CooldownClaim) -> bool;

    /// Drop records whose cooldown ended before `older_than`. A record still
    /// cooling down is never dropped. Returns how many were dropped.
    fn prune(&self, older_than: DateTime<Utc>) -> usize;

    fn snapshot(&self) -> Vec<CooldownEntry>;

    /// Merge persisted records, keeping the newer timestamp per key.
    fn restore(&self, entries: Vec<CooldownEntry>);
}

/// Time left on a cooldown, or `None` once it has elapsed.
///
/// A zero cooldown never suppresses.
pub fn remaining(last: DateTime<Utc>, cooldown: Duration, now: DateTime<Utc>) -> Option<Duration> {
    if cooldown.is_zero() {
        return None;
    }
    // Clock skew can put `now` before `last`; treat that as no time elapsed.
    let elapsed = now
        .signed_duration_since(last)
        .to_std()
        .unwrap_or(Duration::ZERO);
    cooldown.checked_sub(elapsed).filter(|left| !left.is_zero())
}

/// In-process cooldown store.
#[derive(Debug, Default)]
pub struct InMemoryCooldownStore {
    entries: DashMap<CooldownKey, Record>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CooldownStore for InMemoryCooldownStore {
    fn last_fired(&self, key: &CooldownKey) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|record| record.last_fired)
    }

    fn try_claim(
        &self,
        key: CooldownKey,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<CooldownClaim, CooldownActive> {
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                let previous = *entry.get();
                if let Some(remaining) = remaining(previous.last_fired, cooldown, now) {
                    return Err(CooldownActive { key, remaining });
                }
                let fired_at = now.max(previous.last_fired);
                entry.insert(Record {
                    last_fired: fired_at,
                    cooldown,
                });
                Ok(CooldownClaim {
                    key,
                    fired_at,
                    previous: Some(previous),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(Record {
                    last_fired: now,
                    cooldown,
                });
                Ok(CooldownClaim {
                    key,
                    fired_at: now,
                    previous: None,
                })
            }
        }
    }

    fn rollback(&self, claim: &CooldownClaim) -> bool {
        match self.entries.entry(claim.key) {
            Entry::Occupied(mut entry) if entry.get().last_fired == claim.fired_at => {
                match claim.previous {
                    Some(previous) => {
                        entry.insert(previous);
                    }
                    None => {
                        entry.remove();
                    }
                }
                true
            }
            _ => false,
        }
    }

    fn prune(&self, older_than: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, record| record.expires_at() >= older_than);
        before.saturating_sub(self.entries.len())
    }

    fn snapshot(&self) -> Vec<CooldownEntry> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| CooldownEntry {
                key: *entry.key(),
                last_fired: entry.last_fired,
                cooldown_secs: entry.cooldown.as_secs(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    fn restore(&self, entries: Vec<CooldownEntry>) {
        for entry in entries {
            let record = Record {
                last_fired: entry.last_fired,
                cooldown: Duration::from_secs(entry.cooldown_secs),
            };
            self.entries
                .entry(entry.key)
                .and_modify(|current| {
                    if record.last_fired > current.last_fired {
                        *current = record;
                    }
                })
                .or_insert(record);
        }
    }
}
