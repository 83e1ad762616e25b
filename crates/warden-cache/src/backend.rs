//! Key/value backing store for cached configuration.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CacheResult;

/// Key/value store with per-entry expiry.
///
/// Values are whole serialized documents; `set_with_ttl` replaces any
/// previous value atomically.
#[async_trait]
pub trait CacheBackend: Send + Sync + Debug {
    /// Get an unexpired value
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a value that expires after `ttl`
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Remove a value, returning whether one was present
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Instant,
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    slots: DashMap<String, Slot>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        if let Some(slot) = self.slots.get(key) {
            if slot.expires_at > now {
                return Ok(Some(slot.value.clone()));
            }
        }
        // Lazily drop the expired slot, unless a writer replaced it meanwhile.
        self.slots.remove_if(key, |_, slot| slot.expires_at <= now);
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.slots.insert(
            key.to_string(),
            Slot {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.slots.remove(key).is_some())
    }
}
