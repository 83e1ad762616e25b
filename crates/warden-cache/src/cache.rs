//! Cache-aside configuration cache.
//!
//! Reads go to the backend first; a miss fetches from the store, writes the
//! whole configuration back with a TTL and returns it. Concurrent misses for
//! one guild share a single fetch. `invalidate` bumps a per-guild generation
//! so a fetch that started before the invalidation can never repopulate the
//! entry with what it read.

use chrono::Utc;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use warden_types::{GuildConfig, GuildId};

use crate::backend::CacheBackend;
use crate::error::{CacheError, CacheResult, StoreError};
use crate::store::ConfigStore;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Default bound on a single store fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Cache key for a guild's configuration
pub fn cache_key(guild_id: GuildId) -> String {
    format!("guild:{}:config", guild_id.get())
}

/// Why a lookup produced no configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    NotFound,
    StoreUnavailable(String),
    Invalid(String),
    Timeout,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::NotFound => f.write_str("not found"),
            MissReason::StoreUnavailable(e) => write!(f, "store unavailable: {}", e),
            MissReason::Invalid(e) => write!(f, "invalid configuration: {}", e),
            MissReason::Timeout => f.write_str("store fetch timed out"),
        }
    }
}

/// Result of [`ConfigCache::get`].
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Arc<GuildConfig>),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    /// The configuration, or the fail-closed disabled configuration on a miss.
    pub fn config_or_disabled(self, guild_id: GuildId) -> Arc<GuildConfig> {
        match self {
            CacheLookup::Hit(config) => config,
            CacheLookup::Miss(_) => Arc::new(GuildConfig::disabled(guild_id)),
        }
    }
}

/// Cache tuning
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, CacheLookup>>;

struct InFlight {
    ticket: u64,
    fetch: SharedFetch,
}

struct Inner {
    backend: Arc<dyn CacheBackend>,
    store: Arc<dyn ConfigStore>,
    config: CacheConfig,
    inflight: DashMap<GuildId, InFlight>,
    generations: DashMap<GuildId, u64>,
    tickets: AtomicU64,
}

/// Cache-aside layer over guild configuration.
#[derive(Clone)]
pub struct ConfigCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConfigCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigCache")
            .field("backend", &self.inner.backend)
            .field("store", &self.inner.store)
            .field("config", &self.inner.config)
            .field("inflight", &self.inner.inflight.len())
            .finish()
    }
}

impl ConfigCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        store: Arc<dyn ConfigStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                config,
                inflight: DashMap::new(),
                generations: DashMap::new(),
                tickets: AtomicU64::new(0),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.config.ttl
    }

    /// Cached configuration, fetching from the store on a miss.
    #[instrument(skip(self), fields(guild_id = %guild_id))]
    pub async fn get(&self, guild_id: GuildId) -> CacheLookup {
        match self.cached(guild_id).await {
            Ok(Some(config)) => return CacheLookup::Hit(config),
            Ok(None) => {}
            Err(CacheError::Corrupt { key, reason }) => {
                warn!(key = %key, reason = %reason, "Discarding corrupt cache entry");
                if let Err(e) = self.inner.backend.delete(&key).await {
                    warn!(error = %e, "Failed to delete corrupt cache entry");
                }
            }
            Err(e) => {
                warn!(error = %e, "Cache read failed, falling through to store");
            }
        }

        self.join_fetch(guild_id).await
    }

    /// Read the cache without touching the store.
    pub async fn cached(&self, guild_id: GuildId) -> CacheResult<Option<Arc<GuildConfig>>> {
        let key = cache_key(guild_id);
        let Some(raw) = self.inner.backend.get(&key).await? else {
            return Ok(None);
        };
        let config: GuildConfig = serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
            key,
            reason: e.to_string(),
        })?;
        Ok(Some(Arc::new(config)))
    }

    /// Overwrite the entry with a whole new configuration.
    pub async fn put(
        &self,
        guild_id: GuildId,
        mut config: GuildConfig,
        ttl: Duration,
    ) -> CacheResult<Arc<GuildConfig>> {
        config.cache_expiry = chrono::Duration::from_std(ttl)
            .ok()
            .map(|ttl| Utc::now() + ttl);

        let raw = serde_json::to_string(&config)?;
        self.inner
            .backend
            .set_with_ttl(&cache_key(guild_id), raw, ttl)
            .await?;
        Ok(Arc::new(config))
    }

    /// Drop the entry and fence any fetch already in flight for it.
    #[instrument(skip(self), fields(guild_id = %guild_id))]
    pub async fn invalidate(&self, guild_id: GuildId) -> CacheResult<()> {
        *self.inner.generations.entry(guild_id).or_insert(0) += 1;
        self.inner.inflight.remove(&guild_id);
        let removed = self.inner.backend.delete(&cache_key(guild_id)).await?;
        info!(removed = removed, "Invalidated cached configuration");
        Ok(())
    }

    fn generation(&self, guild_id: GuildId) -> u64 {
        self.inner
            .generations
            .get(&guild_id)
            .map(|g| *g)
            .unwrap_or(0)
    }

    async fn join_fetch(&self, guild_id: GuildId) -> CacheLookup {
        let fetch = match self.inner.inflight.entry(guild_id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                debug!("Joining in-flight fetch");
                entry.get().fetch.clone()
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let ticket = self.inner.tickets.fetch_add(1, Ordering::Relaxed);
                let generation = self.generation(guild_id);
                let fetch = self
                    .clone()
                    .fetch_and_populate(guild_id, generation, ticket)
                    .boxed()
                    .shared();
                entry.insert(InFlight {
                    ticket,
                    fetch: fetch.clone(),
                });
                fetch
            }
        };
        fetch.await
    }

    async fn fetch_and_populate(self, guild_id: GuildId, generation: u64, ticket: u64) -> CacheLookup {
        // A fetch that finished between our cache read and joining would
        // otherwise be repeated.
        if let Ok(Some(config)) = self.cached(guild_id).await {
            self.release(guild_id, ticket);
            return CacheLookup::Hit(config);
        }

        let lookup = match tokio::time::timeout(
            self.inner.config.fetch_timeout,
            self.inner.store.fetch_config(guild_id),
        )
        .await
        {
            Ok(Ok(config)) => self.populate(guild_id, config, generation).await,
            Ok(Err(StoreError::NotFound(_))) => {
                info!(guild_id = %guild_id, "No configuration in store");
                CacheLookup::Miss(MissReason::NotFound)
            }
            Ok(Err(StoreError::Unavailable(e))) => {
                warn!(guild_id = %guild_id, error = %e, "Config store unavailable");
                CacheLookup::Miss(MissReason::StoreUnavailable(e))
            }
            Ok(Err(StoreError::Invalid(e))) => {
                warn!(guild_id = %guild_id, error = %e, "Config store returned invalid configuration");
                CacheLookup::Miss(MissReason::Invalid(e))
            }
            Err(_) => {
                warn!(guild_id = %guild_id, "Config store fetch timed out");
                CacheLookup::Miss(MissReason::Timeout)
            }
        };

        self.release(guild_id, ticket);
        lookup
    }

    fn release(&self, guild_id: GuildId, ticket: u64) {
        self.inner
            .inflight
            .remove_if(&guild_id, |_, inflight| inflight.ticket == ticket);
    }

    async fn populate(&self, guild_id: GuildId, config: GuildConfig, generation: u64) -> CacheLookup {
        if self.generation(guild_id) != generation {
            debug!(guild_id = %guild_id, "Fetch fenced by invalidation, not caching");
            return CacheLookup::Hit(Arc::new(config));
        }

        let config = match self.put(guild_id, config.clone(), self.inner.config.ttl).await {
            Ok(config) => config,
            Err(e) => {
                warn!(guild_id = %guild_id, error = %e, "Failed to populate cache");
                return CacheLookup::Hit(Arc::new(config));
            }
        };

        // An invalidation may have landed while the write was in progress.
        if self.generation(guild_id) != generation {
            debug!(guild_id = %guild_id, "Invalidated during populate, dropping entry");
            if let Err(e) = self.inner.backend.delete(&cache_key(guild_id)).await {
                warn!(guild_id = %guild_id, error = %e, "Failed to drop fenced entry");
            }
        }

        CacheLookup::Hit(config)
    }
}
