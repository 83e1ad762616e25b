//! Warden Cache - cache-aside layer over guild configuration
//!
//! - [`ConfigCache`]: TTL cache with fetch collapsing and invalidation fencing
//! - [`CacheBackend`]: key/value backing store (in-memory, or PostgreSQL with
//!   the `postgres` feature)
//! - [`ConfigStore`]: the authoritative store (HTTP service, or fixtures)

#![deny(unsafe_code)]

pub mod backend;
pub mod cache;
pub mod error;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use backend::{CacheBackend, InMemoryCacheBackend};
pub use cache::{
    cache_key, CacheConfig, CacheLookup, ConfigCache, MissReason, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_TTL,
};
pub use error::{CacheError, CacheResult, StoreError, StoreResult};
#[cfg(feature = "postgres")]
pub use postgres::PostgresCacheBackend;
pub use store::{ConfigStore, HttpConfigStore, InMemoryConfigStore};
