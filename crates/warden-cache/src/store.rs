//! Authoritative configuration store adapters.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt::Debug;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use warden_types::{GuildConfig, GuildConfigDto, GuildId};

use crate::error::{StoreError, StoreResult};

/// Source of truth for guild configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync + Debug {
    /// Fetch the current configuration for a guild
    async fn fetch_config(&self, guild_id: GuildId) -> StoreResult<GuildConfig>;
}

/// Response envelope used by the configuration service
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

/// Configuration service over HTTP
#[derive(Debug, Clone)]
pub struct HttpConfigStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpConfigStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn config_url(&self, guild_id: GuildId) -> String {
        format!("{}/api/guilds/{}/config", self.base_url, guild_id.get())
    }
}

#[async_trait]
impl ConfigStore for HttpConfigStore {
    async fn fetch_config(&self, guild_id: GuildId) -> StoreResult<GuildConfig> {
        let mut request = self.client.get(self.config_url(guild_id));
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("config request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(guild_id));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!(
                "config service error {}: {}",
                status,
                truncate(&body, 320)
            )));
        }

        let envelope: ApiEnvelope<GuildConfigDto> = response
            .json()
            .await
            .map_err(|e| StoreError::Invalid(format!("invalid config response: {}", e)))?;

        match envelope {
            ApiEnvelope {
                success: true,
                data: Some(dto),
                ..
            } => Ok(dto.into_config()?),
            ApiEnvelope { message, .. } => {
                tracing::debug!(
                    guild_id = %guild_id,
                    message = message.as_deref().unwrap_or(""),
                    "Config service reported no configuration"
                );
                Err(StoreError::NotFound(guild_id))
            }
        }
    }
}

/// Store backed by in-process fixtures.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configs: DashMap<GuildId, GuildConfig>,
    fetches: AtomicUsize,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load fixtures: a JSON array of configurations in the service's wire format.
    pub fn load_fixtures(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> StoreResult<Self> {
        let dtos: Vec<GuildConfigDto> = serde_json::from_str(raw)
            .map_err(|e| StoreError::Invalid(format!("invalid fixtures: {}", e)))?;

        let store = Self::new();
        for dto in dtos {
            store.insert(dto.into_config()?);
        }
        Ok(store)
    }

    /// Insert or replace a guild's configuration
    pub fn insert(&self, config: GuildConfig) {
        self.configs.insert(config.guild_id, config);
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<GuildConfig> {
        self.configs.remove(&guild_id).map(|(_, config)| config)
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.configs.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn fetch_config(&self, guild_id: GuildId) -> StoreResult<GuildConfig> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.configs
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(guild_id))
    }
}

fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out: String = input.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
