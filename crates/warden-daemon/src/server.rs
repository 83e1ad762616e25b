//! Runtime assembly and lifecycle

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use warden_cache::{
    CacheBackend, ConfigCache, ConfigStore, HttpConfigStore, InMemoryCacheBackend,
    InMemoryConfigStore,
};
use warden_reconciler::RoleReconciler;
use warden_remediation::{
    ActionExecutor, MessageInfo, PermissionIssue, RemediationClient, SandboxRemediationApi,
};
use warden_rules::{
    Classifier, CooldownStore, HttpModerationClassifier, InMemoryCooldownStore, NoopClassifier,
    RuleEngine,
};
use warden_types::{EventPayload, GatewayEvent, GuildId, UserId};

use crate::config::{CacheBackendConfig, CacheSettings, ClassifierConfig, StoreConfig, WardenConfig};
use crate::dispatcher::EventDispatcher;
use crate::error::{DaemonError, DaemonResult};
use crate::gate::EventGate;
use crate::scheduler::{load_cooldowns, Scheduler, SchedulerConfig};

/// Events buffered between the reader and the dispatcher
const EVENT_BUFFER: usize = 1024;

/// Warden runtime replaying gateway events against the sandbox platform
pub struct Server {
    sandbox: Arc<SandboxRemediationApi>,
    reconciler: Arc<RoleReconciler>,
    dispatcher: Arc<EventDispatcher>,
    scheduler: Arc<Scheduler>,
    checks_rx: mpsc::UnboundedReceiver<GuildId>,
    issues_rx: mpsc::UnboundedReceiver<PermissionIssue>,
}

impl Server {
    /// Create a server with the given configuration
    pub async fn new(config: WardenConfig, dry_run: bool) -> DaemonResult<Self> {
        let store = build_store(&config.store)?;
        let backend = build_backend(&config.cache).await?;
        let classifier = build_classifier(&config.classifier)?;

        let cooldowns: Arc<dyn CooldownStore> = Arc::new(InMemoryCooldownStore::new());
        let snapshot_path = config.cooldowns.snapshot_path.as_ref().map(PathBuf::from);
        if let Some(path) = &snapshot_path {
            let restored = load_cooldowns(path, cooldowns.as_ref()).await?;
            tracing::info!(restored, path = %path.display(), "Cooldowns restored");
        }

        let sandbox = Arc::new(SandboxRemediationApi::new(UserId::new(
            config.remediation.bot_user_id,
        )));
        let api = Arc::new(
            RemediationClient::new(sandbox.clone())
                .with_timeout(Duration::from_secs(config.remediation.call_timeout_secs))
                .with_retry(config.remediation.retry.clone()),
        );

        let reconciler = Arc::new(RoleReconciler::new(api.clone(), config.reconciler.clone()));
        let (checks_tx, checks_rx) = mpsc::unbounded_channel();
        let (issues_tx, issues_rx) = mpsc::unbounded_channel();

        let cache = ConfigCache::new(backend, store, config.cache.cache_config());
        let engine = RuleEngine::new(cooldowns.clone(), classifier)
            .with_classifier_timeout(Duration::from_secs(config.classifier.timeout_secs));
        let executor = ActionExecutor::new(api, cooldowns.clone()).with_issue_reporter(issues_tx);
        let gate = EventGate::new(reconciler.clone(), checks_tx);
        let dispatcher = Arc::new(
            EventDispatcher::new(gate, cache, engine, executor, reconciler.clone())
                .dry_run(dry_run),
        );

        let scheduler = Scheduler::new(
            SchedulerConfig {
                sweep_interval: Duration::from_secs(config.reconciler.check_interval_secs),
                prune_interval: Duration::from_secs(config.cooldowns.prune_interval_secs),
                cooldown_retention: Duration::from_secs(config.cooldowns.retention_secs),
                snapshot_path,
            },
            reconciler.clone(),
            cooldowns,
        );

        Ok(Self {
            sandbox,
            reconciler,
            dispatcher,
            scheduler,
            checks_rx,
            issues_rx,
        })
    }

    pub fn sandbox(&self) -> &Arc<SandboxRemediationApi> {
        &self.sandbox
    }

    pub fn reconciler(&self) -> &Arc<RoleReconciler> {
        &self.reconciler
    }

    /// Replay newline-delimited JSON events until the input ends or a
    /// shutdown signal arrives.
    pub async fn run<R>(self, input: R) -> DaemonResult<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let Server {
            sandbox,
            dispatcher,
            scheduler,
            checks_rx,
            issues_rx,
            ..
        } = self;

        let scheduler_handle = tokio::spawn(scheduler.clone().start(checks_rx, issues_rx));

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let dispatch_handle = tokio::spawn(dispatcher.run(event_rx));

        let replayed = tokio::select! {
            result = replay(input, sandbox, event_tx) => result,
            _ = shutdown_signal() => Ok(0),
        };

        if let Err(e) = dispatch_handle.await {
            tracing::error!(error = %e, "Dispatcher task failed");
        }

        tracing::info!("Warden daemon shutting down");
        scheduler.stop().await;
        if let Err(e) = scheduler_handle.await {
            tracing::error!(error = %e, "Scheduler task failed");
        }

        let replayed = replayed?;
        tracing::info!(events = replayed, "Replay finished");
        Ok(())
    }
}

/// Feed events to the dispatcher, seeding the sandbox with the guilds and
/// messages they refer to.
async fn replay<R>(
    input: R,
    sandbox: Arc<SandboxRemediationApi>,
    events: mpsc::Sender<GatewayEvent>,
) -> DaemonResult<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut count = 0;
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: GatewayEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed event");
                continue;
            }
        };

        seed_sandbox(&sandbox, &event);
        events
            .send(event)
            .await
            .map_err(|_| DaemonError::EventSource("dispatcher stopped".to_string()))?;
        count += 1;
    }

    Ok(count)
}

fn seed_sandbox(sandbox: &SandboxRemediationApi, event: &GatewayEvent) {
    if !sandbox.has_guild(event.guild_id) {
        sandbox.add_guild(event.guild_id, UserId::default());
    }
    if let EventPayload::MessageCreated {
        channel_id,
        message_id,
        content,
        ..
    } = &event.payload
    {
        sandbox.record_message(
            event.guild_id,
            *channel_id,
            MessageInfo {
                id: *message_id,
                author_id: event.actor_id,
                content: content.clone(),
            },
        );
    }
}

fn build_store(config: &StoreConfig) -> DaemonResult<Arc<dyn ConfigStore>> {
    match config {
        StoreConfig::Memory { fixtures: None } => Ok(Arc::new(InMemoryConfigStore::new())),
        StoreConfig::Memory {
            fixtures: Some(path),
        } => {
            let store = InMemoryConfigStore::load_fixtures(path)?;
            tracing::info!(guilds = store.guilds().len(), path = %path, "Loaded configuration fixtures");
            Ok(Arc::new(store))
        }
        StoreConfig::Http {
            base_url,
            api_key,
            timeout_secs,
        } => Ok(Arc::new(HttpConfigStore::new(
            base_url.as_str(),
            api_key.clone(),
            Duration::from_secs(*timeout_secs),
        )?)),
    }
}

async fn build_backend(settings: &CacheSettings) -> DaemonResult<Arc<dyn CacheBackend>> {
    match &settings.backend {
        CacheBackendConfig::Memory => Ok(Arc::new(InMemoryCacheBackend::new())),
        #[cfg(feature = "postgres")]
        CacheBackendConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let backend = warden_cache::PostgresCacheBackend::connect(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "postgres"))]
        CacheBackendConfig::Postgres { .. } => Err(DaemonError::Config(
            "postgres cache backend requires the `postgres` feature".to_string(),
        )),
    }
}

fn build_classifier(config: &ClassifierConfig) -> DaemonResult<Arc<dyn Classifier>> {
    if !config.enabled {
        return Ok(Arc::new(NoopClassifier));
    }
    let api_key = config.api_key.clone().ok_or_else(|| {
        DaemonError::Config("classifier enabled without an api_key".to_string())
    })?;
    Ok(Arc::new(HttpModerationClassifier::new(
        &config.endpoint,
        api_key,
        config.model.clone(),
        Duration::from_secs(config.timeout_secs),
    )?))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_reconciler::Compliance;

    const GUILD: GuildId = GuildId::new(100);

    #[tokio::test]
    async fn test_replay_seeds_guilds_and_reconciles() {
        let server = Server::new(WardenConfig::default(), false).await.unwrap();
        let sandbox = server.sandbox().clone();
        let reconciler = server.reconciler().clone();

        let input = concat!(
            "# recorded traffic\n",
            "{\"guild_id\": 100, \"type\": \"guild_joined\"}\n",
            "not json\n",
            "\n",
            "{\"guild_id\": 100, \"actor_id\": 7, \"type\": \"message_created\", \"channel_id\": 5, \"message_id\": 900, \"content\": \"hi\"}\n",
        );

        server.run(input.as_bytes()).await.unwrap();

        assert!(sandbox.has_guild(GUILD));
        assert_eq!(reconciler.compliance(GUILD), Some(Compliance::Compliant));
        assert_eq!(sandbox.messages(GUILD, warden_types::ChannelId::new(5)).len(), 1);
    }

    #[tokio::test]
    async fn test_postgres_backend_requires_feature_or_connection() {
        let settings = CacheSettings {
            backend: CacheBackendConfig::Postgres {
                url: "postgres://localhost:1/none".to_string(),
                max_connections: 1,
                connect_timeout_secs: 1,
            },
            ..CacheSettings::default()
        };
        assert!(build_backend(&settings).await.is_err());
    }

    #[test]
    fn test_enabled_classifier_needs_key() {
        let config = ClassifierConfig {
            enabled: true,
            ..ClassifierConfig::default()
        };
        assert!(matches!(build_classifier(&config), Err(DaemonError::Config(_))));
    }
}
