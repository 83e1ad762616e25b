//! Background loops: reconciliation sweeps, on-demand checks, cooldown upkeep

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval, Duration};
use warden_reconciler::{ReconcileError, RoleReconciler};
use warden_remediation::PermissionIssue;
use warden_rules::{CooldownEntry, CooldownStore};
use warden_types::GuildId;

use crate::error::DaemonResult;

/// Scheduler timing and persistence
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sweep_interval: Duration,
    pub prune_interval: Duration,
    pub cooldown_retention: Duration,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            prune_interval: Duration::from_secs(600),
            cooldown_retention: Duration::from_secs(24 * 60 * 60),
            snapshot_path: None,
        }
    }
}

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    reconciler: Arc<RoleReconciler>,
    cooldowns: Arc<dyn CooldownStore>,
    running: Arc<RwLock<bool>>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        reconciler: Arc<RoleReconciler>,
        cooldowns: Arc<dyn CooldownStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            reconciler,
            cooldowns,
            running: Arc::new(RwLock::new(false)),
            shutdown: watch::channel(false).0,
        })
    }

    /// Run until [`Scheduler::stop`] is called.
    ///
    /// `checks` carries guilds needing an immediate check; `issues` carries
    /// permission failures from the executor, each of which also triggers a
    /// check of its guild.
    pub async fn start(
        self: Arc<Self>,
        mut checks: mpsc::UnboundedReceiver<GuildId>,
        mut issues: mpsc::UnboundedReceiver<PermissionIssue>,
    ) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!("Scheduler started");

        // Spawn reconciliation loop
        let reconcile_scheduler = self.clone();
        let mut reconcile_shutdown = self.shutdown.subscribe();
        let reconcile_handle = tokio::spawn(async move {
            let mut interval = interval(reconcile_scheduler.config.sweep_interval);

            loop {
                if *reconcile_shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    _ = interval.tick() => {
                        let report = reconcile_scheduler.reconciler.sweep().await;
                        tracing::info!(
                            compliant = report.compliant.len(),
                            non_compliant = report.non_compliant.len(),
                            failed = report.failed.len(),
                            "Reconciliation sweep finished"
                        );
                    }
                    Some(guild_id) = checks.recv() => {
                        reconcile_scheduler.spawn_check(guild_id);
                    }
                    Some(issue) = issues.recv() => {
                        let guild_id = issue.guild_id;
                        reconcile_scheduler.reconciler.report_permission_issue(issue);
                        reconcile_scheduler.spawn_check(guild_id);
                    }
                    _ = reconcile_shutdown.changed() => break,
                }
            }
        });

        // Spawn cooldown upkeep loop
        let cooldown_scheduler = self.clone();
        let mut cooldown_shutdown = self.shutdown.subscribe();
        let cooldown_handle = tokio::spawn(async move {
            let mut interval = interval(cooldown_scheduler.config.prune_interval);
            // The first tick completes immediately; nothing to prune at startup.
            interval.tick().await;

            loop {
                if *cooldown_shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    _ = interval.tick() => {
                        cooldown_scheduler.prune_and_persist().await;
                    }
                    _ = cooldown_shutdown.changed() => break,
                }
            }
        });

        // Wait for shutdown
        let _ = tokio::join!(reconcile_handle, cooldown_handle);

        if let Err(e) = self.persist().await {
            tracing::error!(error = %e, "Failed to persist cooldowns on shutdown");
        }
        tracing::info!("Scheduler stopped");
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        self.shutdown.send_replace(true);
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    fn spawn_check(&self, guild_id: GuildId) {
        let reconciler = self.reconciler.clone();
        tokio::spawn(async move {
            match reconciler.check_and_setup(guild_id).await {
                Ok(_) => {}
                Err(ReconcileError::Departed(_)) => {
                    tracing::debug!(guild_id = %guild_id, "Skipping check for departed guild");
                }
                Err(e) => tracing::warn!(guild_id = %guild_id, error = %e, "On-demand check failed"),
            }
        });
    }

    async fn prune_and_persist(&self) {
        let retention = chrono::Duration::from_std(self.config.cooldown_retention)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let pruned = self.cooldowns.prune(Utc::now() - retention);
        tracing::debug!(pruned, "Pruned cooldown records");

        if let Err(e) = self.persist().await {
            tracing::error!(error = %e, "Failed to persist cooldowns");
        }
    }

    /// Write the cooldown snapshot, if a path is configured.
    pub async fn persist(&self) -> DaemonResult<()> {
        let Some(path) = &self.config.snapshot_path else {
            return Ok(());
        };
        save_cooldowns(path, self.cooldowns.snapshot()).await
    }
}

/// Atomically replace the snapshot file.
pub async fn save_cooldowns(path: &Path, entries: Vec<CooldownEntry>) -> DaemonResult<()> {
    let raw = serde_json::to_vec_pretty(&entries)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, raw).await?;
    tokio::fs::rename(&tmp, path).await?;
    tracing::debug!(entries = entries.len(), path = %path.display(), "Cooldowns persisted");
    Ok(())
}

/// Restore a snapshot into `store`. A missing file restores nothing.
pub async fn load_cooldowns(path: &Path, store: &dyn CooldownStore) -> DaemonResult<usize> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let entries: Vec<CooldownEntry> = serde_json::from_slice(&raw)?;
    let count = entries.len();
    store.restore(entries);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_reconciler::ReconcilerConfig;
    use warden_remediation::SandboxRemediationApi;
    use warden_rules::InMemoryCooldownStore;
    use warden_types::{CooldownKey, RuleId, UserId};

    const GUILD: GuildId = GuildId::new(100);

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("warden-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_file() {
        let path = temp_path("snapshot");
        let store = InMemoryCooldownStore::new();
        let key = CooldownKey::new(RuleId::generate(), UserId::new(4));
        store
            .try_claim(key, std::time::Duration::from_secs(60), Utc::now())
            .unwrap();

        save_cooldowns(&path, store.snapshot()).await.unwrap();

        let restored = InMemoryCooldownStore::new();
        assert_eq!(load_cooldowns(&path, &restored).await.unwrap(), 1);
        assert_eq!(restored.last_fired(&key), store.last_fired(&key));

        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(load_cooldowns(&path, &restored).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_tick_keeps_active_long_cooldowns() {
        let sandbox = Arc::new(SandboxRemediationApi::new(UserId::new(1)));
        let reconciler = Arc::new(RoleReconciler::new(sandbox, ReconcilerConfig::default()));
        let cooldowns: Arc<dyn CooldownStore> = Arc::new(InMemoryCooldownStore::new());
        let scheduler = Scheduler::new(SchedulerConfig::default(), reconciler, cooldowns.clone());

        let key = CooldownKey::new(RuleId::generate(), UserId::new(4));
        let week = Duration::from_secs(7 * 24 * 60 * 60);
        let fired = Utc::now() - chrono::Duration::days(2);
        cooldowns.try_claim(key, week, fired).unwrap();

        scheduler.prune_and_persist().await;

        assert!(cooldowns.is_cooling_down(&key, week, Utc::now()));
        assert_eq!(cooldowns.last_fired(&key), Some(fired));
    }

    #[tokio::test]
    async fn test_scheduler_sweeps_and_serves_checks() {
        let sandbox = Arc::new(SandboxRemediationApi::new(UserId::new(1)));
        sandbox.add_guild(GUILD, UserId::new(2));
        let reconciler = Arc::new(RoleReconciler::new(sandbox.clone(), ReconcilerConfig::default()));
        let cooldowns: Arc<dyn CooldownStore> = Arc::new(InMemoryCooldownStore::new());
        let scheduler = Scheduler::new(SchedulerConfig::default(), reconciler.clone(), cooldowns);

        let (check_tx, check_rx) = mpsc::unbounded_channel();
        let (_issue_tx, issue_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(scheduler.clone().start(check_rx, issue_rx));

        check_tx.send(GUILD).unwrap();
        for _ in 0..100 {
            if reconciler.compliance(GUILD).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reconciler.compliance(GUILD).is_some_and(|c| c.is_compliant()));

        scheduler.stop().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler stops")
            .unwrap();
        assert!(!scheduler.is_running().await);
    }
}
