//! Warden daemon - moderation runtime
//!
//! Replays newline-delimited gateway events through the moderation
//! pipeline against a sandboxed platform:
//! - Guild configuration from fixtures or the configuration service
//! - Rule evaluation, remediation and greetings
//! - Role hierarchy reconciliation and bot status

use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_daemon::config::StoreConfig;
use warden_daemon::{DaemonError, Server, WardenConfig};

/// Warden daemon CLI
#[derive(Parser)]
#[command(name = "wardend")]
#[command(about = "Warden - Discord moderation runtime", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Event file (JSON lines); `-` reads stdin
    #[arg(short, long, default_value = "-")]
    events: String,

    /// Guild configuration fixtures; overrides the configured store
    #[arg(short, long, env = "WARDEN_FIXTURES")]
    fixtures: Option<String>,

    /// Evaluate rules and log selections without applying anything
    #[arg(long)]
    dry_run: bool,

    /// Log level
    #[arg(long, env = "WARDEN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "WARDEN_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = WardenConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;
    if let Some(fixtures) = cli.fixtures {
        config.store = StoreConfig::Memory {
            fixtures: Some(fixtures),
        };
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dry_run = cli.dry_run,
        events = %cli.events,
        "Starting wardend"
    );

    let server = Server::new(config, cli.dry_run).await?;

    if cli.events == "-" {
        server.run(BufReader::new(tokio::io::stdin())).await?;
    } else {
        let file = tokio::fs::File::open(&cli.events).await?;
        server.run(BufReader::new(file)).await?;
    }

    Ok(())
}
