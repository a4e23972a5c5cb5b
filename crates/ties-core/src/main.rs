//! ties - relationship graph updater
//!
//! Runs one decay-then-inject batch over the relationship graph, either
//! against the hosted table store or an offline world file.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ties_core::{CancelFlag, ConfigError, MemoryWorld, RemoteStore, TiesConfig, UpdateEngine};

/// Relationship graph updater
#[derive(Parser, Debug, Clone)]
#[command(name = "ties")]
#[command(about = "Decays and updates citizen relationship scores for one cycle")]
struct Args {
    /// TOML tuning file; built-in defaults when absent
    #[arg(long, env = "TIES_CONFIG")]
    config: Option<PathBuf>,

    /// Compute everything but write nothing
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Signal lookback window in hours
    #[arg(long)]
    lookback_hours: Option<i64>,

    /// Citizens processed in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Handle of the public authority
    #[arg(long)]
    public_authority: Option<String>,

    /// Cycle time (RFC 3339); defaults to now
    #[arg(long)]
    at: Option<String>,

    /// Offline world file to run against instead of the remote store
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Where to write the updated offline world (with --fixture)
    #[arg(long, requires = "fixture")]
    output: Option<PathBuf>,

    /// Remote API key
    #[arg(long, env = "TIES_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Remote base id
    #[arg(long, env = "TIES_BASE_ID")]
    base_id: Option<String>,

    /// Remote endpoint root
    #[arg(long, env = "TIES_ENDPOINT")]
    endpoint: Option<String>,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    /// File settings with command line overrides applied, validated.
    fn resolve_config(&self) -> Result<TiesConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => TiesConfig::from_file(path)?,
            None => TiesConfig::default(),
        };

        if let Some(hours) = self.lookback_hours {
            config.batch.lookback_hours = hours;
        }
        if let Some(concurrency) = self.concurrency {
            config.batch.concurrency = concurrency;
        }
        if let Some(ref authority) = self.public_authority {
            config.batch.public_authority = authority.clone();
        }
        if self.api_key.is_some() {
            config.remote.api_key = self.api_key.clone();
        }
        if self.base_id.is_some() {
            config.remote.base_id = self.base_id.clone();
        }
        if let Some(ref endpoint) = self.endpoint {
            config.remote.endpoint = endpoint.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn cycle_time(&self) -> anyhow::Result<DateTime<Utc>> {
        match &self.at {
            Some(raw) => ties_events::parse_timestamp(raw)
                .with_context(|| format!("invalid --at timestamp '{raw}'")),
            None => Ok(Utc::now()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ties={log_level},ties_core={log_level},warn").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match args.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };
    let now = args.cycle_time()?;

    let cancel = CancelFlag::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after in-flight citizens");
                cancel.cancel();
            }
        }
    });

    info!(
        at = %now,
        dry_run = args.dry_run,
        lookback_hours = config.batch.lookback_hours,
        concurrency = config.batch.concurrency,
        backend = if args.fixture.is_some() { "fixture" } else { "remote" },
        "Starting relationship update"
    );

    let summary = match &args.fixture {
        Some(path) => {
            let world = Arc::new(
                MemoryWorld::from_file(path)
                    .with_context(|| format!("failed to load world file {}", path.display()))?,
            );
            let summary = UpdateEngine::new(world.clone(), world.clone(), config)
                .dry_run(args.dry_run)
                .with_cancel(cancel)
                .run(now)
                .await;

            if let Some(ref output) = args.output {
                let json = world.to_records().await.to_json()?;
                std::fs::write(output, json)
                    .with_context(|| format!("failed to write {}", output.display()))?;
                info!(path = %output.display(), "Wrote updated world");
            }
            summary
        }
        None => {
            let store = match RemoteStore::new(&config.remote) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!("Configuration error: {}", e);
                    return Err(e.into());
                }
            };
            UpdateEngine::new(store.clone(), store, config)
                .dry_run(args.dry_run)
                .with_cancel(cancel)
                .run(now)
                .await
        }
    };

    summary.log();
    if let Some(ref path) = args.summary_json {
        summary
            .write_json(path)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }
    if summary.edges_failed > 0 {
        warn!(failed = summary.edges_failed, "Some edges could not be persisted");
    }

    Ok(())
}
