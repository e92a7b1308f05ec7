//! Kanisync CLI - Command line interface for resource synchronization.
//!
//! This tool syncs remote resources into a local SQLite database, either
//! once or periodically, and reports the freshness ledger.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use kanisync_common::ResourceType;
use kanisync_storage::{
    FreshnessLedger, HttpConfig, HttpFetcher, SqliteStore, DEFAULT_BASE_URL,
};
use kanisync_sync::{
    CancellationToken, SyncConfig, SyncEngine, SyncMode, SyncOutcome, SyncReport,
};

type Engine = SyncEngine<HttpFetcher, SqliteStore>;

#[derive(Parser)]
#[command(name = "kanisync")]
#[command(about = "Kanisync - Incremental resource synchronization")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON sync configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// API token.
    #[arg(long, env = "KANISYNC_API_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// API base URL.
    #[arg(long, default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync resources once.
    Sync {
        /// Path to the local database.
        #[arg(short, long)]
        db: PathBuf,

        /// Resource type to sync (repeatable; default: all).
        #[arg(short, long = "resource", value_parser = parse_resource_type)]
        resources: Vec<ResourceType>,

        /// Minimum seconds since the last sync, overriding the configuration.
        #[arg(short, long)]
        min_interval: Option<u64>,
    },

    /// Sync all resources periodically until interrupted.
    Watch {
        /// Path to the local database.
        #[arg(short, long)]
        db: PathBuf,

        /// Seconds between sync rounds.
        #[arg(short, long, default_value_t = 300)]
        every: u64,
    },

    /// Show when each resource was last synced.
    Status {
        /// Path to the local database.
        #[arg(short, long)]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };

    match &cli.command {
        Commands::Sync {
            db,
            resources,
            min_interval,
        } => {
            let config = match min_interval {
                Some(secs) => config.with_uniform_interval(Duration::from_secs(*secs)),
                None => config,
            };
            cmd_sync(&cli, config, db, resources).await
        }

        Commands::Watch { db, every } => {
            let config = config.with_sync_mode(SyncMode::Periodic {
                interval: Duration::from_secs(*every),
            });
            cmd_watch(&cli, config, db).await
        }

        Commands::Status { db } => cmd_status(db).await,
    }
}

fn parse_resource_type(s: &str) -> std::result::Result<ResourceType, String> {
    s.parse().map_err(|e: kanisync_common::Error| e.to_string())
}

/// Cancel `token` on Ctrl+C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current page");
            token.cancel();
        }
    });
}

/// Build an engine against the database at `db`.
async fn open_engine(
    cli: &Cli,
    config: SyncConfig,
    db: &Path,
) -> Result<(Engine, CancellationToken)> {
    let token = cli
        .token
        .clone()
        .context("API token required: pass --token or set KANISYNC_API_TOKEN")?;

    let fetcher = HttpFetcher::new(HttpConfig::new(token).with_base_url(cli.base_url.clone()))
        .context("Failed to create HTTP client")?;
    let store = SqliteStore::open(db)
        .await
        .with_context(|| format!("Failed to open database {}", db.display()))?;

    let shutdown = CancellationToken::new();
    let engine = SyncEngine::new(Arc::new(fetcher), Arc::new(store), config)
        .with_cancellation(shutdown.clone());
    Ok((engine, shutdown))
}

/// Sync once.
async fn cmd_sync(
    cli: &Cli,
    config: SyncConfig,
    db: &Path,
    resources: &[ResourceType],
) -> Result<()> {
    let (engine, shutdown) = open_engine(cli, config, db).await?;
    cancel_on_interrupt(shutdown);

    let report = if resources.is_empty() {
        engine.sync_all().await
    } else {
        engine.sync_many(resources).await
    };

    print_report(&report);
    if report.failed() > 0 {
        anyhow::bail!("{} resource type(s) failed to sync", report.failed());
    }
    Ok(())
}

/// Sync periodically until interrupted.
async fn cmd_watch(cli: &Cli, config: SyncConfig, db: &Path) -> Result<()> {
    let (engine, shutdown) = open_engine(cli, config, db).await?;
    let engine = Arc::new(engine);
    let (scheduler, handle) = engine.init_scheduler();

    let mut events = engine.subscribe();
    let notifier = engine.notifier().clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("{} at {}", notifier.event_name(event.resource_type), event.synced_at);
        }
    });

    let runner = engine.clone();
    let task = tokio::spawn(handle.run(move |request| {
        let engine = runner.clone();
        async move { engine.process_request(request).await }
    }));

    info!("Watching {} (Ctrl+C to stop)", db.display());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for interrupt")?;

    shutdown.cancel();
    scheduler.shutdown().await;
    task.await.context("Scheduler task failed")?;
    println!("Stopped.");
    Ok(())
}

/// Print the freshness ledger.
async fn cmd_status(db: &Path) -> Result<()> {
    let store = SqliteStore::open(db)
        .await
        .with_context(|| format!("Failed to open database {}", db.display()))?;

    let rows = store
        .ledger_snapshot()
        .await
        .context("Failed to read sync ledger")?;

    println!("Sync status for {}:", db.display());
    for resource_type in ResourceType::ALL {
        let synced = rows
            .iter()
            .find(|row| row.resource_type == resource_type)
            .map(|row| row.last_synced_at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let count = store.record_count(resource_type).await?;
        println!("  {:<18} {} ({} records)", resource_type, synced, count);
    }

    match store.earliest_last_sync(&ResourceType::ALL).await? {
        Some(earliest) => println!("  Earliest: {}", earliest.to_rfc3339()),
        None => println!("  Earliest: never"),
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("Sync finished in {:.1?}:", report.duration);
    for (resource_type, outcome) in &report.outcomes {
        let marker = match outcome {
            SyncOutcome::Success => "+",
            SyncOutcome::NoData(_) => "=",
            SyncOutcome::Error(_) => "!",
        };
        println!("  [{}] {:<18} {}", marker, resource_type, outcome);
    }
}
