use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;

use feedsnap::config::Config;
use feedsnap::feed::{build_client, Fetcher};
use feedsnap::storage::{Database, DatabaseError, FeedStore};
use feedsnap::sync::{CancelToken, Scheduler, SyncOrchestrator};

/// Get the config directory path ($FEEDSNAP_CONFIG_DIR or ~/.config/feedsnap/)
fn get_config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("FEEDSNAP_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsnap"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedsnap",
    about = "Keeps the latest entry of each configured RSS/Atom feed"
)]
struct Args {
    /// Config file (default: config.toml in the config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync cycle now (Ctrl-C cancels and keeps what was collected)
    Sync,
    /// Print stored records, newest first
    List,
    /// Sync on the configured cadence until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // SEC-007: Config directory is user-only on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another feedsnap process appears to be using the database. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };
    let store = FeedStore::new(db);

    match args.command {
        Command::List => list(&store).await,
        Command::Sync => {
            let orchestrator = prepare(&config, store).await?;
            sync_once(&orchestrator).await
        }
        Command::Run => {
            let orchestrator = prepare(&config, store).await?;
            if orchestrator.feeds().is_empty() {
                tracing::warn!(path = %config_path.display(), "No feeds configured");
            }
            Scheduler::new(orchestrator, config.sync_interval())
                .run(shutdown_signal())
                .await;
            Ok(())
        }
    }
}

/// Drop records of unconfigured feeds and build the orchestrator.
async fn prepare(config: &Config, store: FeedStore) -> Result<SyncOrchestrator> {
    let feeds = config.feed_urls();

    let configured: HashSet<String> = feeds.iter().cloned().collect();
    store
        .cleanup(&configured)
        .await
        .context("Failed to remove records of unconfigured feeds")?;

    let fetch_config = config.fetch_config();
    let client = build_client(&fetch_config).context("Failed to build HTTP client")?;
    Ok(SyncOrchestrator::new(
        store,
        Fetcher::new(client, fetch_config),
        feeds,
    ))
}

async fn sync_once(orchestrator: &SyncOrchestrator) -> Result<()> {
    let cancel = CancelToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Cancelling sync cycle");
            cancel.cancel();
        })
    };

    let report = orchestrator.run_cycle(&cancel).await;
    watcher.abort();

    let report = report.ok_or_else(|| anyhow::anyhow!("A sync cycle is already running"))?;
    println!(
        "{:?}: {} collected, {} failed, {} attempted",
        report.outcome, report.collected, report.failed, report.attempted
    );
    if !report.committed {
        anyhow::bail!("Failed to commit collected records");
    }
    Ok(())
}

async fn list(store: &FeedStore) -> Result<()> {
    let records = store.list_all().await.context("Failed to read records")?;
    if records.is_empty() {
        println!("No records yet. Run `feedsnap sync` first.");
        return Ok(());
    }

    for record in records {
        let when = DateTime::<Utc>::from_timestamp(record.timestamp_seconds, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| record.timestamp_seconds.to_string());
        println!("{}", record.display_name);
        println!("  {}", record.title);
        if !record.link.is_empty() {
            println!("  {}", record.link);
        }
        println!("  {when}");
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C only on non-Unix platforms).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down gracefully"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
