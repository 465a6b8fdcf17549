//! jrggs-sync - issue and pull-request sync engine
//!
//! Pulls changed items from the configured sources on an interval, derives
//! contributor metrics from their histories and keeps them current as
//! overrides and change requests are applied.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jrggs_common::config::AppConfig;
use jrggs_sync::db::{Store, StoreConfig};
use jrggs_sync::{Engine, Scheduler};

#[derive(Debug, Parser)]
#[command(name = "jrggs-sync", version, about = "Issue and pull-request sync engine")]
struct Args {
    /// Config file (overrides JRGGS_CONFIG and the platform lookup)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, env = "JRGGS_DATABASE_PATH")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::resolve(args.config.as_deref(), args.database.as_deref())?;

    // Initialize tracing
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting jrggs-sync");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    config.validate()?;
    if config.jira.is_none() && config.bitbucket.is_none() {
        anyhow::bail!("No source configured: add a [jira] or [bitbucket] section");
    }

    info!("Database: {}", config.database_path.display());
    let store = Store::new(StoreConfig::file(config.database_path.clone()));
    store.initialize().await?;

    let engine = Arc::new(Engine::from_config(&config, store)?);
    let mut scheduler = Scheduler::new(engine);
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.shutdown().await;

    Ok(())
}
