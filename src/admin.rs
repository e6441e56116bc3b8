//! Administrative command handlers.
//!
//! CLI handlers for pool maintenance: statistics, reconciliation, manual
//! population, level checks, cache pings, and migrations.

use crate::config::Config;
use crate::db::Repository;
use crate::error::AppResult;
use crate::generator::CodeGenerator;
use crate::manager::PoolManager;
use crate::monitor::PoolMonitor;
use crate::service::{build_repository, build_store};
use clap::Subcommand;
use std::sync::Arc;
use tracing::info;

/// Administrative commands available via CLI.
#[derive(Subcommand, Debug)]
pub enum AdminCommands {
    /// Show pool statistics as JSON
    Stats,

    /// Remove codes already assigned to URLs from the pool
    Reconcile,

    /// Populate the pool up to the target size
    Populate {
        /// Override the configured target size
        #[arg(long)]
        target: Option<u64>,
    },

    /// Probe the pool level without triggering replenishment
    CheckLevel,

    /// Ping the fast store
    PingCache,

    /// Run database migrations
    Migrate,
}

/// Run an administrative command with the given configuration.
pub async fn run(config: Config, admin_command: AdminCommands) -> AppResult<()> {
    match admin_command {
        AdminCommands::Stats => stats(config).await,
        AdminCommands::Reconcile => reconcile(config).await,
        AdminCommands::Populate { target } => populate(config, target).await,
        AdminCommands::CheckLevel => check_level(config).await,
        AdminCommands::PingCache => ping_cache(config).await,
        AdminCommands::Migrate => migrate(config).await,
    }
}

async fn build_manager(config: &Config) -> AppResult<Arc<PoolManager>> {
    let generator = Arc::new(CodeGenerator::new(&config.codes));
    let store = build_store(config, generator.clone()).await?;
    let repository = build_repository(config, false).await?;

    Ok(Arc::new(PoolManager::new(
        store,
        repository,
        generator,
        config.pool.clone(),
    )))
}

/// Display pool statistics.
async fn stats(config: Config) -> AppResult<()> {
    let manager = build_manager(&config).await?;
    let stats = manager.pool_statistics().await?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Reconcile the pool against the durable store.
async fn reconcile(config: Config) -> AppResult<()> {
    info!("Reconciling pool...");

    let manager = build_manager(&config).await?;
    let report = manager.reconcile_pool().await?;

    info!(
        removed = report.removed_count,
        duration_ms = report.duration_ms,
        "Reconciliation complete"
    );
    Ok(())
}

/// Populate the pool up to the target size.
async fn populate(config: Config, target: Option<u64>) -> AppResult<()> {
    info!("Populating pool...");

    let manager = build_manager(&config).await?;
    let report = manager.populate_pool(target).await?;

    info!(
        generated = report.generated_count,
        added = report.added_count,
        duration_ms = report.duration_ms,
        "Population complete"
    );
    Ok(())
}

/// Probe the pool level.
async fn check_level(config: Config) -> AppResult<()> {
    let monitor_config = config.monitor.clone();
    let manager = build_manager(&config).await?;
    let monitor = PoolMonitor::new(manager, monitor_config);

    let level = monitor.check_pool_level().await?;
    println!("{}", serde_json::to_string_pretty(&level)?);
    Ok(())
}

/// Ping the fast store.
async fn ping_cache(config: Config) -> AppResult<()> {
    info!("Pinging fast store...");

    let generator = Arc::new(CodeGenerator::new(&config.codes));
    let store = build_store(&config, generator).await?;
    let healthy = store.health_check().await?;

    info!(healthy, "Fast store responded");
    Ok(())
}

/// Run database migrations.
async fn migrate(config: Config) -> AppResult<()> {
    info!("Running database migrations...");

    let repository = Repository::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;

    repository.run_migrations().await?;

    info!("Migrations completed successfully");
    Ok(())
}
