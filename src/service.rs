//! Service startup, shutdown, and component wiring.
//!
//! Builds the generator, fast-store adapter, repository, pool manager, and
//! monitor once at startup and passes references explicitly. No global
//! state; every consumer gets its dependencies injected.

use crate::config::{CacheBackend, Config};
use crate::db::{CodeRepository, MemoryRepository, Repository};
use crate::error::AppResult;
use crate::generator::CodeGenerator;
use crate::manager::PoolManager;
use crate::monitor::PoolMonitor;
use crate::store::{MemoryStore, PoolStore, RedisStore};
use crate::store::redis::RedisStoreOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Construct the fast-store adapter for the configured backend. The redis
/// backend connects eagerly; total unavailability after retries is fatal.
pub async fn build_store(
    config: &Config,
    generator: Arc<CodeGenerator>,
) -> AppResult<Arc<dyn PoolStore>> {
    match config.cache.backend {
        CacheBackend::Redis => {
            let store = RedisStore::new(
                &config.cache.url,
                config.cache.max_connections,
                generator,
                RedisStoreOptions {
                    default_ttl_seconds: config.cache.default_ttl_seconds,
                    push_batch_size: config.pool.push_batch_size,
                    low_water_mark: config.pool.replenish_threshold,
                    connect_timeout: Duration::from_secs(config.cache.connect_timeout_seconds),
                    connect_base_delay: Duration::from_millis(config.cache.connect_base_delay_ms),
                },
            )?;
            store.connect().await?;
            Ok(Arc::new(store))
        }
        CacheBackend::Memory => {
            info!("using in-memory fast store");
            Ok(Arc::new(MemoryStore::new(
                generator,
                config.cache.default_ttl_seconds,
            )))
        }
    }
}

/// Connect the durable-store repository, optionally running migrations
/// first. With the memory backend this falls back to an in-process
/// repository so local runs need no database (and the migrate flag is a
/// no-op).
pub async fn build_repository(
    config: &Config,
    should_migrate: bool,
) -> AppResult<Arc<dyn CodeRepository>> {
    if config.cache.backend == CacheBackend::Memory {
        return Ok(Arc::new(MemoryRepository::new()));
    }

    let repository = Repository::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;

    if should_migrate {
        info!("Running database migrations...");
        repository.run_migrations().await?;
        info!("Migrations completed successfully");
    }

    Ok(Arc::new(repository))
}

/// Run the pool service: initialize the pool, start monitoring, and block
/// until a shutdown signal arrives.
pub async fn run_service(config: Config, should_migrate: bool) -> AppResult<()> {
    info!("Starting linkpool service...");

    let generator = Arc::new(CodeGenerator::new(&config.codes));

    info!("Connecting to fast store...");
    let store = build_store(&config, generator.clone()).await?;

    info!("Connecting to database...");
    let repository = build_repository(&config, should_migrate).await?;

    let manager = Arc::new(PoolManager::new(
        store.clone(),
        repository,
        generator,
        config.pool.clone(),
    ));

    info!("Initializing short-code pool...");
    manager.initialize().await?;

    let monitor = Arc::new(PoolMonitor::new(manager, config.monitor.clone()));
    monitor.clone().start_monitoring().await;

    info!("linkpool service running");
    shutdown_signal().await;

    info!("Shutting down...");
    monitor.stop_monitoring().await;
    store.disconnect();

    let snapshot = monitor.metrics_snapshot().await;
    info!(
        total_retrievals = snapshot.total_retrievals,
        fallback_retrievals = snapshot.fallback_retrievals,
        replenishments = snapshot.replenishments,
        "final pool metrics"
    );

    info!("Service shutdown complete");
    Ok(())
}

/// Create a future that resolves when a shutdown signal is received.
///
/// On Unix-like systems, this listens for both Ctrl+C (SIGINT) and SIGTERM.
/// On other platforms, it only listens for Ctrl+C.
///
/// # Panics
///
/// Panics if signal handler installation fails. This is intentional because
/// signal handler failures are unrecoverable system-level errors that
/// indicate the OS cannot deliver shutdown signals, making graceful
/// shutdown impossible.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    #[cfg(not(unix))]
    ctrl_c.await;

    warn!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CacheConfig, CodeConfig, DatabaseConfig, MonitorConfig, PoolConfig, DEFAULT_CHARSET,
    };

    fn memory_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 10,
                min_connections: 1,
            },
            cache: CacheConfig {
                url: String::new(),
                backend: CacheBackend::Memory,
                max_connections: 10,
                default_ttl_seconds: 3600,
                connect_timeout_seconds: 5,
                connect_base_delay_ms: 100,
            },
            codes: CodeConfig {
                charset: DEFAULT_CHARSET.to_string(),
                length: 5,
            },
            pool: PoolConfig {
                target_size: 100,
                min_size: 10,
                replenish_threshold: 5,
                generation_batch_size: 50,
                push_batch_size: 25,
            },
            monitor: MonitorConfig {
                interval_seconds: 60,
                critical_threshold: 2,
            },
        }
    }

    #[tokio::test]
    async fn test_memory_backend_wires_without_database() {
        let config = memory_config();
        let generator = Arc::new(CodeGenerator::new(&config.codes));

        let store = build_store(&config, generator).await.unwrap();
        assert!(store.is_connected());

        // The migrate flag is a no-op for the in-process repository.
        let repository = build_repository(&config, true).await.unwrap();
        assert!(repository.is_connected());
        repository.health_check().await.unwrap();
    }
}
