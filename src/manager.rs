//! Pool lifecycle orchestration: startup initialization, reconciliation
//! against the durable store, population toward the target size, and
//! threshold-triggered replenishment.

use crate::config::PoolConfig;
use crate::db::CodeRepository;
use crate::error::{AppError, AppResult};
use crate::generator::{CodeGenerator, CodeSpaceStats};
use crate::store::PoolStore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub removed_count: u64,
    pub duration_ms: u64,
}

/// Outcome of a population pass.
#[derive(Debug, Clone, Serialize)]
pub struct PopulateReport {
    pub generated_count: usize,
    pub added_count: u64,
    pub duration_ms: u64,
}

/// Observability snapshot aggregating fast-store, durable-store, and
/// code-space state.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatistics {
    pub pool_size: i64,
    pub store_connected: bool,
    pub database_connected: bool,
    pub used_code_count: Option<u64>,
    pub target_size: u64,
    pub min_size: u64,
    pub replenish_threshold: u64,
    pub code_space: CodeSpaceStats,
}

/// Clears the single-flight flag once the owning replenish run ends,
/// whether it completes, errors, or its future is dropped mid-populate.
struct ReplenishGuard<'a>(&'a AtomicBool);

impl Drop for ReplenishGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the pool maintenance cycle. All pool mutation funnels through the
/// [`PoolStore`] adapter's atomic primitives; the manager never
/// read-modify-writes pool contents itself.
pub struct PoolManager {
    store: Arc<dyn PoolStore>,
    repository: Arc<dyn CodeRepository>,
    generator: Arc<CodeGenerator>,
    config: PoolConfig,
    initialized: AtomicBool,
    replenishing: AtomicBool,
}

impl PoolManager {
    pub fn new(
        store: Arc<dyn PoolStore>,
        repository: Arc<dyn CodeRepository>,
        generator: Arc<CodeGenerator>,
        config: PoolConfig,
    ) -> Self {
        Self {
            store,
            repository,
            generator,
            config,
            initialized: AtomicBool::new(false),
            replenishing: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_replenishing(&self) -> bool {
        self.replenishing.load(Ordering::SeqCst)
    }

    pub async fn pool_size(&self) -> AppResult<i64> {
        self.store.pool_size().await
    }

    /// Startup initialization. Idempotent; a disconnected fast store is a
    /// fatal error here (fail fast on total unavailability, degrade
    /// gracefully on partial unavailability everywhere else).
    pub async fn initialize(&self) -> AppResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            debug!("pool manager already initialized");
            return Ok(());
        }

        if !self.store.is_connected() {
            return Err(AppError::StoreDisconnected);
        }

        let current_size = self.store.pool_size().await? as u64;
        info!(current_size, min_size = self.config.min_size, "initializing pool");

        if current_size < self.config.min_size {
            self.reconcile_and_populate().await?;
        } else {
            // Pool is already healthy; just strip any codes that were
            // consumed while we were down.
            self.reconcile_pool().await?;
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("pool manager initialized");
        Ok(())
    }

    /// Used codes from the durable store. Degrades to an empty set when
    /// the database is unreachable so maintenance never blocks on it.
    pub async fn used_short_codes(&self) -> Vec<String> {
        if !self.repository.is_connected() {
            warn!("durable store not connected, treating used-code set as empty");
            return Vec::new();
        }

        match self.repository.list_short_codes().await {
            Ok(codes) => codes,
            Err(e) => {
                warn!(error = %e, "failed to read used codes, treating used-code set as empty");
                Vec::new()
            }
        }
    }

    /// Remove every code already assigned to a URL record from the pool.
    /// A code present in both places is a latent duplicate that must never
    /// be issued again.
    pub async fn reconcile_pool(&self) -> AppResult<ReconcileReport> {
        let start = Instant::now();
        let used = self.used_short_codes().await;

        if used.is_empty() {
            debug!("no used codes, skipping reconciliation");
            return Ok(ReconcileReport {
                removed_count: 0,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }

        let removed_count = self.store.remove_codes(&used).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            used_codes = used.len(),
            removed_count, duration_ms, "pool reconciled"
        );

        Ok(ReconcileReport {
            removed_count,
            duration_ms,
        })
    }

    /// Top the pool up to `target` (default: the configured target size).
    /// Never removes existing codes. The exclusion set is best-effort; a
    /// durable-store outage must not block code availability, the unique
    /// constraint catches the statistically rare collision later.
    pub async fn populate_pool(&self, target: Option<u64>) -> AppResult<PopulateReport> {
        let start = Instant::now();
        let target = target.unwrap_or(self.config.target_size);
        let current = self.store.pool_size().await? as u64;

        if current >= target {
            debug!(current, target, "pool already at target size");
            return Ok(PopulateReport {
                generated_count: 0,
                added_count: 0,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }

        let needed = (target - current) as usize;
        let exclude: HashSet<String> = self.used_short_codes().await.into_iter().collect();

        info!(needed, exclude = exclude.len(), "generating codes for pool");

        let codes = self
            .generator
            .generate_batch(needed, &exclude, self.config.generation_batch_size, |p| {
                debug!(
                    chunk = p.chunk_index + 1,
                    total_chunks = p.total_chunks,
                    generated = p.generated_so_far,
                    percentage = format!("{:.1}", p.percentage),
                    "generation progress"
                );
            })
            .await;

        if codes.len() < needed {
            warn!(
                requested = needed,
                generated = codes.len(),
                "generation fell short of the requested count"
            );
        }

        let generated_count = codes.len();
        let added_count = if self.store.populate_pool(&codes).await? {
            generated_count as u64
        } else {
            warn!("fast store disconnected, generated codes were not pushed");
            0
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(generated_count, added_count, duration_ms, "pool populated");

        Ok(PopulateReport {
            generated_count,
            added_count,
            duration_ms,
        })
    }

    /// One full maintenance cycle: reconcile, then populate. The first
    /// failure propagates.
    pub async fn reconcile_and_populate(&self) -> AppResult<(ReconcileReport, PopulateReport)> {
        let reconcile = self.reconcile_pool().await?;
        let populate = self.populate_pool(None).await?;
        Ok((reconcile, populate))
    }

    /// Replenish toward the target size when the pool has crossed the
    /// low-water mark. Single-flight per process: overlapping calls while
    /// a populate run is in flight return `Ok(None)` instead of piling on.
    pub async fn check_and_replenish(&self) -> AppResult<Option<PopulateReport>> {
        let current = self.store.pool_size().await? as u64;
        if current > self.config.replenish_threshold {
            return Ok(None);
        }

        if self
            .replenishing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("replenishment already in progress");
            return Ok(None);
        }

        info!(
            current,
            threshold = self.config.replenish_threshold,
            "pool below replenish threshold, repopulating"
        );

        // Held across the populate await so a cancelled caller cannot
        // wedge future replenishment attempts.
        let _clear = ReplenishGuard(&self.replenishing);

        self.populate_pool(None).await.map(Some)
    }

    /// Aggregate snapshot for operational tooling.
    pub async fn pool_statistics(&self) -> AppResult<PoolStatistics> {
        let pool_size = self.store.pool_size().await?;
        let database_connected = self.repository.is_connected();

        let used_code_count = if database_connected {
            match self.repository.count_short_codes().await {
                Ok(count) => Some(count),
                Err(e) => {
                    warn!(error = %e, "failed to count used codes for statistics");
                    None
                }
            }
        } else {
            None
        };

        Ok(PoolStatistics {
            pool_size,
            store_connected: self.store.is_connected(),
            database_connected,
            used_code_count,
            target_size: self.config.target_size,
            min_size: self.config.min_size,
            replenish_threshold: self.config.replenish_threshold,
            code_space: self.generator.code_space_stats(used_code_count.unwrap_or(0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodeConfig, DEFAULT_CHARSET};
    use crate::db::MemoryRepository;
    use crate::store::{CodeSource, MemoryStore, PoolStore as _};
    use mockall::mock;

    mock! {
        Repo {}

        #[async_trait::async_trait]
        impl CodeRepository for Repo {
            async fn list_short_codes(&self) -> AppResult<Vec<String>>;
            async fn count_short_codes(&self) -> AppResult<u64>;
            fn is_connected(&self) -> bool;
            async fn health_check(&self) -> AppResult<()>;
        }
    }

    fn pool_config(target: u64) -> PoolConfig {
        PoolConfig {
            target_size: target,
            min_size: target.min(10),
            replenish_threshold: target.min(5),
            generation_batch_size: 50,
            push_batch_size: 25,
        }
    }

    fn generator() -> Arc<CodeGenerator> {
        Arc::new(CodeGenerator::new(&CodeConfig {
            charset: DEFAULT_CHARSET.to_string(),
            length: 5,
        }))
    }

    fn manager_with(
        store: Arc<MemoryStore>,
        repo: Arc<dyn CodeRepository>,
        target: u64,
    ) -> PoolManager {
        PoolManager::new(store, repo, generator(), pool_config(target))
    }

    #[tokio::test]
    async fn test_populate_reaches_target() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        let repo = Arc::new(MemoryRepository::new());
        let manager = manager_with(store.clone(), repo, 100);

        let report = manager.populate_pool(None).await.unwrap();

        assert_eq!(report.generated_count, 100);
        assert_eq!(report.added_count, 100);
        assert_eq!(store.pool_size().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_populate_noop_at_or_above_target() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        let repo = Arc::new(MemoryRepository::new());
        let manager = manager_with(store.clone(), repo, 10);

        manager.populate_pool(None).await.unwrap();
        let report = manager.populate_pool(Some(10)).await.unwrap();

        assert_eq!(report.generated_count, 0);
        assert_eq!(report.added_count, 0);
        assert_eq!(store.pool_size().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_populate_excludes_used_codes() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        let repo = Arc::new(MemoryRepository::new());
        repo.insert_code("used1");
        repo.insert_code("used2");
        let manager = manager_with(store.clone(), repo, 50);

        manager.populate_pool(None).await.unwrap();

        // Drain the pool and check nothing used slipped in.
        for _ in 0..50 {
            let issue = store.get_short_code().await;
            assert_eq!(issue.source, CodeSource::Pool);
            assert_ne!(issue.code, "used1");
            assert_ne!(issue.code, "used2");
        }
    }

    #[tokio::test]
    async fn test_populate_proceeds_when_used_code_read_fails() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        let mut repo = MockRepo::new();
        repo.expect_is_connected().return_const(true);
        repo.expect_list_short_codes()
            .returning(|| Err(AppError::Internal("db down".to_string())));

        let manager = manager_with(store.clone(), Arc::new(repo), 20);
        let report = manager.populate_pool(None).await.unwrap();

        assert_eq!(report.added_count, 20);
    }

    #[tokio::test]
    async fn test_reconcile_removes_exactly_used_codes() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        let codes: Vec<String> = ["aaaaa", "bbbbb", "ccccc", "ddddd"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        store.populate_pool(&codes).await.unwrap();

        let repo = Arc::new(MemoryRepository::new());
        repo.insert_code("bbbbb");
        repo.insert_code("ddddd");
        repo.insert_code("xxxxx"); // used but never pooled

        let manager = manager_with(store.clone(), repo, 100);
        let report = manager.reconcile_pool().await.unwrap();

        assert_eq!(report.removed_count, 2);
        assert_eq!(store.pool_size().await.unwrap(), 2);

        let mut remaining = Vec::new();
        for _ in 0..2 {
            remaining.push(store.get_short_code().await.code);
        }
        remaining.sort();
        assert_eq!(remaining, vec!["aaaaa".to_string(), "ccccc".to_string()]);
    }

    #[tokio::test]
    async fn test_reconcile_noop_without_used_codes() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        store
            .populate_pool(&["aaaaa".to_string()])
            .await
            .unwrap();
        let repo = Arc::new(MemoryRepository::new());

        let manager = manager_with(store.clone(), repo, 100);
        let report = manager.reconcile_pool().await.unwrap();

        assert_eq!(report.removed_count, 0);
        assert_eq!(store.pool_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_initialize_requires_connected_store() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        store.set_connected(false);
        let repo = Arc::new(MemoryRepository::new());
        let manager = manager_with(store, repo, 10);

        assert!(matches!(
            manager.initialize().await,
            Err(AppError::StoreDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_initialize_populates_when_below_minimum() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        let repo = Arc::new(MemoryRepository::new());
        let manager = manager_with(store.clone(), repo, 30);

        manager.initialize().await.unwrap();

        assert_eq!(store.pool_size().await.unwrap(), 30);

        // Second call is a no-op.
        manager.initialize().await.unwrap();
        assert_eq!(store.pool_size().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_check_and_replenish_respects_threshold() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        let repo = Arc::new(MemoryRepository::new());
        let manager = manager_with(store.clone(), repo, 40);

        // Empty pool (0 <= threshold 5) triggers a full populate.
        let report = manager.check_and_replenish().await.unwrap();
        assert!(report.is_some());
        assert_eq!(store.pool_size().await.unwrap(), 40);

        // Above threshold: nothing to do.
        let report = manager.check_and_replenish().await.unwrap();
        assert!(report.is_none());
        assert!(!manager.is_replenishing());
    }

    #[tokio::test]
    async fn test_statistics_snapshot() {
        let store = Arc::new(MemoryStore::new(generator(), 3600));
        let repo = Arc::new(MemoryRepository::new());
        repo.insert_code("aaaaa");
        let manager = manager_with(store.clone(), repo, 25);

        manager.populate_pool(None).await.unwrap();
        let stats = manager.pool_statistics().await.unwrap();

        assert_eq!(stats.pool_size, 25);
        assert!(stats.store_connected);
        assert!(stats.database_connected);
        assert_eq!(stats.used_code_count, Some(1));
        assert_eq!(stats.target_size, 25);
        assert_eq!(stats.code_space.used_codes, 1);

        // Snapshot must serialize cleanly for the operational surface.
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["pool_size"], 25);
    }
}
