//! Redis-backed [`PoolStore`] implementation over a deadpool connection pool.

use crate::error::{AppError, AppResult};
use crate::generator::CodeGenerator;
use crate::store::{url_key, CodeIssue, CodeSource, PoolStore, POOL_KEY};
use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Manager, Pool, Runtime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Connection attempts before `connect` gives up.
const CONNECT_ATTEMPTS: u32 = 3;

/// Pop attempts before `get_short_code` falls back to local generation.
const POP_ATTEMPTS: u32 = 3;

/// Base backoff between pop retries.
const POP_RETRY_BASE: Duration = Duration::from_millis(100);

/// Knobs for the redis adapter beyond the connection itself.
#[derive(Debug, Clone)]
pub struct RedisStoreOptions {
    pub default_ttl_seconds: u64,
    pub push_batch_size: usize,
    /// Remaining-size threshold below which a successful pop logs a
    /// low-pool warning.
    pub low_water_mark: u64,
    pub connect_timeout: Duration,
    pub connect_base_delay: Duration,
}

/// Fast-store adapter backed by redis.
///
/// The pool is a redis list under [`POOL_KEY`]; URL cache entries live under
/// the `url:` prefix. Commands go through atomic list primitives only, so
/// concurrent poppers never receive the same element.
pub struct RedisStore {
    pool: Pool,
    generator: Arc<CodeGenerator>,
    connected: AtomicBool,
    options: RedisStoreOptions,
}

impl RedisStore {
    /// Build the connection pool. Does not touch the network; call
    /// [`RedisStore::connect`] to establish and verify connectivity.
    pub fn new(
        redis_url: &str,
        max_connections: u32,
        generator: Arc<CodeGenerator>,
        options: RedisStoreOptions,
    ) -> AppResult<Self> {
        let manager = Manager::new(redis_url)
            .map_err(|e| AppError::Configuration(format!("Invalid Redis URL: {}", e)))?;

        let pool = Pool::builder(manager)
            .max_size(max_connections as usize)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self {
            pool,
            generator,
            connected: AtomicBool::new(false),
            options,
        })
    }

    /// Establish connectivity: up to 3 PING attempts with exponential
    /// backoff. The final error surfaces to the caller, which treats it as
    /// a fatal initialization failure unless it tolerates degraded mode.
    pub async fn connect(&self) -> AppResult<()> {
        let mut last_error = AppError::StoreDisconnected;

        for attempt in 0..CONNECT_ATTEMPTS {
            match tokio::time::timeout(self.options.connect_timeout, self.ping()).await {
                Ok(Ok(_)) => {
                    self.connected.store(true, Ordering::SeqCst);
                    info!(attempt, "connected to fast store");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "fast store connection attempt failed");
                    last_error = e;
                }
                Err(_) => {
                    warn!(attempt, "fast store connection attempt timed out");
                    last_error = AppError::Internal("fast store connect timeout".to_string());
                }
            }

            if attempt + 1 < CONNECT_ATTEMPTS {
                let delay = self.options.connect_base_delay * 2u32.pow(attempt);
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }

    async fn ping(&self) -> AppResult<String> {
        let mut conn = self.pool.get().await?;
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(response)
    }

    async fn try_pop(&self) -> AppResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.rpop(POOL_KEY, None).await?;
        Ok(value)
    }

    fn fallback(&self, start: Instant) -> CodeIssue {
        CodeIssue {
            code: self.generator.generate_one(),
            source: CodeSource::Fallback,
            response_time_ms: start.elapsed().as_millis() as u64,
            remaining_pool_size: None,
        }
    }
}

#[async_trait]
impl PoolStore for RedisStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn populate_pool(&self, codes: &[String]) -> AppResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }

        let mut conn = self.pool.get().await?;
        for chunk in codes.chunks(self.options.push_batch_size) {
            let _: i64 = conn.rpush(POOL_KEY, chunk).await?;
        }

        debug!(count = codes.len(), "pushed codes to pool");
        Ok(true)
    }

    async fn get_short_code(&self) -> CodeIssue {
        let start = Instant::now();

        if !self.is_connected() {
            debug!("fast store disconnected, generating fallback code");
            return self.fallback(start);
        }

        for attempt in 0..POP_ATTEMPTS {
            match self.try_pop().await {
                Ok(Some(code)) => {
                    // Best-effort size sample for the low-pool warning.
                    let remaining = self.pool_size().await.ok();
                    if let Some(size) = remaining {
                        if (size as u64) < self.options.low_water_mark {
                            warn!(remaining = size, "pool running low");
                        }
                    }

                    return CodeIssue {
                        code,
                        source: CodeSource::Pool,
                        response_time_ms: start.elapsed().as_millis() as u64,
                        remaining_pool_size: remaining,
                    };
                }
                Ok(None) => {
                    // Empty pool is a normal miss, not a transient error.
                    debug!("pool empty, generating fallback code");
                    return self.fallback(start);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "pool pop failed");
                    if attempt + 1 < POP_ATTEMPTS {
                        tokio::time::sleep(POP_RETRY_BASE * 2u32.pow(attempt)).await;
                    }
                }
            }
        }

        self.fallback(start)
    }

    async fn pool_size(&self) -> AppResult<i64> {
        if !self.is_connected() {
            return Ok(0);
        }

        let mut conn = self.pool.get().await?;
        let size: i64 = conn.llen(POOL_KEY).await?;
        Ok(size)
    }

    async fn add_codes(&self, codes: &[String]) -> AppResult<u64> {
        if !self.is_connected() || codes.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get().await?;
        let _: i64 = conn.rpush(POOL_KEY, codes).await?;
        Ok(codes.len() as u64)
    }

    async fn remove_codes(&self, codes: &[String]) -> AppResult<u64> {
        if !self.is_connected() {
            return Ok(0);
        }

        // One LREM round trip per code. Reconciliation is low-frequency
        // maintenance, not a hot path.
        let mut conn = self.pool.get().await?;
        let mut removed = 0u64;
        for code in codes {
            let count: i64 = conn.lrem(POOL_KEY, 0, code).await?;
            removed += count as u64;
        }

        Ok(removed)
    }

    async fn cache_url(&self, short_code: &str, url: &str, ttl_seconds: Option<u64>) {
        if !self.is_connected() {
            return;
        }

        let key = url_key(short_code);
        let ttl = ttl_seconds.unwrap_or(self.options.default_ttl_seconds);
        let result: AppResult<()> = async {
            let mut conn = self.pool.get().await?;
            conn.set_ex::<_, _, ()>(&key, url, ttl).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(short_code, error = %e, "failed to cache URL");
        }
    }

    async fn get_cached_url(&self, short_code: &str) -> Option<String> {
        if !self.is_connected() {
            return None;
        }

        let key = url_key(short_code);
        let result: AppResult<Option<String>> = async {
            let mut conn = self.pool.get().await?;
            let value: Option<String> = conn.get(&key).await?;
            Ok(value)
        }
        .await;

        match result {
            Ok(value) => value,
            Err(e) => {
                // Treated as a cache miss, never a command failure.
                warn!(short_code, error = %e, "cache lookup failed");
                None
            }
        }
    }

    async fn remove_cached_url(&self, short_code: &str) {
        if !self.is_connected() {
            return;
        }

        let key = url_key(short_code);
        let result: AppResult<()> = async {
            let mut conn = self.pool.get().await?;
            conn.del::<_, ()>(&key).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(short_code, error = %e, "cache invalidation failed");
        }
    }

    async fn health_check(&self) -> AppResult<bool> {
        if !self.is_connected() {
            return Err(AppError::StoreDisconnected);
        }

        match self.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                // A failed probe on an established connection means the
                // transport dropped underneath us.
                self.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        info!("fast store marked disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodeConfig, DEFAULT_CHARSET};

    fn disconnected_store() -> RedisStore {
        let generator = Arc::new(CodeGenerator::new(&CodeConfig {
            charset: DEFAULT_CHARSET.to_string(),
            length: 5,
        }));

        // Never connected, so no command reaches the network.
        RedisStore::new(
            "redis://127.0.0.1:6379",
            2,
            generator,
            RedisStoreOptions {
                default_ttl_seconds: 3600,
                push_batch_size: 1000,
                low_water_mark: 5000,
                connect_timeout: Duration::from_secs(1),
                connect_base_delay: Duration::from_millis(10),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_disconnected_retrieval_falls_back() {
        let store = disconnected_store();

        let issue = store.get_short_code().await;

        assert_eq!(issue.source, CodeSource::Fallback);
        assert_eq!(issue.code.len(), 5);
        assert_eq!(issue.remaining_pool_size, None);
    }

    #[tokio::test]
    async fn test_disconnected_pool_size_is_zero() {
        let store = disconnected_store();
        assert_eq!(store.pool_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_populate_is_noop() {
        let store = disconnected_store();
        let pushed = store
            .populate_pool(&["abcde".to_string()])
            .await
            .unwrap();
        assert!(!pushed);
    }

    #[tokio::test]
    async fn test_disconnected_cache_ops_are_noops() {
        let store = disconnected_store();

        store.cache_url("abcde", "https://example.com", None).await;
        assert_eq!(store.get_cached_url("abcde").await, None);
        store.remove_cached_url("abcde").await;
    }

    #[tokio::test]
    async fn test_disconnected_health_check_is_strict() {
        let store = disconnected_store();
        assert!(matches!(
            store.health_check().await,
            Err(AppError::StoreDisconnected)
        ));
    }
}
