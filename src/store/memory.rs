//! In-process [`PoolStore`] implementation.
//!
//! Mirrors the redis adapter's observable semantics over local data
//! structures: pop-empty falls back, every operation degrades safely while
//! "disconnected". Backs the `memory` cache backend for local development
//! and the integration test suite.

use crate::error::{AppError, AppResult};
use crate::generator::CodeGenerator;
use crate::store::{CodeIssue, CodeSource, PoolStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    url: String,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Fast-store adapter holding the pool and URL cache in process memory.
pub struct MemoryStore {
    pool: Mutex<VecDeque<String>>,
    cache: DashMap<String, CacheEntry>,
    generator: Arc<CodeGenerator>,
    connected: AtomicBool,
    default_ttl_seconds: u64,
}

impl MemoryStore {
    pub fn new(generator: Arc<CodeGenerator>, default_ttl_seconds: u64) -> Self {
        Self {
            pool: Mutex::new(VecDeque::new()),
            cache: DashMap::new(),
            generator,
            connected: AtomicBool::new(true),
            default_ttl_seconds,
        }
    }

    /// Simulate an outage or recovery. Useful in tests and demos; the redis
    /// adapter flips the same state on transport failures.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
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
impl PoolStore for MemoryStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn populate_pool(&self, codes: &[String]) -> AppResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }

        let mut pool = self.pool.lock().await;
        pool.extend(codes.iter().cloned());
        debug!(count = codes.len(), "pushed codes to in-memory pool");
        Ok(true)
    }

    async fn get_short_code(&self) -> CodeIssue {
        let start = Instant::now();

        if !self.is_connected() {
            return self.fallback(start);
        }

        let (popped, remaining) = {
            let mut pool = self.pool.lock().await;
            let popped = pool.pop_back();
            (popped, pool.len() as i64)
        };

        match popped {
            Some(code) => CodeIssue {
                code,
                source: CodeSource::Pool,
                response_time_ms: start.elapsed().as_millis() as u64,
                remaining_pool_size: Some(remaining),
            },
            None => self.fallback(start),
        }
    }

    async fn pool_size(&self) -> AppResult<i64> {
        if !self.is_connected() {
            return Ok(0);
        }

        Ok(self.pool.lock().await.len() as i64)
    }

    async fn add_codes(&self, codes: &[String]) -> AppResult<u64> {
        if !self.is_connected() || codes.is_empty() {
            return Ok(0);
        }

        let mut pool = self.pool.lock().await;
        pool.extend(codes.iter().cloned());
        Ok(codes.len() as u64)
    }

    async fn remove_codes(&self, codes: &[String]) -> AppResult<u64> {
        if !self.is_connected() {
            return Ok(0);
        }

        let mut pool = self.pool.lock().await;
        let before = pool.len();
        pool.retain(|c| !codes.contains(c));
        Ok((before - pool.len()) as u64)
    }

    async fn cache_url(&self, short_code: &str, url: &str, ttl_seconds: Option<u64>) {
        if !self.is_connected() {
            return;
        }

        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        self.cache.insert(
            short_code.to_string(),
            CacheEntry {
                url: url.to_string(),
                expires_at: Utc::now() + Duration::seconds(ttl as i64),
            },
        );
    }

    async fn get_cached_url(&self, short_code: &str) -> Option<String> {
        if !self.is_connected() {
            return None;
        }

        let entry = self.cache.get(short_code)?;
        if entry.is_expired() {
            drop(entry);
            self.cache.remove(short_code);
            return None;
        }

        Some(entry.url.clone())
    }

    async fn remove_cached_url(&self, short_code: &str) {
        if !self.is_connected() {
            return;
        }

        self.cache.remove(short_code);
    }

    async fn health_check(&self) -> AppResult<bool> {
        if !self.is_connected() {
            return Err(AppError::StoreDisconnected);
        }

        Ok(true)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodeConfig, DEFAULT_CHARSET};

    fn store() -> MemoryStore {
        let generator = Arc::new(CodeGenerator::new(&CodeConfig {
            charset: DEFAULT_CHARSET.to_string(),
            length: 5,
        }));
        MemoryStore::new(generator, 3600)
    }

    fn codes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_populate_and_pop() {
        let store = store();
        store
            .populate_pool(&codes(&["aaaaa", "bbbbb"]))
            .await
            .unwrap();

        assert_eq!(store.pool_size().await.unwrap(), 2);

        let issue = store.get_short_code().await;
        assert_eq!(issue.source, CodeSource::Pool);
        assert_eq!(store.pool_size().await.unwrap(), 1);
        assert_eq!(issue.remaining_pool_size, Some(1));
    }

    #[tokio::test]
    async fn test_empty_pool_falls_back() {
        let store = store();

        let issue = store.get_short_code().await;

        assert_eq!(issue.source, CodeSource::Fallback);
        assert_eq!(issue.code.len(), 5);
    }

    #[tokio::test]
    async fn test_disconnected_falls_back() {
        let store = store();
        store.populate_pool(&codes(&["aaaaa"])).await.unwrap();
        store.set_connected(false);

        let issue = store.get_short_code().await;

        assert_eq!(issue.source, CodeSource::Fallback);
        assert_eq!(store.pool_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_codes_counts_and_degrades() {
        let store = store();

        let added = store.add_codes(&codes(&["aaaaa", "bbbbb"])).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(store.pool_size().await.unwrap(), 2);

        assert_eq!(store.add_codes(&[]).await.unwrap(), 0);

        store.set_connected(false);
        let added = store.add_codes(&codes(&["ccccc"])).await.unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn test_remove_codes_removes_all_occurrences() {
        let store = store();
        store
            .populate_pool(&codes(&["aaaaa", "bbbbb", "aaaaa", "ccccc"]))
            .await
            .unwrap();

        let removed = store.remove_codes(&codes(&["aaaaa"])).await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.pool_size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cache_roundtrip_and_expiry() {
        let store = store();

        store
            .cache_url("abcde", "https://example.com", Some(3600))
            .await;
        assert_eq!(
            store.get_cached_url("abcde").await.as_deref(),
            Some("https://example.com")
        );

        store.remove_cached_url("abcde").await;
        assert_eq!(store.get_cached_url("abcde").await, None);

        // Zero TTL expires immediately.
        store.cache_url("edcba", "https://example.org", Some(0)).await;
        assert_eq!(store.get_cached_url("edcba").await, None);
    }
}
