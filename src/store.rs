//! Fast-store adapter: the short-code pool list plus the URL cache-aside
//! namespace.
//!
//! The pool is the one piece of shared mutable state in the system. All
//! mutation goes through the backing store's atomic list primitives
//! (push/pop/remove), never through read-then-write application logic.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::AppResult;
use async_trait::async_trait;
use serde::Serialize;

/// Where an issued code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CodeSource {
    /// Popped from the pre-generated pool.
    #[serde(rename = "redis_pool")]
    Pool,
    /// Generated locally because the pool was empty or unreachable.
    #[serde(rename = "fallback")]
    Fallback,
}

impl std::fmt::Display for CodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeSource::Pool => write!(f, "redis_pool"),
            CodeSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Result of a short-code retrieval. Never an error: the URL-creation path
/// must not be blocked by fast-store trouble, so callers branch on `source`
/// instead of catching exceptions.
#[derive(Debug, Clone, Serialize)]
pub struct CodeIssue {
    pub code: String,
    pub source: CodeSource,
    pub response_time_ms: u64,
    pub remaining_pool_size: Option<i64>,
}

/// Adapter over the fast store backing the pool list and the URL cache.
///
/// Every operation other than `health_check` degrades to a safe default
/// when the store is disconnected, so a fast-store outage never cascades
/// into the request path.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Whether the adapter currently considers itself connected.
    fn is_connected(&self) -> bool;

    /// Push codes onto the pool list in fixed-size batches. Returns
    /// `Ok(false)` without error when disconnected; callers log a warning
    /// and move on.
    async fn populate_pool(&self, codes: &[String]) -> AppResult<bool>;

    /// Pop one code from the pool, falling back to local generation on an
    /// empty pool, exhausted retries, or a disconnected store.
    async fn get_short_code(&self) -> CodeIssue;

    /// Current pool list length; 0 when disconnected.
    async fn pool_size(&self) -> AppResult<i64>;

    /// Bulk insert without batching; returns the number of codes pushed.
    async fn add_codes(&self, codes: &[String]) -> AppResult<u64>;

    /// Remove every occurrence of each given code from the pool. Returns
    /// the number of entries removed. Maintenance path, not hot.
    async fn remove_codes(&self, codes: &[String]) -> AppResult<u64>;

    /// Best-effort cache write under the URL key namespace.
    async fn cache_url(&self, short_code: &str, url: &str, ttl_seconds: Option<u64>);

    /// Best-effort cache read; any failure is a miss.
    async fn get_cached_url(&self, short_code: &str) -> Option<String>;

    /// Best-effort cache invalidation.
    async fn remove_cached_url(&self, short_code: &str);

    /// Strict liveness probe: errors when disconnected. Callers use this
    /// explicitly to gate behavior.
    async fn health_check(&self) -> AppResult<bool>;

    /// Mark the adapter disconnected.
    fn disconnect(&self);
}

/// Redis key of the pool list.
pub const POOL_KEY: &str = "shortcode:pool";

/// Key prefix for the URL cache-aside namespace.
pub const URL_KEY_PREFIX: &str = "url";

/// Cache key for a URL lookup.
pub fn url_key(short_code: &str) -> String {
    format!("{}:{}", URL_KEY_PREFIX, short_code)
}
