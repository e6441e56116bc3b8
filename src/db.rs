use crate::error::AppResult;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    ConnectOptions, PgPool,
};
use std::str::FromStr;

/// Read access the pool subsystem needs from the durable store: the used
/// short codes and connectivity. Everything else about URL records belongs
/// to the URL CRUD layer.
#[async_trait]
pub trait CodeRepository: Send + Sync {
    /// All short codes currently assigned to URL records. Always a fresh
    /// read; staleness here only wastes generator cycles, the database's
    /// unique constraint is the final authority.
    async fn list_short_codes(&self) -> AppResult<Vec<String>>;

    /// Number of short codes assigned to URL records.
    async fn count_short_codes(&self) -> AppResult<u64>;

    fn is_connected(&self) -> bool;

    async fn health_check(&self) -> AppResult<()>;
}

/// Database repository
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    /// Create a new repository with a connection pool
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> AppResult<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| {
                crate::error::AppError::Configuration(format!("Invalid database URL: {}", e))
            })?
            .disable_statement_logging();

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

}

#[async_trait]
impl CodeRepository for Repository {
    async fn list_short_codes(&self) -> AppResult<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            r#"
            SELECT short_code FROM urls
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    async fn count_short_codes(&self) -> AppResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM urls
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Clone implementation for Repository
impl Clone for Repository {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

/// In-memory repository of used short codes, for local development and
/// tests.
pub struct MemoryRepository {
    codes: DashMap<String, ()>,
    connected: std::sync::atomic::AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            codes: DashMap::new(),
            connected: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn insert_code(&self, code: &str) {
        self.codes.insert(code.to_string(), ());
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected
            .store(connected, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeRepository for MemoryRepository {
    async fn list_short_codes(&self) -> AppResult<Vec<String>> {
        Ok(self.codes.iter().map(|e| e.key().clone()).collect())
    }

    async fn count_short_codes(&self) -> AppResult<u64> {
        Ok(self.codes.len() as u64)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn health_check(&self) -> AppResult<()> {
        if !self.is_connected() {
            return Err(crate::error::AppError::Internal(
                "memory repository marked disconnected".to_string(),
            ));
        }
        Ok(())
    }
}
