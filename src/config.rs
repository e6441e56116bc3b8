use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::env;

/// Default character set for short codes: digits plus upper/lowercase letters.
pub const DEFAULT_CHARSET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub codes: CodeConfig,
    pub pool: PoolConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Fast-store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub url: String,
    pub backend: CacheBackend,
    pub max_connections: u32,
    pub default_ttl_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub connect_base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeConfig {
    pub charset: String,
    pub length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub target_size: u64,
    pub min_size: u64,
    pub replenish_threshold: u64,
    pub generation_batch_size: usize,
    pub push_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub interval_seconds: u64,
    pub critical_threshold: u64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: &str) -> AppResult<T> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| AppError::Configuration(format!("Invalid {}", name)))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let backend = match env::var("CACHE_BACKEND")
            .unwrap_or_else(|_| "redis".to_string())
            .to_lowercase()
            .as_str()
        {
            "redis" => CacheBackend::Redis,
            "memory" => CacheBackend::Memory,
            _ => {
                return Err(AppError::Configuration(
                    "CACHE_BACKEND must be 'redis' or 'memory'".to_string(),
                ))
            }
        };
        let cache_max_connections = env_parse("CACHE_MAX_CONNECTIONS", "10")?;
        let cache_default_ttl = env_parse("CACHE_DEFAULT_TTL_SECONDS", "3600")?;
        let connect_timeout = env_parse("STORE_CONNECT_TIMEOUT_SECONDS", "5")?;
        let connect_base_delay = env_parse("STORE_CONNECT_BASE_DELAY_MS", "1000")?;

        // The memory backend runs without a database, so DATABASE_URL is
        // only mandatory for the redis backend.
        let database_url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) if backend == CacheBackend::Memory => String::new(),
            Err(_) => return Err(AppError::MissingEnvVar("DATABASE_URL".to_string())),
        };
        let db_max_connections = env_parse("DB_MAX_CONNECTIONS", "10")?;
        let db_min_connections = env_parse("DB_MIN_CONNECTIONS", "1")?;

        let charset = env::var("CODE_CHARSET").unwrap_or_else(|_| DEFAULT_CHARSET.to_string());
        let code_length = env_parse("CODE_LENGTH", "5")?;

        let target_size = env_parse("POOL_TARGET_SIZE", "1000000")?;
        let min_size = env_parse("POOL_MIN_SIZE", "10000")?;
        let replenish_threshold = env_parse("POOL_REPLENISH_THRESHOLD", "5000")?;
        let generation_batch_size = env_parse("POOL_GENERATION_BATCH_SIZE", "50000")?;
        let push_batch_size = env_parse("POOL_PUSH_BATCH_SIZE", "1000")?;

        let interval_seconds = env_parse("MONITOR_INTERVAL_SECONDS", "60")?;
        let critical_threshold = env_parse("POOL_CRITICAL_THRESHOLD", "1000")?;

        let config = Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections: db_max_connections,
                min_connections: db_min_connections,
            },
            cache: CacheConfig {
                url: redis_url,
                backend,
                max_connections: cache_max_connections,
                default_ttl_seconds: cache_default_ttl,
                connect_timeout_seconds: connect_timeout,
                connect_base_delay_ms: connect_base_delay,
            },
            codes: CodeConfig {
                charset,
                length: code_length,
            },
            pool: PoolConfig {
                target_size,
                min_size,
                replenish_threshold,
                generation_batch_size,
                push_batch_size,
            },
            monitor: MonitorConfig {
                interval_seconds,
                critical_threshold,
            },
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> AppResult<()> {
        // Validate database settings
        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::Configuration(
                "DB_MIN_CONNECTIONS cannot be greater than DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        // Validate code-space settings
        if self.codes.length < 3 || self.codes.length > 16 {
            return Err(AppError::Configuration(
                "CODE_LENGTH must be between 3 and 16".to_string(),
            ));
        }

        if self.codes.charset.chars().count() < 2 {
            return Err(AppError::Configuration(
                "CODE_CHARSET must contain at least 2 characters".to_string(),
            ));
        }

        // nanoid caps the alphabet at 255 entries; anything beyond that
        // would panic inside code generation instead of failing here.
        if self.codes.charset.chars().count() > 255 {
            return Err(AppError::Configuration(
                "CODE_CHARSET must contain at most 255 characters".to_string(),
            ));
        }

        let unique: std::collections::HashSet<char> = self.codes.charset.chars().collect();
        if unique.len() != self.codes.charset.chars().count() {
            return Err(AppError::Configuration(
                "CODE_CHARSET must not contain duplicate characters".to_string(),
            ));
        }

        // Validate pool sizing: critical <= replenish <= min <= target
        if self.monitor.critical_threshold > self.pool.replenish_threshold {
            return Err(AppError::Configuration(
                "POOL_CRITICAL_THRESHOLD cannot exceed POOL_REPLENISH_THRESHOLD".to_string(),
            ));
        }

        if self.pool.replenish_threshold > self.pool.min_size {
            return Err(AppError::Configuration(
                "POOL_REPLENISH_THRESHOLD cannot exceed POOL_MIN_SIZE".to_string(),
            ));
        }

        if self.pool.min_size > self.pool.target_size {
            return Err(AppError::Configuration(
                "POOL_MIN_SIZE cannot exceed POOL_TARGET_SIZE".to_string(),
            ));
        }

        if self.pool.generation_batch_size == 0 || self.pool.push_batch_size == 0 {
            return Err(AppError::Configuration(
                "Pool batch sizes must be greater than 0".to_string(),
            ));
        }

        // Validate monitoring settings
        if self.monitor.interval_seconds == 0 {
            return Err(AppError::Configuration(
                "MONITOR_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        // Validate cache settings
        if self.cache.default_ttl_seconds == 0 {
            return Err(AppError::Configuration(
                "CACHE_DEFAULT_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "postgresql://localhost/test".to_string(),
                max_connections: 10,
                min_connections: 1,
            },
            cache: CacheConfig {
                url: "redis://127.0.0.1".to_string(),
                backend: CacheBackend::Redis,
                max_connections: 10,
                default_ttl_seconds: 3600,
                connect_timeout_seconds: 5,
                connect_base_delay_ms: 1000,
            },
            codes: CodeConfig {
                charset: DEFAULT_CHARSET.to_string(),
                length: 5,
            },
            pool: PoolConfig {
                target_size: 1_000_000,
                min_size: 10_000,
                replenish_threshold: 5_000,
                generation_batch_size: 50_000,
                push_batch_size: 1_000,
            },
            monitor: MonitorConfig {
                interval_seconds: 60,
                critical_threshold: 1_000,
            },
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_default_charset_size() {
        assert_eq!(DEFAULT_CHARSET.chars().count(), 62);
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let mut config = test_config();
        config.pool.replenish_threshold = config.pool.min_size + 1;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.monitor.critical_threshold = config.pool.replenish_threshold + 1;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.pool.min_size = config.pool.target_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_code_length_bounds() {
        let mut config = test_config();
        config.codes.length = 2;
        assert!(config.validate().is_err());

        config.codes.length = 17;
        assert!(config.validate().is_err());

        config.codes.length = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_charset_rejected() {
        let mut config = test_config();
        config.codes.charset = "aabc".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_charset_rejected() {
        // 300 distinct characters exceed the generator's alphabet limit.
        let mut config = test_config();
        config.codes.charset = (0..300u32)
            .filter_map(|i| char::from_u32(0x3041 + i))
            .collect();
        assert_eq!(config.codes.charset.chars().count(), 300);
        assert!(config.validate().is_err());

        // Exactly 255 is still fine.
        config.codes.charset = (0..255u32)
            .filter_map(|i| char::from_u32(0x3041 + i))
            .collect();
        assert_eq!(config.codes.charset.chars().count(), 255);
        assert!(config.validate().is_ok());
    }
}
