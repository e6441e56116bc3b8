//! Periodic pool health monitoring and process-wide retrieval metrics.
//!
//! The monitor sits off the hot path: the URL-creation layer calls
//! [`PoolMonitor::record_retrieval`] after each `get_short_code`, and a
//! timer loop polls pool health, firing replenishment when the level drops.

use crate::config::MonitorConfig;
use crate::error::AppResult;
use crate::manager::PoolManager;
use crate::store::CodeSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Rolling error-log capacity.
const ERROR_LOG_CAPACITY: usize = 10;

/// Overall pool health classification.
///
/// Precedence: a disconnected fast store is `Unhealthy` regardless of pool
/// size; otherwise size thresholds decide between `Critical`, `Warning`,
/// and `Healthy`; a `Healthy` pool with a disconnected durable store is
/// downgraded to `Degraded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    Healthy,
    Warning,
    Critical,
    Unhealthy,
    Degraded,
}

impl PoolHealth {
    pub fn needs_replenishment(self) -> bool {
        matches!(self, PoolHealth::Critical | PoolHealth::Warning)
    }
}

impl std::fmt::Display for PoolHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PoolHealth::Healthy => "healthy",
            PoolHealth::Warning => "warning",
            PoolHealth::Critical => "critical",
            PoolHealth::Unhealthy => "unhealthy",
            PoolHealth::Degraded => "degraded",
        };
        write!(f, "{}", s)
    }
}

/// One recorded failure, kept in the bounded rolling log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Result of a single health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: PoolHealth,
    pub pool_size: i64,
    pub store_connected: bool,
    pub database_connected: bool,
    pub checked_at: DateTime<Utc>,
}

/// Size thresholds echoed in probe responses.
#[derive(Debug, Clone, Serialize)]
pub struct Thresholds {
    pub critical: u64,
    pub warning: u64,
    pub target: u64,
}

/// Lightweight probe result for liveness/readiness endpoints. Carries no
/// side effects; replenishment stays with the timer loop.
#[derive(Debug, Clone, Serialize)]
pub struct PoolLevel {
    pub status: PoolHealth,
    pub pool_size: i64,
    pub level_percentage: f64,
    pub recommendation: String,
    pub thresholds: Thresholds,
}

/// Counters snapshot for the operational surface.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_retrievals: u64,
    pub fallback_retrievals: u64,
    pub fallback_rate: f64,
    pub replenishments: u64,
    pub last_replenishment: Option<DateTime<Utc>>,
    pub recent_errors: Vec<ErrorEvent>,
}

/// Full status document for `getDetailedStatus`-style tooling.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedStatus {
    pub monitoring: bool,
    pub last_health_check: Option<HealthReport>,
    pub metrics: MetricsSnapshot,
    pub thresholds: Thresholds,
}

/// Process-wide pool metrics. Created with the monitor, mutated on every
/// retrieval/replenishment/error event, reset only on operator action.
pub struct PoolMetrics {
    total_retrievals: AtomicU64,
    fallback_retrievals: AtomicU64,
    replenishments: AtomicU64,
    last_replenishment: Mutex<Option<DateTime<Utc>>>,
    errors: Mutex<VecDeque<ErrorEvent>>,
}

impl PoolMetrics {
    fn new() -> Self {
        Self {
            total_retrievals: AtomicU64::new(0),
            fallback_retrievals: AtomicU64::new(0),
            replenishments: AtomicU64::new(0),
            last_replenishment: Mutex::new(None),
            errors: Mutex::new(VecDeque::with_capacity(ERROR_LOG_CAPACITY)),
        }
    }

    fn record_retrieval(&self, source: CodeSource) {
        self.total_retrievals.fetch_add(1, Ordering::Relaxed);
        if source == CodeSource::Fallback {
            self.fallback_retrievals.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn record_replenishment(&self) {
        self.replenishments.fetch_add(1, Ordering::Relaxed);
        *self.last_replenishment.lock().await = Some(Utc::now());
    }

    async fn record_error(&self, message: String) {
        let mut errors = self.errors.lock().await;
        if errors.len() == ERROR_LOG_CAPACITY {
            errors.pop_front();
        }
        errors.push_back(ErrorEvent {
            timestamp: Utc::now(),
            message,
        });
    }

    async fn reset(&self) {
        self.total_retrievals.store(0, Ordering::Relaxed);
        self.fallback_retrievals.store(0, Ordering::Relaxed);
        self.replenishments.store(0, Ordering::Relaxed);
        *self.last_replenishment.lock().await = None;
        self.errors.lock().await.clear();
    }

    async fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_retrievals.load(Ordering::Relaxed);
        let fallback = self.fallback_retrievals.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_retrievals: total,
            fallback_retrievals: fallback,
            fallback_rate: if total == 0 {
                0.0
            } else {
                fallback as f64 / total as f64
            },
            replenishments: self.replenishments.load(Ordering::Relaxed),
            last_replenishment: *self.last_replenishment.lock().await,
            recent_errors: self.errors.lock().await.iter().cloned().collect(),
        }
    }
}

/// Periodic health-check loop over a [`PoolManager`].
pub struct PoolMonitor {
    manager: Arc<PoolManager>,
    config: MonitorConfig,
    metrics: Arc<PoolMetrics>,
    last_health_check: Mutex<Option<HealthReport>>,
    loop_handle: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl PoolMonitor {
    pub fn new(manager: Arc<PoolManager>, config: MonitorConfig) -> Self {
        Self {
            manager,
            config,
            metrics: Arc::new(PoolMetrics::new()),
            last_health_check: Mutex::new(None),
            loop_handle: Mutex::new(None),
        }
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            critical: self.config.critical_threshold,
            warning: self.manager.config().replenish_threshold,
            target: self.manager.config().target_size,
        }
    }

    /// Start the periodic loop: one immediate check, then a tick every
    /// configured interval. Idempotent.
    pub async fn start_monitoring(self: Arc<Self>) {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            debug!("monitor already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let monitor = Arc::clone(&self);
        let interval = Duration::from_secs(self.config.interval_seconds);

        let task = tokio::spawn(async move {
            monitor.perform_health_check().await;

            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the immediate check above covers tick zero

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.perform_health_check().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("pool monitor stopping");
                        break;
                    }
                }
            }
        });

        *handle = Some((shutdown_tx, task));
        info!(
            interval_seconds = self.config.interval_seconds,
            "pool monitor started"
        );
    }

    /// Cancel the timer. In-flight health checks complete on their own.
    pub async fn stop_monitoring(&self) {
        if let Some((shutdown_tx, task)) = self.loop_handle.lock().await.take() {
            let _ = shutdown_tx.send(true);
            let _ = task.await;
            info!("pool monitor stopped");
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.loop_handle.lock().await.is_some()
    }

    /// One health-check cycle. Never propagates an error: an exception
    /// escaping here would kill the periodic loop.
    pub async fn perform_health_check(&self) -> HealthReport {
        let report = match self.manager.pool_statistics().await {
            Ok(stats) => {
                let status = self.classify(
                    stats.store_connected,
                    stats.database_connected,
                    stats.pool_size,
                );

                HealthReport {
                    status,
                    pool_size: stats.pool_size,
                    store_connected: stats.store_connected,
                    database_connected: stats.database_connected,
                    checked_at: Utc::now(),
                }
            }
            Err(e) => {
                self.metrics
                    .record_error(format!("health check failed: {}", e))
                    .await;

                HealthReport {
                    status: PoolHealth::Unhealthy,
                    pool_size: 0,
                    store_connected: false,
                    database_connected: false,
                    checked_at: Utc::now(),
                }
            }
        };

        if report.status.needs_replenishment() && !self.manager.is_replenishing() {
            // Fire-and-forget: the health check must not block on a
            // potentially long repopulation.
            let manager = Arc::clone(&self.manager);
            let metrics = Arc::clone(&self.metrics);
            tokio::spawn(async move {
                match manager.check_and_replenish().await {
                    Ok(Some(_)) => metrics.record_replenishment().await,
                    Ok(None) => {}
                    Err(e) => {
                        metrics
                            .record_error(format!("replenishment failed: {}", e))
                            .await;
                    }
                }
            });
        }

        match report.status {
            PoolHealth::Critical => {
                error!(pool_size = report.pool_size, "pool critically low")
            }
            PoolHealth::Warning | PoolHealth::Unhealthy | PoolHealth::Degraded => {
                warn!(status = %report.status, pool_size = report.pool_size, "pool health check")
            }
            PoolHealth::Healthy => {
                debug!(pool_size = report.pool_size, "pool healthy")
            }
        }

        *self.last_health_check.lock().await = Some(report.clone());
        report
    }

    fn classify(&self, store_connected: bool, database_connected: bool, pool_size: i64) -> PoolHealth {
        if !store_connected {
            // Connectivity overrides size-based classification.
            return PoolHealth::Unhealthy;
        }

        let size = pool_size.max(0) as u64;
        let status = if size <= self.config.critical_threshold {
            PoolHealth::Critical
        } else if size <= self.manager.config().replenish_threshold {
            PoolHealth::Warning
        } else {
            PoolHealth::Healthy
        };

        if status == PoolHealth::Healthy && !database_connected {
            return PoolHealth::Degraded;
        }

        status
    }

    /// Record one retrieval outcome. The URL-creation path invokes this
    /// after every `get_short_code` so the fallback-rate metric stays
    /// accurate.
    pub fn record_retrieval(&self, source: CodeSource) {
        self.metrics.record_retrieval(source);
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        self.metrics.record_error(message.into()).await;
    }

    /// Operator action: zero all counters and the error log.
    pub async fn reset_metrics(&self) {
        self.metrics.reset().await;
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot().await
    }

    /// Synchronous-style level probe with no replenishment side effect,
    /// for liveness/readiness endpoints.
    pub async fn check_pool_level(&self) -> AppResult<PoolLevel> {
        let pool_size = self.manager.pool_size().await?;
        let size = pool_size.max(0) as u64;
        let thresholds = self.thresholds();

        let status = if size <= thresholds.critical {
            PoolHealth::Critical
        } else if size <= thresholds.warning {
            PoolHealth::Warning
        } else {
            PoolHealth::Healthy
        };

        let recommendation = match status {
            PoolHealth::Critical => "replenish immediately",
            PoolHealth::Warning => "replenishment recommended",
            _ => "none",
        }
        .to_string();

        Ok(PoolLevel {
            status,
            pool_size,
            level_percentage: if thresholds.target == 0 {
                0.0
            } else {
                size as f64 / thresholds.target as f64 * 100.0
            },
            recommendation,
            thresholds,
        })
    }

    /// Full JSON-serializable status document.
    pub async fn detailed_status(&self) -> DetailedStatus {
        DetailedStatus {
            monitoring: self.is_monitoring().await,
            last_health_check: self.last_health_check.lock().await.clone(),
            metrics: self.metrics.snapshot().await,
            thresholds: self.thresholds(),
        }
    }
}
