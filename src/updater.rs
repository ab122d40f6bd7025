//! Periodic update scheduling.
//!
//! The updater owns the cadence and the update-kind selection; the cache
//! only implements [`UpdateHandler`]. At most one update per handler is in
//! flight at any time, and a failed update never advances `last_update`,
//! so the next delta window re-covers the failed one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::{CacheError, CacheResult};
use crate::stats::{CacheMetrics, UpdateOutcome, UpdateStatsScope};

/// Kind of one update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Reload every row and replace the snapshot.
    Full,
    /// Fetch rows newer than the high-water mark and upsert them.
    Incremental,
}

/// Which kinds the scheduler is allowed to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedUpdateTypes {
    OnlyFull,
    OnlyIncremental,
    FullAndIncremental,
}

impl AllowedUpdateTypes {
    pub fn allows_incremental(self) -> bool {
        !matches!(self, Self::OnlyFull)
    }
}

/// Callback surface a periodically updated cache implements.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    /// Cache name, used for log attribution.
    fn name(&self) -> &str;

    /// Whether the cache can serve incremental updates at all.
    fn supports_incremental(&self) -> bool;

    /// Run one update. `last_update` is the start time of the previous
    /// successful run (UNIX epoch on cold start); `now` is the start time
    /// of this one. Errors leave the published snapshot untouched.
    async fn update(
        &self,
        kind: UpdateKind,
        last_update: DateTime<Utc>,
        now: DateTime<Utc>,
        stats: &mut UpdateStatsScope,
    ) -> CacheResult<()>;
}

/// Cadence configuration for the periodic updater.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Interval between update runs.
    pub update_interval: Duration,
    /// Interval after which an incremental cadence inserts a full reload.
    pub full_update_interval: Duration,
    /// Update kinds the scheduler may request.
    pub allowed_update_types: AllowedUpdateTypes,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(5),
            full_update_interval: Duration::from_secs(60),
            allowed_update_types: AllowedUpdateTypes::OnlyFull,
        }
    }
}

impl UpdaterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_full_update_interval(mut self, interval: Duration) -> Self {
        self.full_update_interval = interval;
        self
    }

    pub fn with_allowed_update_types(mut self, allowed: AllowedUpdateTypes) -> Self {
        self.allowed_update_types = allowed;
        self
    }
}

/// Drives periodic updates of one handler on a background task.
pub struct PeriodicUpdater<H: UpdateHandler + 'static> {
    handler: Arc<H>,
    config: UpdaterConfig,
    metrics: Arc<CacheMetrics>,
}

impl<H: UpdateHandler + 'static> std::fmt::Debug for PeriodicUpdater<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicUpdater").finish_non_exhaustive()
    }
}

impl<H: UpdateHandler + 'static> PeriodicUpdater<H> {
    /// Wire a handler to a cadence.
    ///
    /// Fails when the config allows incremental updates but the handler's
    /// policy has no updated field.
    pub fn new(handler: Arc<H>, config: UpdaterConfig) -> CacheResult<Self> {
        if config.allowed_update_types.allows_incremental() && !handler.supports_incremental() {
            return Err(CacheError::config(
                handler.name(),
                "incremental updates allowed in config but the cache policy \
                 has no updated field",
            ));
        }
        Ok(Self {
            handler,
            config,
            metrics: Arc::new(CacheMetrics::new()),
        })
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Start periodic updates. The first run happens immediately and is a
    /// full reload (cold load).
    pub fn spawn(self) -> UpdaterHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::clone(&self.metrics);
        let join = tokio::spawn(run(self.handler, self.config, metrics, shutdown_rx));
        UpdaterHandle {
            shutdown: shutdown_tx,
            join,
            metrics: self.metrics,
        }
    }
}

/// Handle to a running updater; stopping drains the in-flight update.
pub struct UpdaterHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    metrics: Arc<CacheMetrics>,
}

impl UpdaterHandle {
    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Request shutdown and wait for the update task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

async fn run<H: UpdateHandler>(
    handler: Arc<H>,
    config: UpdaterConfig,
    metrics: Arc<CacheMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_update: Option<DateTime<Utc>> = None;
    let mut last_full: Option<DateTime<Utc>> = None;

    tracing::info!(
        cache = handler.name(),
        update_interval_ms = config.update_interval.as_millis() as u64,
        full_update_interval_ms = config.full_update_interval.as_millis() as u64,
        allowed = ?config.allowed_update_types,
        "periodic cache updates started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!(cache = handler.name(), "periodic cache updates stopping");
                    break;
                }
            }

            _ = ticker.tick() => {
                let now = Utc::now();
                let kind = choose_kind(
                    config.allowed_update_types,
                    last_update,
                    last_full,
                    config.full_update_interval,
                    now,
                );
                let mut stats = UpdateStatsScope::new();
                let previous = last_update.unwrap_or(DateTime::UNIX_EPOCH);

                match handler.update(kind, previous, now, &mut stats).await {
                    Ok(()) => {
                        metrics.record_success(&stats);
                        last_update = Some(now);
                        if kind == UpdateKind::Full {
                            last_full = Some(now);
                        }
                        match stats.outcome() {
                            Some(UpdateOutcome::Published { size }) => {
                                tracing::debug!(
                                    cache = handler.name(),
                                    kind = ?kind,
                                    documents_read = stats.documents_read(),
                                    parse_failures = stats.parse_failures(),
                                    size,
                                    "cache update published"
                                );
                            }
                            _ => {
                                tracing::debug!(
                                    cache = handler.name(),
                                    kind = ?kind,
                                    "cache update found no changes"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        metrics.record_failure();
                        tracing::error!(
                            cache = handler.name(),
                            kind = ?kind,
                            error = %e,
                            "cache update failed, keeping previous snapshot"
                        );
                    }
                }
            }
        }
    }
}

/// The next update's kind: cold starts are always full; an incremental
/// cadence inserts a full reload once `full_update_interval` has elapsed.
fn choose_kind(
    allowed: AllowedUpdateTypes,
    last_update: Option<DateTime<Utc>>,
    last_full: Option<DateTime<Utc>>,
    full_update_interval: Duration,
    now: DateTime<Utc>,
) -> UpdateKind {
    if last_update.is_none() {
        return UpdateKind::Full;
    }
    match allowed {
        AllowedUpdateTypes::OnlyFull => UpdateKind::Full,
        AllowedUpdateTypes::OnlyIncremental => UpdateKind::Incremental,
        AllowedUpdateTypes::FullAndIncremental => {
            let full_due = match last_full {
                None => true,
                Some(at) => {
                    now.signed_duration_since(at).to_std().unwrap_or_default()
                        >= full_update_interval
                }
            };
            if full_due {
                UpdateKind::Full
            } else {
                UpdateKind::Incremental
            }
        }
    }
}
