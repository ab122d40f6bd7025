//! Update statistics and phase timing.
//!
//! Every update run is accounted in three named phases plus two counters.
//! The per-run scope feeds the cumulative per-cache metrics kept by the
//! periodic updater.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Phase covering the deep copy of the published snapshot.
pub const COPY_STAGE: &str = "copy_data";
/// Phase covering statement execution and cursor fetches.
pub const FETCH_STAGE: &str = "fetch";
/// Phase covering row decoding and container upserts.
pub const PARSE_STAGE: &str = "parse";

/// Accumulating phase timer for one update run.
///
/// Switching into a phase closes the previous one; time spent in a phase
/// accumulates across switches, so yielding inside a phase keeps charging
/// that phase.
#[derive(Debug, Default)]
pub struct ScopeTime {
    current: Option<(&'static str, Instant)>,
    totals: HashMap<&'static str, Duration>,
}

impl ScopeTime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the current phase and start timing `phase`.
    pub fn switch(&mut self, phase: &'static str) {
        self.stop();
        self.current = Some((phase, Instant::now()));
    }

    /// Close the current phase without starting a new one.
    pub fn stop(&mut self) {
        if let Some((phase, started)) = self.current.take() {
            *self.totals.entry(phase).or_default() += started.elapsed();
        }
    }

    /// Accumulated time across every switch into `phase`.
    pub fn elapsed_total(&self, phase: &str) -> Duration {
        self.totals.get(phase).copied().unwrap_or_default()
    }
}

/// Terminal state of one update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new snapshot was published with this many entries.
    Published { size: usize },
    /// The delta produced no rows; the previous snapshot stays published.
    NoChanges,
}

/// Per-run counters handed to the update driver by the scheduler.
#[derive(Debug, Default)]
pub struct UpdateStatsScope {
    documents_read: u64,
    parse_failures: u64,
    outcome: Option<UpdateOutcome>,
}

impl UpdateStatsScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_documents_read(&mut self, count: usize) {
        self.documents_read += count as u64;
    }

    pub fn add_parse_failures(&mut self, count: usize) {
        self.parse_failures += count as u64;
    }

    /// Record publication of a snapshot of `final_size` entries.
    pub fn finish(&mut self, final_size: usize) {
        self.outcome = Some(UpdateOutcome::Published { size: final_size });
    }

    /// Record an incremental run that found nothing to apply.
    pub fn finish_no_changes(&mut self) {
        self.outcome = Some(UpdateOutcome::NoChanges);
    }

    pub fn documents_read(&self) -> u64 {
        self.documents_read
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures
    }

    pub fn outcome(&self) -> Option<UpdateOutcome> {
        self.outcome
    }
}

/// Cumulative counters for one cache, safe to read concurrently.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Updates that ran to completion.
    pub updates_succeeded: AtomicU64,
    /// Updates aborted by a transport or timeout error.
    pub updates_failed: AtomicU64,
    /// Incremental updates that found no rows.
    pub no_change_updates: AtomicU64,
    /// Rows fetched across all shards and updates.
    pub documents_read: AtomicU64,
    /// Rows skipped because they failed to decode.
    pub parse_failures: AtomicU64,
    /// Size of the most recently published snapshot.
    pub last_published_size: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, stats: &UpdateStatsScope) {
        self.updates_succeeded.fetch_add(1, Ordering::Relaxed);
        self.documents_read
            .fetch_add(stats.documents_read(), Ordering::Relaxed);
        self.parse_failures
            .fetch_add(stats.parse_failures(), Ordering::Relaxed);
        match stats.outcome() {
            Some(UpdateOutcome::Published { size }) => {
                self.last_published_size
                    .store(size as u64, Ordering::Relaxed);
            }
            Some(UpdateOutcome::NoChanges) => {
                self.no_change_updates.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }
    }

    pub fn record_failure(&self) {
        self.updates_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            updates_succeeded: self.updates_succeeded.load(Ordering::Relaxed),
            updates_failed: self.updates_failed.load(Ordering::Relaxed),
            no_change_updates: self.no_change_updates.load(Ordering::Relaxed),
            documents_read: self.documents_read.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            last_published_size: self.last_published_size.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`CacheMetrics`] at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub updates_succeeded: u64,
    pub updates_failed: u64,
    pub no_change_updates: u64,
    pub documents_read: u64,
    pub parse_failures: u64,
    pub last_published_size: u64,
}
