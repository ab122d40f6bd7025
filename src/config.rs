//! Cache configuration.
//!
//! Mirrors the configuration surface of the cache component: the cluster
//! component handle, the incremental-update window correction, per-kind
//! operation timeouts and the cursor chunk size.

use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Default timeout for a full update statement.
pub const DEFAULT_FULL_UPDATE_OP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for an incremental update statement.
pub const DEFAULT_INCREMENTAL_UPDATE_OP_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for a single cache instance.
///
/// `chunk_size == 0` fetches the whole result set in one round trip;
/// a positive value streams rows through a server-side cursor inside a
/// read-only transaction, `chunk_size` rows at a time.
#[derive(Debug, Clone)]
pub struct PgCacheConfig {
    /// Handle to the cluster component serving this cache. Required.
    pub pgcomponent: String,
    /// Subtracted from `last_update` when computing the delta bound, unless
    /// the policy supplies its own high-water mark.
    pub update_correction: Duration,
    /// Network timeout for a full update.
    pub full_update_op_timeout: Duration,
    /// Network timeout for an incremental update.
    pub incremental_update_op_timeout: Duration,
    /// Rows per cursor fetch; 0 disables the cursor path.
    pub chunk_size: usize,
}

impl PgCacheConfig {
    /// Create a configuration with default timeouts for the given cluster
    /// component handle.
    pub fn new(pgcomponent: impl Into<String>) -> Self {
        Self {
            pgcomponent: pgcomponent.into(),
            update_correction: Duration::ZERO,
            full_update_op_timeout: DEFAULT_FULL_UPDATE_OP_TIMEOUT,
            incremental_update_op_timeout: DEFAULT_INCREMENTAL_UPDATE_OP_TIMEOUT,
            chunk_size: 0,
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `PGCACHE_PGCOMPONENT`: cluster component handle (required)
    /// - `PGCACHE_UPDATE_CORRECTION_MS`: delta window correction (default: 0)
    /// - `PGCACHE_FULL_UPDATE_OP_TIMEOUT_MS`: full update timeout (default: 60000)
    /// - `PGCACHE_INCREMENTAL_UPDATE_OP_TIMEOUT_MS`: incremental update timeout (default: 1000)
    /// - `PGCACHE_CHUNK_SIZE`: rows per cursor fetch, 0 for a single statement (default: 0)
    pub fn from_env() -> Self {
        let millis = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
        };

        Self {
            pgcomponent: std::env::var("PGCACHE_PGCOMPONENT").unwrap_or_default(),
            update_correction: millis("PGCACHE_UPDATE_CORRECTION_MS").unwrap_or(Duration::ZERO),
            full_update_op_timeout: millis("PGCACHE_FULL_UPDATE_OP_TIMEOUT_MS")
                .unwrap_or(DEFAULT_FULL_UPDATE_OP_TIMEOUT),
            incremental_update_op_timeout: millis("PGCACHE_INCREMENTAL_UPDATE_OP_TIMEOUT_MS")
                .unwrap_or(DEFAULT_INCREMENTAL_UPDATE_OP_TIMEOUT),
            chunk_size: std::env::var("PGCACHE_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }
    }

    /// Set the delta window correction.
    pub fn with_update_correction(mut self, correction: Duration) -> Self {
        self.update_correction = correction;
        self
    }

    /// Set the full update timeout.
    pub fn with_full_update_op_timeout(mut self, timeout: Duration) -> Self {
        self.full_update_op_timeout = timeout;
        self
    }

    /// Set the incremental update timeout.
    pub fn with_incremental_update_op_timeout(mut self, timeout: Duration) -> Self {
        self.incremental_update_op_timeout = timeout;
        self
    }

    /// Set the cursor chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub(crate) fn validate(&self, cache: &str) -> CacheResult<()> {
        if self.pgcomponent.trim().is_empty() {
            return Err(CacheError::config(
                cache,
                "no `pgcomponent` entry in configuration",
            ));
        }
        Ok(())
    }
}
