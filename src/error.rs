//! Error types for cache construction and updates.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by cache construction and by update runs.
///
/// Only `Config` and `Policy` are fatal; they are raised at construction,
/// before the first update. Everything else is transient: the updater logs
/// the failure, keeps the previously published snapshot and retries on the
/// next tick.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid configuration for cache '{cache}': {reason}")]
    Config { cache: String, reason: String },

    #[error("cache policy '{cache}' violates its contract: {reason}")]
    Policy { cache: String, reason: String },

    #[error("database error while updating cache '{cache}': {reason}")]
    Transport { cache: String, reason: String },

    #[error("update of cache '{cache}' exceeded its {timeout:?} operation timeout")]
    Timeout { cache: String, timeout: Duration },

    #[error("connection pool error for cache '{cache}': {reason}")]
    Pool { cache: String, reason: String },
}

impl CacheError {
    pub fn config(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    pub fn policy(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Policy {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(cache: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            cache: cache.into(),
            timeout,
        }
    }

    pub fn pool(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Pool {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is fatal for the cache as a whole.
    ///
    /// Fatal errors abort construction; transient errors abort a single
    /// update run and leave the published snapshot untouched.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Policy { .. })
    }
}

/// Failure to decode a single fetched row.
///
/// Never aborts an update: the driver counts the failure, logs it with the
/// cache name and the target value type, and moves on to the next row.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct RowParseError {
    reason: String,
}

impl RowParseError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<tokio_postgres::Error> for RowParseError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::new(err.to_string())
    }
}

// Lets the identity raw-to-value conversion (`type Raw = Self::Value`)
// satisfy the fallible-conversion bound on cache policies.
impl From<std::convert::Infallible> for RowParseError {
    fn from(infallible: std::convert::Infallible) -> Self {
        match infallible {}
    }
}
