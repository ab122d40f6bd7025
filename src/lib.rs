//! Policy-driven periodic PostgreSQL cache.
//!
//! A cache instance periodically materialises the result of one SQL query
//! into an in-memory keyed container and serves lock-free snapshot handles
//! to readers. A user-supplied [`CachePolicy`] describes the cached entity:
//! the query, the value and key types, and optionally the column that
//! drives incremental (delta) updates.
//!
//! # Update model
//!
//! A full update reloads every row and replaces the snapshot. An
//! incremental update deep-copies the published snapshot, fetches only rows
//! whose updated column is at or past the high-water mark, upserts them by
//! key, and publishes only when something changed. Rows are never deleted
//! by incremental updates; schedule periodic full reloads to drop stale
//! entries.
//!
//! Updates fan out over every shard of the cluster and can stream large
//! result sets through a server-side cursor in fixed-size chunks. A row
//! that fails to decode is counted and skipped; a transport error aborts
//! the whole update and keeps the previous snapshot published.
//!
//! # Example
//!
//! ```ignore
//! let provider = PgClusterProvider::from_settings(&shard_settings)?;
//! let cache = Arc::new(PostgresCache::<EmployeePolicy, _>::new(
//!     PgCacheConfig::new("pg-main"),
//!     &provider,
//! )?);
//!
//! let updater = PeriodicUpdater::new(
//!     Arc::clone(&cache),
//!     UpdaterConfig::new()
//!         .with_update_interval(Duration::from_secs(1))
//!         .with_allowed_update_types(AllowedUpdateTypes::FullAndIncremental),
//! )?;
//! let handle = updater.spawn();
//!
//! // Handlers read lock-free snapshots at any time.
//! if let Some(snapshot) = cache.snapshot() {
//!     let employee = snapshot.get(&42);
//! }
//!
//! handle.stop().await;
//! ```

pub mod cache;
pub mod cluster;
pub mod config;
pub mod container;
pub mod error;
pub mod pg;
pub mod policy;
pub mod relax;
pub mod snapshot;
pub mod stats;
pub mod updater;

mod query;

pub use cache::PostgresCache;
pub use cluster::{
    ClusterHostFlags, ClusterProvider, ClusterShard, CommandControl, FromRow, Query, QueryParams,
    ShardCursor,
};
pub use config::PgCacheConfig;
pub use container::{CacheContainer, CacheMap, OrderedCacheMap};
pub use error::{CacheError, CacheResult, RowParseError};
pub use pg::{PgClusterProvider, PgShard, PgShardCursor, PgShardSettings};
pub use policy::{CachePolicy, DeltaBound, NoDelta};
pub use relax::CpuRelax;
pub use snapshot::SnapshotHolder;
pub use stats::{
    CacheMetrics, CacheMetricsSnapshot, ScopeTime, UpdateOutcome, UpdateStatsScope, COPY_STAGE,
    FETCH_STAGE, PARSE_STAGE,
};
pub use updater::{
    AllowedUpdateTypes, PeriodicUpdater, UpdateHandler, UpdateKind, UpdaterConfig, UpdaterHandle,
};
